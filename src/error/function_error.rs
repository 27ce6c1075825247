use std::backtrace::Backtrace;
use std::collections::BTreeSet;

use thiserror::Error;
use xcalc_types::ValueSpecification;

/// Item-level errors
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Missing inputs for {function_id}: {} value(s)", .missing.len())]
    MissingInputs {
        function_id: String,
        missing: BTreeSet<ValueSpecification>,
    },
    #[error("Unable to resolve target: {0}")]
    TargetResolution(String),
    #[error("Unable to locate {0} in function repository")]
    FunctionNotFound(String),
    #[error("{class}: {message}")]
    Execution {
        class: String,
        message: String,
        /// Stack of the code that raised the error.
        stack: Option<String>,
    },
    #[error("Function panicked: {0}")]
    Panicked(String),
}

impl FunctionError {
    /// Error raised by a function body. Records the caller's stack.
    pub fn execution(class: impl Into<String>, message: impl Into<String>) -> Self {
        FunctionError::Execution {
            class: class.into(),
            message: message.into(),
            stack: Some(Backtrace::force_capture().to_string()),
        }
    }

    /// Stack captured where the error was raised. Only function errors
    /// carry one; panics and engine-side failures do not.
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            FunctionError::Execution { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    /// Class name recorded on the failed result item.
    pub fn class_name(&self) -> &str {
        match self {
            FunctionError::MissingInputs { .. } => "MissingInputs",
            FunctionError::TargetResolution(_) => "TargetResolution",
            FunctionError::FunctionNotFound(_) => "FunctionNotFound",
            FunctionError::Execution { class, .. } => class,
            FunctionError::Panicked(_) => "Panic",
        }
    }

    /// Message recorded on the failed result item, without the class prefix.
    pub fn message(&self) -> String {
        match self {
            FunctionError::Execution { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for FunctionError {
    fn from(e: serde_json::Error) -> Self {
        FunctionError::execution("Serialization", e.to_string())
    }
}
