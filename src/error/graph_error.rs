use thiserror::Error;

/// Dependency graph construction errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Duplicate dependency node id: {0}")]
    DuplicateNode(String),
    #[error("{spec} is produced by both {first} and {second}")]
    DuplicateProducer {
        spec: String,
        first: String,
        second: String,
    },
    #[error("Terminal output {0} is not produced by any node")]
    UnproducedTerminalOutput(String),
    #[error("Cycle detected in dependency graph")]
    CycleDetected,
}
