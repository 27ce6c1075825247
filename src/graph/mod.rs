//! Dependency graphs.
//!
//! A [`DependencyGraph`] holds the [`DependencyNode`]s of one calc-config,
//! linked producer to consumer, plus the terminal outputs the view asked
//! for. Graph construction from a view definition happens elsewhere; this
//! module only stores, orders and filters graphs.

pub mod builder;
pub mod traversal;
pub mod types;

pub use builder::{DependencyGraph, DependencyGraphBuilder};
pub use traversal::{execution_levels, ready_nodes};
pub use types::*;
