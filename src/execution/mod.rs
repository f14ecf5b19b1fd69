//! Execution engine and state types.

mod engine;
mod types;

pub use engine::{tokens_match, ExecutionEngine, StartRequest};
pub use types::*;
