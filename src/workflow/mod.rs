//! Workflow definitions: types, branch traversal, and validation.

mod dag;
mod types;
mod validator;

pub use dag::child_nodes;
pub use types::*;
pub use validator::{validate_workflow, ValidationContext};
