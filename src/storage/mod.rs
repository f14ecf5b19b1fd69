//! Storage layer: a keyed JSON document store on SQLite.

mod models;
mod sqlite;

pub use models::*;
pub use sqlite::SqliteStorage;
