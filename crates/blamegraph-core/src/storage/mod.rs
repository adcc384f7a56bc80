//! Storage abstraction layer.
//!
//! Graph persistence is expressed as traits so the indexer does not depend
//! on a particular backend. SQLite is the bundled implementation.

mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Checkpoint, GraphStats, GraphStore, GraphWriter, IndexStore, RepositoryStore};
