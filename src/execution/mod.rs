pub mod engine;
pub mod result;
pub mod sqlite_engine;

pub use engine::QueryExecutor;
pub use result::QueryResult;
pub use sqlite_engine::SqliteExecutor;
