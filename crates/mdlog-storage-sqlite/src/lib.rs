mod rows;
mod storage;

pub use storage::SqliteStorage;
