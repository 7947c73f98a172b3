pub mod log;
pub mod sqlite;
pub mod storage;

pub use sqlite::SqliteKvStore;
pub use storage::{default_data_dir, FileKvStore, KvStore, MemoryKvStore};
