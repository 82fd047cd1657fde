//! Storage errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[cfg(feature = "rocksdb")]
    #[error("RocksDB: {0}")]
    Backend(#[from] rocksdb::Error),

    /// The database was opened without this column family.
    #[error("Missing column family {0}")]
    MissingColumn(&'static str),
}

pub type StorageResult<T> = Result<T, StorageError>;
