//! # ergo-storage
//!
//! Storage layer for the snapshot database.
//!
//! This crate provides a key-value storage abstraction with support for:
//! - Column families for different data types
//! - Atomic batch writes
//! - An in-memory backend, and a RocksDB backend behind the `rocksdb` feature
//!
//! ## Column Families
//!
//! - `SnapshotsInfo`: Index of locally held UTXO snapshots
//! - `Manifests`: Snapshot manifests indexed by ManifestId
//! - `Subtrees`: Snapshot subtree chunks indexed by SubtreeId
//! - `Metadata`: Per-manifest subtree indexes

mod batch;
mod column;
#[cfg(feature = "rocksdb")]
mod database;
mod error;
mod memory;

pub use batch::WriteBatch;
pub use column::ColumnFamily;
#[cfg(feature = "rocksdb")]
pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;

/// Key-value store with column families, shared across tasks.
pub trait Storage: Send + Sync {
    /// Get a value by key from a column family.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Put a key-value pair into a column family.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Delete a key from a column family.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()>;

    /// Check if a key exists in a column family.
    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Execute a batch of writes atomically.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Create an iterator over a column family, in key order.
    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>>;
}
