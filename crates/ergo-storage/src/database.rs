//! RocksDB storage backend, enabled with the `rocksdb` feature.
//!
//! Every [`ColumnFamily`] maps to a RocksDB column family of the same name,
//! compressed with LZ4. Snapshot subtrees are written once and read rarely,
//! so the WAL and open-file budgets are kept small.

use crate::batch::OperationKind;
use crate::{ColumnFamily, Storage, StorageError, StorageResult, WriteBatch};
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type Db = DBWithThreadMode<MultiThreaded>;

/// Snapshot store on disk. Cloning shares the handle.
#[derive(Clone)]
pub struct Database {
    db: Arc<Db>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(path = ?path, "Opening snapshot database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(128);
        opts.set_keep_log_file_num(1);
        opts.set_max_total_wal_size(32 * 1024 * 1024);

        let columns = ColumnFamily::all().iter().map(|cf| {
            let mut cf_opts = Options::default();
            cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            ColumnFamilyDescriptor::new(cf.name(), cf_opts)
        });
        let db = Db::open_cf_descriptors(&opts, path, columns)?;
        debug!(columns = ColumnFamily::all().len(), "Snapshot database opened");

        Ok(Self { db: Arc::new(db) })
    }

    /// Flush memtables of every column family.
    pub fn flush(&self) -> StorageResult<()> {
        for cf in ColumnFamily::all() {
            self.db.flush_cf(&self.column(*cf)?)?;
        }
        Ok(())
    }

    fn column(&self, cf: ColumnFamily) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(cf.name())
            .ok_or(StorageError::MissingColumn(cf.name()))
    }
}

impl Storage for Database {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(&self.column(cf)?, key)?)
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        Ok(self.db.put_cf(&self.column(cf)?, key, value)?)
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        Ok(self.db.delete_cf(&self.column(cf)?, key)?)
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut rocks = rocksdb::WriteBatch::default();
        for op in batch.operations {
            let column = self.column(op.cf)?;
            match op.kind {
                OperationKind::Put { value } => rocks.put_cf(&column, &op.key, &value),
                OperationKind::Delete => rocks.delete_cf(&column, &op.key),
            }
        }
        Ok(self.db.write(rocks)?)
    }

    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let entries = self
            .db
            .iterator_cf(&self.column(cf)?, rocksdb::IteratorMode::Start)
            .map(|entry| entry.map(|(k, v)| (k.to_vec(), v.to_vec())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(entries.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_delete() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        db.put(ColumnFamily::Manifests, b"m1", b"manifest").unwrap();
        assert_eq!(
            db.get(ColumnFamily::Manifests, b"m1").unwrap(),
            Some(b"manifest".to_vec())
        );
        assert!(db.get(ColumnFamily::Subtrees, b"m1").unwrap().is_none());

        db.delete(ColumnFamily::Manifests, b"m1").unwrap();
        assert!(!db.contains(ColumnFamily::Manifests, b"m1").unwrap());
    }

    #[test]
    fn test_write_batch_and_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Database::open(tmp.path()).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(ColumnFamily::Manifests, b"m1".to_vec(), b"manifest".to_vec());
            batch.put(ColumnFamily::Subtrees, b"s1".to_vec(), b"subtree".to_vec());
            batch.put(ColumnFamily::Subtrees, b"s0".to_vec(), b"first".to_vec());
            db.write_batch(batch).unwrap();
            db.flush().unwrap();
        }

        let db = Database::open(tmp.path()).unwrap();
        assert_eq!(
            db.get(ColumnFamily::Manifests, b"m1").unwrap(),
            Some(b"manifest".to_vec())
        );
        let keys: Vec<_> = db
            .iter(ColumnFamily::Subtrees)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"s0".to_vec(), b"s1".to_vec()]);
    }
}
