//! Column families.

/// Column families for organizing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnFamily {
    /// Index of locally held snapshots (height -> manifest id).
    SnapshotsInfo,
    /// Snapshot manifests indexed by ManifestId.
    Manifests,
    /// Snapshot subtrees indexed by SubtreeId.
    Subtrees,
    /// Subtree index of each stored manifest.
    Metadata,
    /// Default column family (required by RocksDB).
    Default,
}

impl ColumnFamily {
    /// Get the string name of the column family.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::SnapshotsInfo => "snapshots_info",
            ColumnFamily::Manifests => "manifests",
            ColumnFamily::Subtrees => "subtrees",
            ColumnFamily::Metadata => "metadata",
            ColumnFamily::Default => "default",
        }
    }

    /// Get all column families.
    pub fn all() -> &'static [ColumnFamily] {
        &[
            ColumnFamily::SnapshotsInfo,
            ColumnFamily::Manifests,
            ColumnFamily::Subtrees,
            ColumnFamily::Metadata,
            ColumnFamily::Default,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_unique() {
        let names: HashSet<_> = ColumnFamily::all().iter().map(|cf| cf.name()).collect();
        assert_eq!(names.len(), ColumnFamily::all().len());
    }
}
