use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the store.
///
/// The `*_max_packed_*` thresholds control when a value's compact encoding is
/// promoted to its general one. Promotion is one-way: raising a threshold
/// after a value has promoted does not convert it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hash promotion to hash table by entry count (default: 512)
    pub hash_max_packed_entries: usize,

    /// Hash promotion to hash table by field or value byte length (default: 64)
    pub hash_max_packed_value: usize,

    /// List promotion to linked encoding by entry count (default: 512)
    pub list_max_packed_entries: usize,

    /// List promotion to linked encoding by element byte length (default: 64)
    pub list_max_packed_value: usize,

    /// Set promotion from integer array by entry count (default: 512)
    pub set_max_intset_entries: usize,

    /// Sorted set promotion to skip list by entry count (default: 128)
    pub zset_max_packed_entries: usize,

    /// Sorted set promotion to skip list by element byte length (default: 64)
    pub zset_max_packed_value: usize,

    /// Compress long strings in the snapshot writer (default: true)
    pub snapshot_compression: bool,

    /// Compute and verify the snapshot CRC64 trailer (default: true)
    pub snapshot_checksum: bool,

    /// Default snapshot path (default: "dump.rdb")
    pub snapshot_filename: PathBuf,

    /// Number of logical databases (default: 16)
    pub db_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_max_packed_entries: 512,
            hash_max_packed_value: 64,
            list_max_packed_entries: 512,
            list_max_packed_value: 64,
            set_max_intset_entries: 512,
            zset_max_packed_entries: 128,
            zset_max_packed_value: 64,
            snapshot_compression: true,
            snapshot_checksum: true,
            snapshot_filename: PathBuf::from("dump.rdb"),
            db_count: 16,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hash packed-encoding entry count threshold
    pub fn hash_max_packed_entries(mut self, n: usize) -> Self {
        self.hash_max_packed_entries = n;
        self
    }

    /// Set the hash packed-encoding value length threshold
    pub fn hash_max_packed_value(mut self, n: usize) -> Self {
        self.hash_max_packed_value = n;
        self
    }

    /// Set the list packed-encoding entry count threshold
    pub fn list_max_packed_entries(mut self, n: usize) -> Self {
        self.list_max_packed_entries = n;
        self
    }

    /// Set the list packed-encoding element length threshold
    pub fn list_max_packed_value(mut self, n: usize) -> Self {
        self.list_max_packed_value = n;
        self
    }

    /// Set the integer set entry count threshold
    pub fn set_max_intset_entries(mut self, n: usize) -> Self {
        self.set_max_intset_entries = n;
        self
    }

    /// Set the sorted set packed-encoding entry count threshold
    pub fn zset_max_packed_entries(mut self, n: usize) -> Self {
        self.zset_max_packed_entries = n;
        self
    }

    /// Set the sorted set packed-encoding element length threshold
    pub fn zset_max_packed_value(mut self, n: usize) -> Self {
        self.zset_max_packed_value = n;
        self
    }

    /// Enable or disable snapshot compression
    pub fn snapshot_compression(mut self, enabled: bool) -> Self {
        self.snapshot_compression = enabled;
        self
    }

    /// Enable or disable the snapshot checksum trailer
    pub fn snapshot_checksum(mut self, enabled: bool) -> Self {
        self.snapshot_checksum = enabled;
        self
    }

    /// Set the default snapshot path
    pub fn snapshot_filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_filename = path.into();
        self
    }

    /// Set the number of logical databases
    pub fn db_count(mut self, n: usize) -> Self {
        self.db_count = n;
        self
    }
}
