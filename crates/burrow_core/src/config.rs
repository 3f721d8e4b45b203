//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Keep everything in memory and ignore the path.
    pub in_memory: bool,

    /// Whether to fsync the log on every commit (safer but slower).
    pub sync_writes: bool,

    /// Memtable size in bytes that triggers a freeze.
    pub memtable_size: usize,

    /// Number of segments that triggers a merge.
    pub merge_trigger: usize,

    /// Largest accepted key in bytes.
    pub max_key_size: usize,

    /// Largest accepted value in bytes.
    pub max_value_size: usize,

    /// Most pending writes one transaction may hold.
    pub max_batch_count: usize,

    /// Most pending bytes one transaction may hold.
    pub max_batch_size: u64,

    /// How often the background worker wakes up on its own.
    pub background_interval: Duration,

    /// Whether to run the background worker at all. When disabled,
    /// frozen memtables are flushed inline by the committing thread.
    pub background_work: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            in_memory: false,
            sync_writes: true,
            memtable_size: 4 * 1024 * 1024, // 4 MiB
            merge_trigger: 4,
            max_key_size: 65_000,
            max_value_size: 1 << 30, // 1 GiB
            max_batch_count: 100_000,
            max_batch_size: 64 * 1024 * 1024, // 64 MiB
            background_interval: Duration::from_secs(1),
            background_work: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets in-memory mode.
    #[must_use]
    pub const fn in_memory(mut self, value: bool) -> Self {
        self.in_memory = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the memtable freeze threshold.
    #[must_use]
    pub const fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }

    /// Sets the segment count that triggers a merge.
    #[must_use]
    pub const fn merge_trigger(mut self, count: usize) -> Self {
        self.merge_trigger = count;
        self
    }

    /// Sets the largest accepted key.
    #[must_use]
    pub const fn max_key_size(mut self, size: usize) -> Self {
        self.max_key_size = size;
        self
    }

    /// Sets the largest accepted value.
    #[must_use]
    pub const fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Sets the pending write limit per transaction.
    #[must_use]
    pub const fn max_batch_count(mut self, count: usize) -> Self {
        self.max_batch_count = count;
        self
    }

    /// Sets the pending byte limit per transaction.
    #[must_use]
    pub const fn max_batch_size(mut self, size: u64) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the background worker's wake-up interval.
    #[must_use]
    pub const fn background_interval(mut self, interval: Duration) -> Self {
        self.background_interval = interval;
        self
    }

    /// Enables or disables the background worker.
    #[must_use]
    pub const fn background_work(mut self, value: bool) -> Self {
        self.background_work = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.in_memory);
        assert!(config.sync_writes);
        assert_eq!(config.memtable_size, 4 * 1024 * 1024);
        assert_eq!(config.merge_trigger, 4);
        assert_eq!(config.max_key_size, 65_000);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .in_memory(true)
            .sync_writes(false)
            .memtable_size(1024)
            .merge_trigger(2)
            .background_work(false);

        assert!(config.in_memory);
        assert!(!config.sync_writes);
        assert_eq!(config.memtable_size, 1024);
        assert_eq!(config.merge_trigger, 2);
        assert!(!config.background_work);
    }
}
