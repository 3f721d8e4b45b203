//! Stress tests for Burrow.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::key;
use burrow_core::{CoreError, Database};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            key_count: 1_000,
        }
    }
}

fn tally(results: impl IntoIterator<Item = bool>, start: Instant) -> StressTestResult {
    let (mut ok, mut failed) = (0, 0);
    for success in results {
        if success {
            ok += 1;
        } else {
            failed += 1;
        }
    }
    StressTestResult::new(ok, failed, start.elapsed())
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    let start = Instant::now();
    tally(
        (0..config.operations).map(|i| db.set(&key(i % config.key_count), value.clone(), None).is_ok()),
        start,
    )
}

/// Run a sequential read stress test.
pub fn stress_sequential_reads(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    for i in 0..config.key_count {
        let _ = db.set(&key(i), value.clone(), None);
    }

    let start = Instant::now();
    tally(
        (0..config.operations).map(|i| db.get(&key(i % config.key_count)).is_ok()),
        start,
    )
}

/// Run a mixed read/write/delete stress test.
pub fn stress_mixed_operations(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = vec![0xCDu8; config.value_size];
    let start = Instant::now();
    tally(
        (0..config.operations).map(|i| {
            let k = key(i % config.key_count);
            match i % 4 {
                0 | 1 => db.set(&k, value.clone(), None).is_ok(),
                2 => matches!(db.get(&k), Ok(_) | Err(CoreError::KeyNotFound)),
                _ => db.delete(&k).is_ok(),
            }
        }),
        start,
    )
}

/// Run a concurrent read stress test.
pub fn stress_concurrent_reads(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    for i in 0..config.key_count {
        let _ = db.set(&key(i), value.clone(), None);
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key_count = config.key_count;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let idx = (t * ops_per_thread + i) % key_count;
                    match db.get(&key(idx)) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run concurrent read-modify-write increments of one counter.
///
/// Conflicting commits are counted as failures and retried, so the
/// final counter must equal `config.operations`.
pub fn stress_concurrent_increments(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    const COUNTER: &[u8] = b"counter";
    let _ = db.set(COUNTER, 0u64.to_le_bytes().to_vec(), None);

    let conflicts = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let db = Arc::clone(&db);
            let conflicts = Arc::clone(&conflicts);
            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    loop {
                        let result = db.update(|txn| {
                            let raw = txn.get(COUNTER)?;
                            let mut bytes = [0u8; 8];
                            bytes.copy_from_slice(&raw[..8]);
                            let next = u64::from_le_bytes(bytes) + 1;
                            txn.set(COUNTER, next.to_le_bytes().to_vec(), None)
                        });
                        match result {
                            Ok(()) => break,
                            Err(CoreError::Conflict) => {
                                conflicts.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => panic!("increment failed: {err}"),
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        ops_per_thread * config.threads,
        conflicts.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a transaction discard stress test.
pub fn stress_transaction_discards(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    let start = Instant::now();

    tally(
        (0..config.operations).map(|i| {
            // Every other transaction fails on purpose.
            let should_fail = i % 2 == 0;
            db.update(|txn| {
                txn.set(&key(i % config.key_count), value.clone(), None)?;
                if should_fail {
                    Err(CoreError::invalid_argument("intentional"))
                } else {
                    Ok(())
                }
            })
            .is_ok()
        }),
        start,
    )
}

/// Run a large transaction stress test.
pub fn stress_large_transactions(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    let batch_size = 100;

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let result = db.update(|txn| {
            for i in 0..batch_size {
                txn.set(&key(batch * batch_size + i), value.clone(), None)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;
    use burrow_core::Config;

    fn small_config() -> StressConfig {
        StressConfig {
            operations: 400,
            threads: 4,
            value_size: 64,
            key_count: 50,
        }
    }

    fn small_memtable_db() -> Database {
        Database::open_with_config(
            "",
            Config::new().in_memory(true).memtable_size(4 * 1024).merge_trigger(3),
        )
        .expect("Failed to create database")
    }

    #[test]
    fn test_stress_sequential_writes() {
        let db = small_memtable_db();
        let result = stress_sequential_writes(&db, &small_config());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
    }

    #[test]
    fn test_stress_sequential_reads() {
        let db = small_memtable_db();
        let result = stress_sequential_reads(&db, &small_config());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_stress_mixed_operations() {
        let db = TestDatabase::file();
        let result = stress_mixed_operations(&db, &small_config());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_stress_concurrent_reads() {
        let db = Arc::new(small_memtable_db());
        let result = stress_concurrent_reads(db, &small_config());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
    }

    #[test]
    fn test_stress_concurrent_increments() {
        let db = Arc::new(small_memtable_db());
        let config = StressConfig {
            operations: 200,
            ..small_config()
        };
        let result = stress_concurrent_increments(Arc::clone(&db), &config);
        assert_eq!(result.successful_ops, 200);

        let raw = db.get(b"counter").unwrap();
        assert_eq!(u64::from_le_bytes(raw[..8].try_into().unwrap()), 200);
    }

    #[test]
    fn test_stress_transaction_discards() {
        let db = small_memtable_db();
        let result = stress_transaction_discards(&db, &small_config());
        assert_eq!(result.successful_ops, 200);
        assert_eq!(result.failed_ops, 200);
        assert_eq!(db.stats().transactions_committed, 200);
    }

    #[test]
    fn test_stress_large_transactions() {
        let db = small_memtable_db();
        let result = stress_large_transactions(&db, &small_config());
        assert_eq!(result.successful_ops, 400);
        assert_eq!(db.get(&key(399)).unwrap().len(), 64);
    }
}
