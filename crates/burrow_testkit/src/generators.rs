//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random keys, values and operation
//! sequences. Keys are drawn from a small alphabet so sequences revisit
//! the same keys often.

use proptest::prelude::*;

/// Strategy for keys: 1 to 8 bytes over a four-letter alphabet.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(vec![b'a', b'b', b'c', b'd']), 1..=8)
}

/// Strategy for arbitrary keys of any byte value.
pub fn binary_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..64)
}

/// Strategy for values, including empty ones.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// One step of a generated workload.
#[derive(Debug, Clone)]
pub enum KvOperation {
    /// Store a value, optionally with a TTL far enough out not to lapse
    /// during the test.
    Set {
        /// Key to write.
        key: Vec<u8>,
        /// Value to store.
        value: Vec<u8>,
        /// Whether to attach a long TTL.
        with_ttl: bool,
    },
    /// Delete a key.
    Delete {
        /// Key to delete.
        key: Vec<u8>,
    },
    /// Read a key.
    Get {
        /// Key to read.
        key: Vec<u8>,
    },
    /// Flush the memtable to a segment.
    Flush,
    /// Merge all segments.
    Compact,
}

/// Strategy for a single operation.
pub fn operation_strategy() -> impl Strategy<Value = KvOperation> {
    prop_oneof![
        6 => (key_strategy(), value_strategy(), any::<bool>())
            .prop_map(|(key, value, with_ttl)| KvOperation::Set { key, value, with_ttl }),
        2 => key_strategy().prop_map(|key| KvOperation::Delete { key }),
        3 => key_strategy().prop_map(|key| KvOperation::Get { key }),
        1 => Just(KvOperation::Flush),
        1 => Just(KvOperation::Compact),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<KvOperation>> {
    prop::collection::vec(operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_are_never_empty(key in key_strategy()) {
            prop_assert!(!key.is_empty());
            prop_assert!(key.len() <= 8);
            prop_assert!(key.iter().all(|b| (b'a'..=b'd').contains(b)));
        }

        #[test]
        fn sequences_respect_bounds(ops in operation_sequence_strategy(5, 20)) {
            prop_assert!(ops.len() >= 5);
            prop_assert!(ops.len() < 20);
        }
    }
}
