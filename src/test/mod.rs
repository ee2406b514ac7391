//! Test utilities and mock implementations for the shard consumer


use std::time::Duration;

use crate::record::KinesisClientRecord;

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// Create a test record with given sequence number and data
    pub fn create_test_record(sequence_number: &str, data: &[u8]) -> KinesisClientRecord {
        KinesisClientRecord::new(sequence_number, "test-partition-key", data.to_vec())
    }

    /// Create records with zero-padded sequence numbers starting at 0
    pub fn create_test_records(count: usize) -> Vec<KinesisClientRecord> {
        (0..count)
            .map(|i| {
                Self::create_test_record(&format!("{:020}", i), format!("data-{}", i).as_bytes())
            })
            .collect()
    }

    /// Install a test subscriber once per test binary
    #[cfg(test)]
    pub fn init_logging() {
        static INIT: std::sync::Once = std::sync::Once::new();

        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive("shard_checkpointer=debug".parse().unwrap()),
                )
                .with_test_writer()
                .with_thread_ids(true)
                .with_line_number(true)
                .init();
        });
    }
}

/// Assertion helpers for tests
pub mod assertions {
    use super::*;

    pub async fn wait_for_condition<F>(mut check: F, timeout: Duration) -> anyhow::Result<()>
    where
        F: FnMut() -> bool,
    {
        let start = tokio::time::Instant::now();
        while !check() {
            if start.elapsed() > timeout {
                anyhow::bail!("Condition not met within timeout");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_records() {
        let records = TestUtils::create_test_records(3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number(), "00000000000000000000");
        assert_eq!(records[2].sequence_number(), "00000000000000000002");
        assert_eq!(records[1].data().as_ref(), b"data-1");
        assert_eq!(records[0].partition_key(), "test-partition-key");
    }

    #[tokio::test]
    async fn test_wait_for_condition_times_out() {
        let result =
            assertions::wait_for_condition(|| false, Duration::from_millis(30)).await;
        assert!(result.is_err());
    }
}
