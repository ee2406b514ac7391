//! The record type handed to shard processors

use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A single stream record as delivered by the consumer runtime
#[derive(Debug, Clone, PartialEq)]
pub struct KinesisClientRecord {
    pub sequence_number: String,
    pub partition_key: String,
    pub data: Bytes,
    pub approximate_arrival_timestamp: Option<DateTime<Utc>>,
}

impl KinesisClientRecord {
    pub fn new(
        sequence_number: impl Into<String>,
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            sequence_number: sequence_number.into(),
            partition_key: partition_key.into(),
            data: data.into(),
            approximate_arrival_timestamp: None,
        }
    }

    pub fn with_arrival_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.approximate_arrival_timestamp = Some(timestamp);
        self
    }

    pub fn sequence_number(&self) -> &str {
        &self.sequence_number
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl From<aws_sdk_kinesis::types::Record> for KinesisClientRecord {
    fn from(record: aws_sdk_kinesis::types::Record) -> Self {
        let approximate_arrival_timestamp = record
            .approximate_arrival_timestamp
            .and_then(|ts| ts.to_chrono_utc().ok());

        Self {
            sequence_number: record.sequence_number,
            partition_key: record.partition_key,
            data: Bytes::from(record.data.into_inner()),
            approximate_arrival_timestamp,
        }
    }
}
