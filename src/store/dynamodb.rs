use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::AttributeValue,
    Client as DynamoClient,
};
use std::error::Error as StdError;
use std::fmt::Debug;
use tracing::{debug, instrument, trace};

use crate::error::CheckpointError;
use crate::store::CheckpointStore;

const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

const UNAVAILABLE_CODES: &[&str] = &["InternalServerError", "ServiceUnavailable"];

/// Checkpoint storage backed by a DynamoDB table keyed on `shard_id`
///
/// Each call makes a single request. Throttling and service outages are
/// reported as transient [`CheckpointError`]s and left to the caller's
/// retry policy.
#[derive(Debug, Clone)]
pub struct DynamoDbCheckpointStore {
    client: DynamoClient,
    table_name: String,
    key_prefix: String,
}

impl DynamoDbCheckpointStore {
    pub fn builder() -> DynamoDbCheckpointStoreBuilder {
        DynamoDbCheckpointStoreBuilder::new()
    }

    pub fn new(client: DynamoClient, table_name: String, key_prefix: String) -> Self {
        Self {
            client,
            table_name,
            key_prefix,
        }
    }

    fn prefixed_key(&self, shard_id: &str) -> String {
        format!("{}{}", self.key_prefix, shard_id)
    }
}

fn classify_code(code: Option<&str>, message: String) -> CheckpointError {
    match code {
        Some(code) if THROTTLING_CODES.contains(&code) => CheckpointError::Throttled(message),
        Some(code) if UNAVAILABLE_CODES.contains(&code) => {
            CheckpointError::DependencyUnavailable(message)
        }
        _ => CheckpointError::Other(anyhow::anyhow!(message)),
    }
}

fn classify_sdk_error<E, R>(action: &str, err: SdkError<E, R>) -> CheckpointError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: Debug,
{
    let message = format!("{action}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            CheckpointError::DependencyUnavailable(message)
        }
        _ => classify_code(err.code(), message),
    }
}

#[async_trait]
impl CheckpointStore for DynamoDbCheckpointStore {
    #[instrument(skip(self), fields(table = %self.table_name, prefix = %self.key_prefix))]
    async fn get_checkpoint(&self, shard_id: &str) -> Result<Option<String>, CheckpointError> {
        let key = self.prefixed_key(shard_id);
        trace!(shard_id = %shard_id, key = %key, "Getting checkpoint from DynamoDB");

        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("shard_id", AttributeValue::S(key.clone()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| classify_sdk_error("Failed to get checkpoint from DynamoDB", e))?;

        let checkpoint = response
            .item
            .and_then(|item| item.get("sequence_number").cloned())
            .and_then(|attr| attr.as_s().ok().map(|s| s.to_string()));

        debug!(
            shard_id = %shard_id,
            key = %key,
            checkpoint = ?checkpoint,
            "Retrieved checkpoint from DynamoDB"
        );

        Ok(checkpoint)
    }

    #[instrument(skip(self), fields(table = %self.table_name, prefix = %self.key_prefix))]
    async fn save_checkpoint(
        &self,
        shard_id: &str,
        sequence_number: &str,
    ) -> Result<(), CheckpointError> {
        let key = self.prefixed_key(shard_id);

        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("shard_id", AttributeValue::S(key.clone()))
            .item(
                "sequence_number",
                AttributeValue::S(sequence_number.to_string()),
            )
            .send()
            .await
            .map_err(|e| classify_sdk_error("Failed to save checkpoint to DynamoDB", e))?;

        debug!(
            shard_id = %shard_id,
            key = %key,
            sequence_number = %sequence_number,
            "Saved checkpoint to DynamoDB"
        );

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DynamoDbCheckpointStoreBuilder {
    client: Option<DynamoClient>,
    table_name: Option<String>,
    key_prefix: Option<String>,
}

impl DynamoDbCheckpointStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: DynamoClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(key_prefix.into());
        self
    }

    pub fn build(self) -> anyhow::Result<DynamoDbCheckpointStore> {
        Ok(DynamoDbCheckpointStore {
            client: self
                .client
                .ok_or_else(|| anyhow::anyhow!("DynamoDB client is required"))?,
            table_name: self
                .table_name
                .ok_or_else(|| anyhow::anyhow!("Table name is required"))?,
            key_prefix: self.key_prefix.unwrap_or_default(),
        })
    }
}
