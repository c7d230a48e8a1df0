use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::Config;
use crate::projection::dynamo_client;

use super::{IdempotencyRecord, IdempotencyStore, IdempotencyStoreError};

/// DynamoDB-backed idempotency store.
///
/// `save` relies on an `attribute_not_exists` condition on the partition key,
/// which serializes duplicate submissions exactly like the blob store's
/// create-if-absent serializes event appends.
#[derive(Debug, Clone)]
pub struct DynamoIdempotencyStore {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoIdempotencyStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    pub async fn connect(config: &Config) -> Self {
        Self::new(dynamo_client(config).await, config.idempotency_table.clone())
    }
}

#[async_trait]
impl IdempotencyStore for DynamoIdempotencyStore {
    async fn load(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("idempotencyKey", AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| {
                IdempotencyStoreError::Other(
                    aws_sdk_dynamodb::error::DisplayErrorContext(&e).to_string(),
                )
            })?;

        let Some(item) = response.item() else {
            return Ok(None);
        };

        let get = |name: &str| -> Result<String, IdempotencyStoreError> {
            item.get(name)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| {
                    IdempotencyStoreError::Other(format!("missing string attribute {name}"))
                })
        };

        let status_code = item
            .get("statusCode")
            .and_then(|v| v.as_n().ok())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| IdempotencyStoreError::Other("missing statusCode".to_string()))?;

        let response_body = serde_json::from_str(&get("responseBody")?)
            .map_err(|e| IdempotencyStoreError::Other(format!("bad responseBody: {e}")))?;

        let created_at_utc = DateTime::parse_from_rfc3339(&get("createdAtUtc")?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| IdempotencyStoreError::Other(format!("bad createdAtUtc: {e}")))?;

        Ok(Some(IdempotencyRecord {
            idempotency_key: get("idempotencyKey")?,
            content_hash: get("contentHash")?,
            status_code,
            response_body,
            created_at_utc,
        }))
    }

    async fn save(&self, record: IdempotencyRecord) -> Result<(), IdempotencyStoreError> {
        let response_body = record.response_body.to_string();
        let created_at = record
            .created_at_utc
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        match self
            .client
            .put_item()
            .table_name(&self.table)
            .item("idempotencyKey", AttributeValue::S(record.idempotency_key))
            .item("contentHash", AttributeValue::S(record.content_hash))
            .item(
                "statusCode",
                AttributeValue::N(record.status_code.to_string()),
            )
            .item("responseBody", AttributeValue::S(response_body))
            .item("createdAtUtc", AttributeValue::S(created_at))
            .condition_expression("attribute_not_exists(idempotencyKey)")
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .map(|svc| svc.is_conditional_check_failed_exception())
                    == Some(true) =>
            {
                Err(IdempotencyStoreError::AlreadyExists)
            }
            Err(e) => Err(IdempotencyStoreError::Other(
                aws_sdk_dynamodb::error::DisplayErrorContext(&e).to_string(),
            )),
        }
    }
}
