use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{IdempotencyRecord, IdempotencyStore, IdempotencyStoreError};

/// In-memory idempotency store for tests and single-process mode.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn load(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| IdempotencyStoreError::Other("lock poisoned".to_string()))?;
        Ok(records.get(key).cloned())
    }

    async fn save(&self, record: IdempotencyRecord) -> Result<(), IdempotencyStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| IdempotencyStoreError::Other("lock poisoned".to_string()))?;

        if records.contains_key(&record.idempotency_key) {
            return Err(IdempotencyStoreError::AlreadyExists);
        }

        records.insert(record.idempotency_key.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(key: &str) -> IdempotencyRecord {
        IdempotencyRecord {
            idempotency_key: key.to_string(),
            content_hash: "abc".to_string(),
            status_code: 201,
            response_body: json!({}),
            created_at_utc: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_is_insert_if_absent() {
        let store = InMemoryIdempotencyStore::new();
        store.save(record("k")).await.unwrap();

        let err = store.save(record("k")).await.unwrap_err();
        assert!(matches!(err, IdempotencyStoreError::AlreadyExists));

        assert!(store.load("k").await.unwrap().is_some());
        assert!(store.load("other").await.unwrap().is_none());
    }
}
