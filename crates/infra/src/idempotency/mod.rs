//! Idempotency layer: every mutating command is exactly-once from the
//! client's perspective.
//!
//! A record binds an `Idempotency-Key` to the SHA-256 of the request content
//! and the response that was produced. Replays return the stored response
//! verbatim; a key reused with different content is a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

mod dynamo;
mod in_memory;

pub use dynamo::DynamoIdempotencyStore;
pub use in_memory::InMemoryIdempotencyStore;

/// Stored idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub content_hash: String,
    pub status_code: u16,
    pub response_body: JsonValue,
    pub created_at_utc: DateTime<Utc>,
}

/// Outcome of checking a key against its stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyDecision {
    /// First sighting: run the command, then save with this hash.
    New { content_hash: String },
    /// Same key, same content: reply with the stored response verbatim.
    Replay(IdempotencyRecord),
    /// Same key, different content: conflict.
    Mismatch,
}

/// SHA-256 over the canonical JSON serialization of the request content.
///
/// `serde_json::Value` objects serialize with BTreeMap key ordering and a
/// single number formatting, which pins the hash across processes. Content is
/// `{path, body, actor?}`; unauthenticated routes omit `actor`.
pub fn content_hash(content: &JsonValue) -> String {
    let canonical = content.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Decide how to treat a request for `key` with the given content.
pub fn decide(existing: Option<IdempotencyRecord>, content: &JsonValue) -> IdempotencyDecision {
    let hash = content_hash(content);
    match existing {
        None => IdempotencyDecision::New { content_hash: hash },
        Some(record) if record.content_hash == hash => IdempotencyDecision::Replay(record),
        Some(_) => IdempotencyDecision::Mismatch,
    }
}

#[derive(Debug, Error)]
pub enum IdempotencyStoreError {
    /// Insert-if-absent lost a race: a record for this key already exists.
    #[error("idempotency record already exists")]
    AlreadyExists,

    #[error("idempotency store error: {0}")]
    Other(String),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError>;

    /// Insert-if-absent; duplicate inserts fail with
    /// [`IdempotencyStoreError::AlreadyExists`].
    async fn save(&self, record: IdempotencyRecord) -> Result<(), IdempotencyStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(hash: &str) -> IdempotencyRecord {
        IdempotencyRecord {
            idempotency_key: "key-1".to_string(),
            content_hash: hash.to_string(),
            status_code: 201,
            response_body: json!({"resourceId": "r-1"}),
            created_at_utc: Utc::now(),
        }
    }

    #[test]
    fn hash_is_stable_across_key_order() {
        let a = json!({"path": "/resources", "body": {"name": "SalaA", "details": "Piso 1"}});
        let b = json!({"body": {"details": "Piso 1", "name": "SalaA"}, "path": "/resources"});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_differs_on_content_changes() {
        let a = json!({"path": "/resources", "body": {"name": "SalaA"}});
        let b = json!({"path": "/resources", "body": {"name": "SalaB"}});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn first_sighting_is_new() {
        let content = json!({"path": "/resources", "body": {}});
        let decision = decide(None, &content);
        assert_eq!(
            decision,
            IdempotencyDecision::New {
                content_hash: content_hash(&content)
            }
        );
    }

    #[test]
    fn same_content_replays_and_different_content_mismatches() {
        let content = json!({"path": "/resources", "body": {"name": "SalaA"}});
        let stored = record(&content_hash(&content));

        assert_eq!(
            decide(Some(stored.clone()), &content),
            IdempotencyDecision::Replay(stored.clone())
        );

        let other = json!({"path": "/resources", "body": {"name": "SalaB"}});
        assert_eq!(decide(Some(stored), &other), IdempotencyDecision::Mismatch);
    }
}
