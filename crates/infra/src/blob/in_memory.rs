use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{BlobMetadata, BlobStore, BlobStoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    metadata: BlobMetadata,
}

/// In-memory blob store.
///
/// Intended for tests/dev. Listings are always consistent here, which makes
/// gap-simulation tests deterministic via [`InMemoryBlobStore::remove`].
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an object (test support: simulates a listing/storage anomaly).
    pub fn remove(&self, key: &str) {
        if let Ok(mut objects) = self.objects.write() {
            objects.remove(key);
        }
    }

    /// Metadata of a stored object (test support).
    pub fn metadata(&self, key: &str) -> Option<BlobMetadata> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.metadata.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| BlobStoreError::Other("lock poisoned".to_string()))?;

        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| BlobStoreError::Other("lock poisoned".to_string()))?;

        objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| BlobStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| BlobStoreError::Other("lock poisoned".to_string()))?;

        if objects.contains_key(key) {
            return Err(BlobStoreError::PreconditionFailed {
                key: key.to_string(),
            });
        }

        objects.insert(key.to_string(), StoredObject { body, metadata });
        Ok(())
    }
}
