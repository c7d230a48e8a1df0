use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;

use crate::config::Config;

use super::{BlobMetadata, BlobStore, BlobStoreError};

/// S3-backed blob store.
///
/// Append uses `If-None-Match: *` so the bucket itself serializes writers per
/// key. The transport's conflict family (`PreconditionFailed`,
/// `ConditionalRequestConflict`) is normalized to
/// [`BlobStoreError::PreconditionFailed`]; everything else surfaces unchanged.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from configuration, honoring `S3_ENDPOINT` overrides
    /// (LocalStack-style deployments need path-style addressing).
    pub async fn connect(config: &Config) -> Self {
        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base).force_path_style(true);
        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self::new(
            aws_sdk_s3::Client::from_conf(builder.build()),
            config.s3_bucket_events.clone(),
        )
    }
}

fn is_precondition_conflict(code: Option<&str>) -> bool {
    matches!(code, Some("PreconditionFailed" | "ConditionalRequestConflict"))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    BlobStoreError::Other(format!(
                        "{}",
                        aws_sdk_s3::error::DisplayErrorContext(&e)
                    ))
                })?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()) == Some(true) {
                    BlobStoreError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    BlobStoreError::Other(format!(
                        "{}",
                        aws_sdk_s3::error::DisplayErrorContext(&e)
                    ))
                }
            })?;

        let body = response.body.collect().await.map_err(|e| {
            BlobStoreError::Other(format!("failed to read object body for {key}: {e}"))
        })?;

        Ok(body.into_bytes().to_vec())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .if_none_match("*");

        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let code = e.as_service_error().and_then(|s| s.code());
                if is_precondition_conflict(code) {
                    Err(BlobStoreError::PreconditionFailed {
                        key: key.to_string(),
                    })
                } else {
                    Err(BlobStoreError::Other(format!(
                        "{}",
                        aws_sdk_s3::error::DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_family_is_normalized() {
        assert!(is_precondition_conflict(Some("PreconditionFailed")));
        assert!(is_precondition_conflict(Some("ConditionalRequestConflict")));
        assert!(!is_precondition_conflict(Some("NoSuchKey")));
        assert!(!is_precondition_conflict(None));
    }
}
