/*!
 * ============================================================================
 * UPLOAD PIPELINE
 * ============================================================================
 *
 * PURPOSE: Publish a finished recording to the object store
 *
 * FLOW:
 * 1. Reject missing or zero-byte files
 * 2. Key = {key_prefix}/{job_id}.mp4
 * 3. Put with content type + size metadata (where the store supports it)
 * 4. Return the public URL
 * 5. Remove the local file; a failed removal is only logged
 *
 * Backends: any S3-compatible endpoint (MinIO included) or a local
 * directory.
 *
 * ============================================================================
 */

use crate::config::UploadConfig;
use crate::error::RecorderError;
use crate::recording::types::PublishedArtifact;
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use std::path::Path;
use std::sync::Arc;

const CONTENT_TYPE: &str = "video/mp4";

pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
    public_base: String,
    // LocalFileSystem rejects object attributes
    supports_attributes: bool,
}

impl UploadPipeline {
    pub fn from_config(config: &UploadConfig) -> Result<Self, RecorderError> {
        match config {
            UploadConfig::S3 {
                endpoint,
                bucket,
                region,
                access_key_id,
                secret_access_key,
                allow_http,
                public_base_url,
                key_prefix,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_region(region);

                if let Some(endpoint) = endpoint {
                    // Path-style requests for MinIO and friends
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_virtual_hosted_style_request(false);
                }
                if *allow_http {
                    builder = builder.with_allow_http(true);
                }
                if let Some(key) = access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }

                let store = builder.build()?;

                let base = public_base_url
                    .clone()
                    .or_else(|| endpoint.clone())
                    .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region));

                log::info!("Upload target: s3 bucket '{}' via {}", bucket, base);

                Ok(Self {
                    store: Arc::new(store),
                    key_prefix: key_prefix.clone(),
                    public_base: format!("{}/{}", base.trim_end_matches('/'), bucket),
                    supports_attributes: true,
                })
            }
            UploadConfig::Local {
                root,
                public_base_url,
                key_prefix,
            } => Self::local(root, public_base_url.clone(), key_prefix),
        }
    }

    pub fn local(
        root: &Path,
        public_base_url: Option<String>,
        key_prefix: &str,
    ) -> Result<Self, RecorderError> {
        std::fs::create_dir_all(root)
            .map_err(|e| RecorderError::io("Failed to create upload directory", e))?;
        let store = LocalFileSystem::new_with_prefix(root)?;

        let public_base = public_base_url.unwrap_or_else(|| format!("file://{}", root.display()));
        log::info!("Upload target: local directory {:?}", root);

        Ok(Self {
            store: Arc::new(store),
            key_prefix: key_prefix.to_string(),
            public_base,
            supports_attributes: false,
        })
    }

    // Deterministic object key for a job
    pub fn object_key(&self, job_id: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}.mp4", job_id)
        } else {
            format!("{}/{}.mp4", prefix, job_id)
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), key)
    }

    /**
     * Upload `local_path` under the job's key and delete the local copy
     */
    pub async fn publish(
        &self,
        local_path: &Path,
        job_id: &str,
    ) -> Result<PublishedArtifact, RecorderError> {
        let size_bytes = tokio::fs::metadata(local_path)
            .await
            .map(|m| m.len())
            .map_err(|e| RecorderError::Upload {
                message: format!("Cannot read artifact {:?}: {}", local_path, e),
            })?;

        if size_bytes == 0 {
            return Err(RecorderError::Upload {
                message: format!("Artifact {:?} is empty", local_path),
            });
        }

        let data = tokio::fs::read(local_path).await.map_err(|e| RecorderError::Upload {
            message: format!("Cannot read artifact {:?}: {}", local_path, e),
        })?;

        let key = self.object_key(job_id);
        let location = ObjectPath::from(key.as_str());

        let mut attributes = Attributes::new();
        if self.supports_attributes {
            attributes.insert(Attribute::ContentType, AttributeValue::from(CONTENT_TYPE));
            attributes.insert(
                Attribute::Metadata("size".into()),
                AttributeValue::from(size_bytes.to_string()),
            );
        }
        let options = PutOptions {
            attributes,
            ..PutOptions::default()
        };

        log::info!("Uploading {:?} ({} bytes) to {}", local_path, size_bytes, key);
        self.store
            .put_opts(&location, PutPayload::from(data), options)
            .await?;

        let url = self.public_url(&key);
        log::info!("Upload complete: {}", url);

        if let Err(e) = tokio::fs::remove_file(local_path).await {
            log::warn!("Failed to delete uploaded artifact {:?}: {}", local_path, e);
        }

        Ok(PublishedArtifact {
            url,
            key,
            size_bytes,
        })
    }

    /// Size of every stored object under the key prefix
    pub async fn list_sizes(&self) -> Result<Vec<(String, u64)>, RecorderError> {
        let prefix = ObjectPath::from(self.key_prefix.trim_matches('/'));
        let mut stream = self.store.list(Some(&prefix));
        let mut objects = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            objects.push((meta.location.to_string(), meta.size as u64));
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_roundtrip_preserves_size() {
        let store_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();

        let artifact = work_dir.path().join("job-42.mp4");
        let payload = vec![7u8; 4096];
        std::fs::write(&artifact, &payload).unwrap();

        let pipeline = UploadPipeline::local(store_dir.path(), None, "recordings").unwrap();
        let published = pipeline.publish(&artifact, "job-42").await.unwrap();

        assert_eq!(published.key, "recordings/job-42.mp4");
        assert_eq!(published.size_bytes, 4096);
        assert!(published.url.ends_with("/recordings/job-42.mp4"));
        assert!(!artifact.exists(), "local artifact should be removed after upload");

        let listed = pipeline.list_sizes().await.unwrap();
        assert_eq!(listed, vec![("recordings/job-42.mp4".to_string(), 4096)]);
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_file() {
        let store_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let artifact = work_dir.path().join("empty.mp4");
        std::fs::write(&artifact, b"").unwrap();

        let pipeline = UploadPipeline::local(store_dir.path(), None, "recordings").unwrap();
        let err = pipeline.publish(&artifact, "empty").await.unwrap_err();
        assert!(matches!(err, RecorderError::Upload { .. }));
        assert!(pipeline.list_sizes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_missing_file_fails() {
        let store_dir = tempfile::tempdir().unwrap();
        let pipeline = UploadPipeline::local(store_dir.path(), None, "recordings").unwrap();
        let err = pipeline
            .publish(Path::new("/nonexistent/ghost.mp4"), "ghost")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost.mp4"));
    }

    #[test]
    fn test_object_key_and_url() {
        let store_dir = tempfile::tempdir().unwrap();
        let pipeline = UploadPipeline::local(
            store_dir.path(),
            Some("http://cdn.example.com/decks/".to_string()),
            "/recordings/",
        )
        .unwrap();
        assert_eq!(pipeline.object_key("abc"), "recordings/abc.mp4");
        assert_eq!(
            pipeline.public_url("recordings/abc.mp4"),
            "http://cdn.example.com/decks/recordings/abc.mp4"
        );

        let bare = UploadPipeline::local(store_dir.path(), None, "").unwrap();
        assert_eq!(bare.object_key("abc"), "abc.mp4");
    }

    #[test]
    fn test_s3_url_uses_public_base_and_bucket() {
        let config = UploadConfig::S3 {
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            bucket: "recordings".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio123".to_string()),
            allow_http: true,
            public_base_url: None,
            key_prefix: "decks".to_string(),
        };
        let pipeline = UploadPipeline::from_config(&config).unwrap();
        let key = pipeline.object_key("j1");
        assert_eq!(key, "decks/j1.mp4");
        assert_eq!(pipeline.public_url(&key), "http://127.0.0.1:9000/recordings/decks/j1.mp4");
    }
}
