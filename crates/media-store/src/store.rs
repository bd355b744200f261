//! Object-store gateway.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use opendal::layers::LoggingLayer;
use opendal::{Operator, services};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactKind, ObjectAttrs};
use crate::error::{StoreError, StoreResult};

/// Configuration for the production (GCS) store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Logical bucket name.
    pub bucket: String,
    /// Path to a service-credential file. When absent, ambient
    /// credentials are used and URL signing degrades to public URLs.
    pub credentials_path: Option<PathBuf>,
    /// Base URL for public object access.
    pub public_base: String,
}

impl StoreConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            credentials_path: None,
            public_base: "https://storage.googleapis.com".to_string(),
        }
    }
}

/// Gateway to the object store holding all published stream artifacts.
///
/// All keys are bucket-relative. URL derivation is pure; everything else
/// goes through the wrapped operator.
#[derive(Clone)]
pub struct MediaStore {
    op: Operator,
    bucket: String,
    public_base: String,
    signing: bool,
}

impl MediaStore {
    /// Build a store backed by Google Cloud Storage.
    pub fn gcs(config: &StoreConfig) -> StoreResult<Self> {
        let mut builder = services::Gcs::default().bucket(&config.bucket);

        let signing = match &config.credentials_path {
            Some(path) => {
                builder = builder.credential_path(&path.to_string_lossy());
                true
            }
            None => {
                info!("No storage credentials configured; signed URLs degrade to public URLs");
                false
            }
        };

        let op = Operator::new(builder)
            .map_err(|e| StoreError::from_opendal("<init>", e))?
            .layer(LoggingLayer::default())
            .finish();

        Ok(Self {
            op,
            bucket: config.bucket.clone(),
            public_base: config.public_base.clone(),
            signing,
        })
    }

    /// Build a store over an arbitrary operator. Used by tests (memory
    /// backend) and by deployments fronting a different provider.
    pub fn with_operator(
        op: Operator,
        bucket: impl Into<String>,
        public_base: impl Into<String>,
        signing: bool,
    ) -> Self {
        Self {
            op,
            bucket: bucket.into(),
            public_base: public_base.into(),
            signing,
        }
    }

    /// Upload bytes under `key`, overwriting any existing object.
    pub async fn put_blob(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        cache_control: &str,
    ) -> StoreResult<()> {
        let size = body.len();
        self.op
            .write_with(key, body)
            .content_type(content_type)
            .cache_control(cache_control)
            .await
            .map_err(|e| StoreError::from_opendal(key, e))?;
        debug!(key, size, content_type, "Uploaded object");
        Ok(())
    }

    /// Upload a local file under `key` with the artifact kind's content
    /// type and cache policy.
    pub async fn put_file(&self, local_path: &Path, key: &str, kind: ArtifactKind) -> StoreResult<()> {
        let body = tokio::fs::read(local_path).await?;
        self.put_blob(key, Bytes::from(body), kind.content_type(), kind.cache_control())
            .await
    }

    /// Open a byte reader over the object at `key`.
    pub async fn reader(&self, key: &str) -> StoreResult<opendal::Reader> {
        self.op
            .reader(key)
            .await
            .map_err(|e| StoreError::from_opendal(key, e))
    }

    /// Read the full object at `key`.
    pub async fn read(&self, key: &str) -> StoreResult<Bytes> {
        let buf = self
            .op
            .read(key)
            .await
            .map_err(|e| StoreError::from_opendal(key, e))?;
        Ok(buf.to_bytes())
    }

    /// Enumerate objects under `prefix`, skipping zero-size entries.
    pub async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectAttrs>> {
        let entries = self
            .op
            .list_with(prefix)
            .recursive(true)
            .await
            .map_err(|e| StoreError::from_opendal(prefix, e))?;

        let mut attrs = Vec::new();
        for entry in entries {
            let mut meta = entry.metadata().clone();
            if !meta.is_file() {
                continue;
            }
            // Listings may carry partial metadata; fall back to a stat
            // for the size and timestamp.
            if meta.content_length() == 0 || meta.last_modified().is_none() {
                if let Ok(full) = self.op.stat(entry.path()).await {
                    meta = full;
                }
            }
            if meta.content_length() == 0 {
                continue;
            }
            attrs.push(ObjectAttrs {
                key: entry.path().to_string(),
                size: meta.content_length(),
                last_modified: meta
                    .last_modified()
                    .map(|t| DateTime::<Utc>::from(std::time::SystemTime::from(t))),
            });
        }
        Ok(attrs)
    }

    /// Delete the object at `key`. Missing objects surface as
    /// [`StoreError::NotFound`]; this is not an idempotent delete.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.op
            .stat(key)
            .await
            .map_err(|e| StoreError::from_opendal(key, e))?;
        self.op
            .delete(key)
            .await
            .map_err(|e| StoreError::from_opendal(key, e))?;
        debug!(key, "Deleted object");
        Ok(())
    }

    /// Public URL of the object at `key`. Pure derivation from
    /// (base, bucket, key); performs no IO.
    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base.trim_end_matches('/'),
            self.bucket,
            key.trim_start_matches('/')
        )
    }

    /// Signed URL for the object at `key`, valid for `ttl`.
    ///
    /// Without service credentials the store cannot sign; the public URL
    /// is returned instead and the degradation is logged.
    pub async fn signed_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        if !self.signing {
            warn!(key, "Signing unavailable, returning public URL");
            return Ok(self.public_url(key));
        }

        match self.op.presign_read(key, ttl).await {
            Ok(req) => Ok(req.uri().to_string()),
            Err(e) => {
                warn!(key, error = %e, "Presign failed, returning public URL");
                Ok(self.public_url(key))
            }
        }
    }

    /// Delete `.ts` segments under `stream_prefix` whose last-modified
    /// instant is older than `now - age`. Non-segment objects are
    /// skipped; per-object delete failures are logged and enumeration
    /// continues. Returns the number of objects deleted.
    pub async fn delete_segments_older_than(
        &self,
        stream_prefix: &str,
        age: Duration,
    ) -> StoreResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age)
                .map_err(|e| StoreError::Unknown(format!("invalid age: {}", e)))?;

        let mut deleted = 0usize;
        for attrs in self.list(stream_prefix).await? {
            if !is_expired_segment(&attrs, cutoff) {
                continue;
            }
            match self.delete(&attrs.key).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(key = %attrs.key, error = %e, "Failed to delete aged segment"),
            }
        }

        if deleted > 0 {
            info!(prefix = stream_prefix, deleted, "Cleaned up aged segments");
        }
        Ok(deleted)
    }
}

/// Whether an object is a segment last modified before `cutoff`.
/// Objects without a reported modification time are kept.
fn is_expired_segment(attrs: &ObjectAttrs, cutoff: DateTime<Utc>) -> bool {
    attrs.key.ends_with(".ts")
        && attrs
            .last_modified
            .map(|modified| modified < cutoff)
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> MediaStore {
        let op = Operator::new(services::Memory::default())
            .expect("memory operator")
            .finish();
        MediaStore::with_operator(op, "test-bucket", "https://storage.example.com", false)
    }

    #[tokio::test]
    async fn put_and_read_roundtrip() {
        let store = memory_store();
        store
            .put_blob(
                "live/abc/720p/segment_000.ts",
                Bytes::from_static(b"tsdata"),
                ArtifactKind::Segment.content_type(),
                ArtifactKind::Segment.cache_control(),
            )
            .await
            .unwrap();

        let body = store.read("live/abc/720p/segment_000.ts").await.unwrap();
        assert_eq!(&body[..], b"tsdata");
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let store = memory_store();
        let err = store.read("live/missing.ts").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_missing_surfaces_not_found() {
        let store = memory_store();
        let err = store.delete("live/missing.ts").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_read_is_not_found() {
        let store = memory_store();
        store
            .put_blob("live/x.m3u8", Bytes::from_static(b"#EXTM3U"), "x", "y")
            .await
            .unwrap();
        store.delete("live/x.m3u8").await.unwrap();
        assert!(matches!(
            store.read("live/x.m3u8").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_skips_zero_size_entries() {
        let store = memory_store();
        store
            .put_blob("live/abc/empty.ts", Bytes::new(), "x", "y")
            .await
            .unwrap();
        store
            .put_blob("live/abc/full.ts", Bytes::from_static(b"data"), "x", "y")
            .await
            .unwrap();

        let attrs = store.list("live/abc/").await.unwrap();
        assert_eq!(attrs.len(), 1);
        assert!(attrs[0].key.ends_with("full.ts"));
        assert_eq!(attrs[0].size, 4);
    }

    #[tokio::test]
    async fn put_file_uploads_local_content() {
        let store = memory_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment_001.ts");
        std::fs::write(&path, b"local bytes").unwrap();

        store
            .put_file(&path, "live/abc/1080p/segment_001.ts", ArtifactKind::Segment)
            .await
            .unwrap();

        let body = store.read("live/abc/1080p/segment_001.ts").await.unwrap();
        assert_eq!(&body[..], b"local bytes");
    }

    #[tokio::test]
    async fn signed_url_degrades_without_credentials() {
        let store = memory_store();
        let url = store
            .signed_url("live/abc/playlist.m3u8", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://storage.example.com/test-bucket/live/abc/playlist.m3u8"
        );
    }

    #[tokio::test]
    async fn cleanup_skips_non_segments() {
        let store = memory_store();
        store
            .put_blob("live/abc/playlist.m3u8", Bytes::from_static(b"#EXTM3U"), "x", "y")
            .await
            .unwrap();

        let deleted = store
            .delete_segments_older_than("live/abc/", Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert!(store.read("live/abc/playlist.m3u8").await.is_ok());
    }

    #[test]
    fn public_url_is_pure_derivation() {
        let store = memory_store();
        assert_eq!(
            store.public_url("/live/abc/playlist.m3u8"),
            "https://storage.example.com/test-bucket/live/abc/playlist.m3u8"
        );
    }

    #[test]
    fn expiry_filter_keeps_unstamped_objects() {
        let cutoff = Utc::now();
        let unstamped = ObjectAttrs {
            key: "a/b.ts".into(),
            size: 1,
            last_modified: None,
        };
        let old = ObjectAttrs {
            key: "a/c.ts".into(),
            size: 1,
            last_modified: Some(cutoff - chrono::Duration::seconds(90)),
        };
        let playlist = ObjectAttrs {
            key: "a/playlist.m3u8".into(),
            size: 1,
            last_modified: Some(cutoff - chrono::Duration::seconds(90)),
        };
        assert!(!is_expired_segment(&unstamped, cutoff));
        assert!(is_expired_segment(&old, cutoff));
        assert!(!is_expired_segment(&playlist, cutoff));
    }
}
