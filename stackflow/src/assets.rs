//! Content-addressed uploads of templates and artifacts.
//!
//! Objects are stored under `{prefix}/{hash}` so identical bytes map to the
//! same key. The store is asked whether the key exists before anything is
//! uploaded, which keeps repeated deployments from re-uploading unchanged
//! assets and makes concurrent uploads of the same content harmless.

use crate::backend::{ObjectStore, TemplateSource};
use crate::context::DeployContext;
use crate::core::Parameters;
use crate::errors::{Result, StackflowError};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Returns the hex digest used as an object's content address.
///
/// The digest is a cache key, not a security boundary.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Where an asset ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedAsset {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key, `{prefix}/{hash}`.
    pub key: String,
    /// Object version, when the bucket is versioned.
    pub version: Option<String>,
}

impl UploadedAsset {
    /// Returns a template reference pointing at this object.
    #[must_use]
    pub fn template_source(&self) -> TemplateSource {
        TemplateSource::Url {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            version: self.version.clone(),
        }
    }
}

/// A local artifact a template refers to through its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedAsset {
    /// Local file to upload.
    pub path: PathBuf,
    /// Parameter receiving the object key.
    pub key_parameter: String,
    /// Parameter receiving the bucket name, if the template wants it.
    #[serde(default)]
    pub bucket_parameter: Option<String>,
    /// Parameter receiving the object version, if the template wants it.
    #[serde(default)]
    pub version_parameter: Option<String>,
}

impl EmbeddedAsset {
    /// Creates an asset whose key is passed as `key_parameter`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, key_parameter: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key_parameter: key_parameter.into(),
            bucket_parameter: None,
            version_parameter: None,
        }
    }

    /// Also passes the bucket as `parameter`.
    #[must_use]
    pub fn with_bucket_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.bucket_parameter = Some(parameter.into());
        self
    }

    /// Also passes the object version as `parameter`.
    #[must_use]
    pub fn with_version_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.version_parameter = Some(parameter.into());
        self
    }
}

/// Uploads assets to a bucket exactly once per content hash.
#[derive(Clone)]
pub struct AssetPackager {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for AssetPackager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetPackager")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl AssetPackager {
    /// Creates a packager writing to `bucket`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Creates a packager writing to the configured artifact bucket.
    #[must_use]
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self::new(ctx.object_store().clone(), &ctx.config().artifact_bucket)
    }

    /// Returns the destination bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Stores `bytes` under `{prefix}/{hash}` unless that key already exists.
    pub async fn upload(&self, bytes: &[u8], prefix: &str) -> Result<UploadedAsset> {
        if self.bucket.is_empty() {
            return Err(StackflowError::Config(
                "artifact_bucket must be set to upload templates and assets".to_string(),
            ));
        }

        let key = format!("{}/{}", prefix.trim_end_matches('/'), content_hash(bytes));
        match self.store.head_object(&self.bucket, &key).await {
            Ok(version) => {
                debug!(bucket = %self.bucket, key = %key, "Asset already uploaded");
                return Ok(self.uploaded(key, version));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(StackflowError::backend("HeadObject", key, e)),
        }

        let version = self
            .store
            .put_object(&self.bucket, &key, bytes.to_vec())
            .await
            .map_err(|e| StackflowError::backend("PutObject", key.clone(), e))?;
        info!(bucket = %self.bucket, key = %key, size = bytes.len(), "Uploaded asset");
        Ok(self.uploaded(key, version))
    }

    /// Reads a local file and uploads it.
    pub async fn upload_file(&self, path: &Path, prefix: &str) -> Result<UploadedAsset> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StackflowError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.upload(&bytes, prefix).await
    }

    /// Inlines a template no larger than `inline_limit` bytes and uploads anything larger.
    pub async fn prepare_template(
        &self,
        body: String,
        prefix: &str,
        inline_limit: usize,
    ) -> Result<TemplateSource> {
        if body.len() <= inline_limit {
            return Ok(TemplateSource::Body(body));
        }
        debug!(size = body.len(), limit = inline_limit, "Template too large to inline");
        let asset = self.upload(body.as_bytes(), prefix).await?;
        Ok(asset.template_source())
    }

    /// Uploads every embedded asset and writes its location into `parameters`.
    pub async fn inject_assets(
        &self,
        assets: &[EmbeddedAsset],
        prefix: &str,
        parameters: &mut Parameters,
    ) -> Result<()> {
        for asset in assets {
            let uploaded = self.upload_file(&asset.path, prefix).await?;
            if let Some(name) = &asset.bucket_parameter {
                parameters.insert(name.clone(), uploaded.bucket.clone());
            }
            if let Some(name) = &asset.version_parameter {
                parameters.insert(name.clone(), uploaded.version.clone().unwrap_or_default());
            }
            parameters.insert(asset.key_parameter.clone(), uploaded.key);
        }
        Ok(())
    }

    fn uploaded(&self, key: String, version: Option<String>) -> UploadedAsset {
        UploadedAsset {
            bucket: self.bucket.clone(),
            key,
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockObjectStore;
    use crate::errors::BackendError;
    use crate::testing::InMemoryObjectStore;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn packager() -> (Arc<InMemoryObjectStore>, AssetPackager) {
        let store = Arc::new(InMemoryObjectStore::new());
        let packager = AssetPackager::new(store.clone(), "artifacts");
        (store, packager)
    }

    #[test]
    fn test_content_hash_is_md5_hex() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_hash(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn test_identical_content_is_uploaded_once() {
        let (store, packager) = packager();
        let template = br#"{"Resources": {}}"#;

        let first = packager.upload(template, "assets/core").await.unwrap();
        let second = packager.upload(template, "assets/core").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.key, format!("assets/core/{}", content_hash(template)));
        assert_eq!(store.put_calls(), 1);
        assert_eq!(store.head_calls(), 2);
    }

    #[tokio::test]
    async fn test_prefix_scopes_the_key() {
        let (store, packager) = packager();
        let a = packager.upload(b"same", "assets/a/").await.unwrap();
        let b = packager.upload(b"same", "assets/b").await.unwrap();

        assert_ne!(a.key, b.key);
        assert!(a.key.starts_with("assets/a/"));
        assert!(!a.key.contains("//"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_head_errors_propagate() {
        let (store, packager) = packager();
        store.fail_head(BackendError::other("Access Denied"));

        let err = packager.upload(b"data", "assets/core").await.unwrap_err();
        assert!(matches!(err, StackflowError::Backend { operation: "HeadObject", .. }));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_put_errors_propagate() {
        let mut store = MockObjectStore::new();
        store
            .expect_head_object()
            .returning(|_, _| Err(BackendError::not_found("object")));
        store
            .expect_put_object()
            .times(1)
            .returning(|_, _, _| Err(BackendError::other("SlowDown")));

        let packager = AssetPackager::new(Arc::new(store), "artifacts");
        let err = packager.upload(b"data", "assets").await.unwrap_err();
        assert!(matches!(err, StackflowError::Backend { operation: "PutObject", .. }));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_a_config_error() {
        let packager = AssetPackager::new(Arc::new(InMemoryObjectStore::new()), "");
        let err = tokio_test::assert_err!(packager.upload(b"data", "assets").await);
        assert!(matches!(err, StackflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_small_templates_are_inlined() {
        let (store, packager) = packager();
        let source = packager
            .prepare_template("{}".to_string(), "assets/core", 10)
            .await
            .unwrap();
        assert_eq!(source, TemplateSource::Body("{}".to_string()));
        assert!(store.is_empty());

        let body = "x".repeat(11);
        let source = packager
            .prepare_template(body.clone(), "assets/core", 10)
            .await
            .unwrap();
        assert_eq!(
            source,
            TemplateSource::Url {
                bucket: "artifacts".to_string(),
                key: format!("assets/core/{}", content_hash(body.as_bytes())),
                version: Some("v1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_inject_assets_sets_parameters() {
        let (store, packager) = packager();
        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle.write_all(b"zip bytes").unwrap();

        let assets = vec![EmbeddedAsset::new(bundle.path(), "CodeKey")
            .with_bucket_parameter("CodeBucket")
            .with_version_parameter("CodeVersion")];
        let mut parameters = Parameters::new();
        packager
            .inject_assets(&assets, "assets/api", &mut parameters)
            .await
            .unwrap();

        let key = format!("assets/api/{}", content_hash(b"zip bytes"));
        assert_eq!(parameters["CodeKey"], key);
        assert_eq!(parameters["CodeBucket"], "artifacts");
        assert_eq!(parameters["CodeVersion"], "v1");
        assert_eq!(store.get("artifacts", &key).unwrap(), b"zip bytes".to_vec());
    }

    #[tokio::test]
    async fn test_missing_asset_file_is_an_io_error() {
        let (_, packager) = packager();
        let assets = vec![EmbeddedAsset::new("/definitely/not/here.zip", "CodeKey")];
        let err = packager
            .inject_assets(&assets, "assets", &mut Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StackflowError::Io { .. }));
    }
}
