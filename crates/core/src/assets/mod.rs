use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;

use crate::{AvatarStageError, Result};

const OBJECT_URL_SCHEME: &str = "blob:avatar-stage/";

/// Fetches raw asset bytes by identifier.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, asset_id: &str) -> Result<Vec<u8>>;
}

/// Opens archive containers.
pub trait ArchiveReader: Send + Sync {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn Archive>>;
}

/// An opened archive container.
pub trait Archive: Send {
    /// Returns the bytes of entry `name`, or `None` when it is absent.
    fn entry(&mut self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Fetches `asset_id` as an archive and extracts the entry named `entry`.
pub async fn extract_entry(
    fetcher: &dyn AssetFetcher,
    reader: &dyn ArchiveReader,
    asset_id: &str,
    entry: &str,
) -> Result<Vec<u8>> {
    let bytes = fetcher.fetch(asset_id).await?;
    let mut archive = reader
        .open(bytes)
        .map_err(|err| AvatarStageError::decode(asset_id, err))?;
    archive
        .entry(entry)
        .map_err(|err| AvatarStageError::decode(asset_id, err))?
        .ok_or_else(|| AvatarStageError::decode(asset_id, format!("archive has no `{entry}` entry")))
}

#[derive(Debug, Clone)]
struct ObjectBlob {
    bytes: Arc<[u8]>,
    mime: String,
}

/// Registry of temporary in-memory URLs pointing at blobs.
///
/// Each URL stays resolvable until its [`ObjectUrl`] guard is revoked or
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct ObjectUrlRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    blobs: Mutex<HashMap<String, ObjectBlob>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` and returns a guard owning the new URL.
    pub fn create(&self, bytes: Vec<u8>, mime: impl Into<String>) -> Result<ObjectUrl> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("{OBJECT_URL_SCHEME}{id}");
        self.lock()?.insert(
            url.clone(),
            ObjectBlob {
                bytes: bytes.into(),
                mime: mime.into(),
            },
        );
        Ok(ObjectUrl {
            url,
            registry: self.clone(),
            revoked: false,
        })
    }

    /// Returns the blob behind `url` while it is still live.
    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.lock()
            .ok()
            .and_then(|blobs| blobs.get(url).map(|blob| blob.bytes.clone()))
    }

    /// Returns the MIME type recorded for `url`.
    pub fn mime(&self, url: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|blobs| blobs.get(url).map(|blob| blob.mime.clone()))
    }

    /// Number of URLs that have not been revoked yet.
    pub fn live_count(&self) -> usize {
        self.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    fn revoke(&self, url: &str) {
        match self.lock() {
            Ok(mut blobs) => {
                blobs.remove(url);
            }
            Err(err) => tracing::warn!(%err, url, "could not revoke object url"),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ObjectBlob>>> {
        self.inner
            .blobs
            .lock()
            .map_err(|_| AvatarStageError::msg("object url registry has been poisoned"))
    }
}

/// Temporary URL handed to loaders. Revoked on drop.
#[derive(Debug)]
pub struct ObjectUrl {
    url: String,
    registry: ObjectUrlRegistry,
    revoked: bool,
}

impl ObjectUrl {
    /// The URL string.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Revokes the URL now instead of at drop.
    pub fn revoke(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.revoked {
            self.registry.revoke(&self.url);
            self.revoked = true;
        }
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapFetcher(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl AssetFetcher for MapFetcher {
        async fn fetch(&self, asset_id: &str) -> Result<Vec<u8>> {
            self.0
                .get(asset_id)
                .cloned()
                .ok_or_else(|| AvatarStageError::msg(format!("404 {asset_id}")))
        }
    }

    /// Treats the whole payload as `name=value` lines.
    struct LineArchiveReader;

    struct LineArchive(Vec<(String, Vec<u8>)>);

    impl ArchiveReader for LineArchiveReader {
        fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn Archive>> {
            let text = String::from_utf8(bytes).map_err(|err| AvatarStageError::msg(err.to_string()))?;
            let entries = text
                .lines()
                .filter_map(|line| line.split_once('='))
                .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
                .collect();
            Ok(Box::new(LineArchive(entries)))
        }
    }

    impl Archive for LineArchive {
        fn entry(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .0
                .iter()
                .find(|(entry, _)| entry == name)
                .map(|(_, bytes)| bytes.clone()))
        }
    }

    fn fetcher() -> MapFetcher {
        let mut files = HashMap::new();
        files.insert("bundle".to_string(), b"model.vrm=mesh\nsplat.ply=points".to_vec());
        files.insert("binary".to_string(), vec![0xff, 0xfe]);
        MapFetcher(files)
    }

    #[tokio::test]
    async fn extracts_named_entry() {
        let bytes = extract_entry(&fetcher(), &LineArchiveReader, "bundle", "model.vrm")
            .await
            .unwrap();
        assert_eq!(bytes, b"mesh");
    }

    #[tokio::test]
    async fn missing_entry_is_a_decode_error() {
        let err = extract_entry(&fetcher(), &LineArchiveReader, "bundle", "avatar.vrm")
            .await
            .unwrap_err();
        assert!(format!("{err}").contains("avatar.vrm"));
        assert!(matches!(err, AvatarStageError::Decode { .. }));
    }

    #[tokio::test]
    async fn unreadable_archive_is_a_decode_error() {
        let err = extract_entry(&fetcher(), &LineArchiveReader, "binary", "model.vrm")
            .await
            .unwrap_err();
        assert!(matches!(err, AvatarStageError::Decode { .. }));
    }

    #[test]
    fn object_urls_are_revoked_on_drop() {
        let registry = ObjectUrlRegistry::new();
        let url = registry.create(vec![1, 2, 3], "model/gltf-binary").unwrap();
        let key = url.as_str().to_string();

        assert!(key.starts_with(OBJECT_URL_SCHEME));
        assert_eq!(registry.resolve(&key).as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(registry.mime(&key).as_deref(), Some("model/gltf-binary"));

        drop(url);
        assert!(registry.resolve(&key).is_none());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn explicit_revoke_is_idempotent_with_drop() {
        let registry = ObjectUrlRegistry::new();
        let a = registry.create(vec![1], "application/octet-stream").unwrap();
        let b = registry.create(vec![2], "application/octet-stream").unwrap();
        assert_ne!(a.as_str(), b.as_str());

        a.revoke();
        assert_eq!(registry.live_count(), 1);
        drop(b);
        assert_eq!(registry.live_count(), 0);
    }
}
