use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::OnceCell;

use crate::{audio::AudioDecoder, audio::DecodedAudio, AvatarStageError, Result};

/// Outcome of one decode attempt, shared by everyone awaiting it.
type Attempt = std::result::Result<Arc<DecodedAudio>, Arc<str>>;
type Entry = Arc<OnceCell<Attempt>>;

/// Memoized decode-and-store registry for audio assets.
///
/// The entry for an asset is inserted before its decode starts, so concurrent
/// requests for the same asset await one shared attempt and observe the same
/// outcome. A failed attempt is evicted once it has settled and the next
/// request starts over. Successful entries are kept for the life of the cache.
pub struct AudioBufferCache {
    decoder: Arc<dyn AudioDecoder>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl AudioBufferCache {
    /// Creates an empty cache decoding through `decoder`.
    pub fn new(decoder: Arc<dyn AudioDecoder>) -> Self {
        Self {
            decoder,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the decoded payload for `asset_id`, decoding it on first use.
    pub async fn get(&self, asset_id: &str) -> Result<Arc<DecodedAudio>> {
        let entry = {
            let mut entries = self.lock()?;
            entries
                .entry(asset_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let attempt = entry
            .get_or_init(|| async {
                tracing::debug!(asset = asset_id, "decoding audio");
                self.decoder
                    .decode(asset_id)
                    .await
                    .map(Arc::new)
                    .map_err(|err| match err {
                        AvatarStageError::Decode { reason, .. } => Arc::from(reason),
                        other => Arc::from(other.to_string()),
                    })
            })
            .await;

        match attempt {
            Ok(buffer) => Ok(buffer.clone()),
            Err(reason) => {
                self.evict(asset_id, &entry)?;
                Err(AvatarStageError::decode(asset_id, reason))
            }
        }
    }

    /// Whether a decoded payload is stored for `asset_id`.
    pub fn is_cached(&self, asset_id: &str) -> bool {
        self.lock()
            .map(|entries| {
                entries
                    .get(asset_id)
                    .and_then(|entry| entry.get())
                    .map(|attempt| attempt.is_ok())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Drops `failed` from the map if it is still the entry for `asset_id`.
    /// Only called after the attempt held by `failed` has settled.
    fn evict(&self, asset_id: &str, failed: &Entry) -> Result<()> {
        let mut entries = self.lock()?;
        let stale = entries
            .get(asset_id)
            .map(|current| Arc::ptr_eq(current, failed))
            .unwrap_or(false);
        if stale {
            entries.remove(asset_id);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| AvatarStageError::msg("audio cache has been poisoned"))
    }
}

impl std::fmt::Debug for AudioBufferCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().map(|entries| entries.len()).unwrap_or(0);
        f.debug_struct("AudioBufferCache")
            .field("entries", &entries)
            .finish()
    }
}
