//! Reply audio served to the telephony platform.
//!
//! A synthesized reply is published under a random id and fetched by the
//! platform from `/assets/{id}`. The entry lives exactly as long as its
//! [`AssetLease`]; dropping the lease unpublishes it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use callbridge_tts::SpeechAsset;
use tracing::debug;

#[derive(Default)]
struct Inner {
    entries: RwLock<HashMap<String, SpeechAsset>>,
}

impl Inner {
    fn remove(&self, id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(id);
        }
    }
}

#[derive(Clone, Default)]
pub struct AssetStore {
    inner: Arc<Inner>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, asset: SpeechAsset) -> AssetLease {
        let id = uuid::Uuid::new_v4().simple().to_string();
        if let Ok(mut entries) = self.inner.entries.write() {
            entries.insert(id.clone(), asset);
        }
        debug!(asset_id = %id, "Published reply asset");
        AssetLease {
            id,
            store: self.inner.clone(),
        }
    }

    pub fn get(&self, id: &str) -> Option<SpeechAsset> {
        self.inner.entries.read().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps one published asset alive.
pub struct AssetLease {
    id: String,
    store: Arc<Inner>,
}

impl AssetLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute URL of the asset under `public_url`.
    pub fn url(&self, public_url: &str) -> String {
        format!("{}/assets/{}", public_url.trim_end_matches('/'), self.id)
    }
}

impl Drop for AssetLease {
    fn drop(&mut self) {
        self.store.remove(&self.id);
        debug!(asset_id = %self.id, "Released reply asset");
    }
}
