//! Logical key management on top of a token backend
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::ciphertext;
use crate::error::{KeyError, KeyResult};
use crate::key_id::is_valid_key_id;
use crate::key_types::{KeyDescription, KeySet};
use crate::token::TokenManager;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bridges logical key ids and the hardware token layer
///
/// The active key set is an immutable snapshot behind an atomically swapped
/// pointer; a request sees either the old or the new set, never a mix.
pub struct KeyManager {
    keys: ArcSwap<KeySet>,
    token_manager: Arc<dyn TokenManager>,
}

impl KeyManager {
    /// Create a key manager over a token backend
    pub fn new(keys: KeySet, token_manager: Arc<dyn TokenManager>) -> Self {
        Self {
            keys: ArcSwap::from_pointee(keys),
            token_manager,
        }
    }

    /// Replace the active key set
    pub fn update_keys(&self, keys: KeySet) {
        info!(key_count = keys.len(), "Key set updated");
        self.keys.store(Arc::new(keys));
    }

    /// Current key set snapshot
    pub fn keys(&self) -> Arc<KeySet> {
        self.keys.load_full()
    }

    /// Whether `key_id` is well formed and configured
    pub fn is_valid_key_id(&self, key_id: &str) -> bool {
        is_valid_key_id(key_id) && self.keys.load().contains(key_id)
    }

    fn describe(&self, key_id: &str) -> Option<KeyDescription> {
        self.keys.load().get(key_id).cloned()
    }

    /// Encrypt `plaintext` under `key_id` and return a self-describing blob
    pub async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> KeyResult<Vec<u8>> {
        let key = self
            .describe(key_id)
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))?;

        let payload = self.token_manager.encrypt(&key, plaintext).await?;
        let blob = ciphertext::encode(key_id, &payload).map_err(|e| {
            error!(key_id = %key_id, error = %e, "Failed to encode ciphertext blob");
            e
        })?;

        debug!(key_id = %key_id, blob_len = blob.len(), "Encrypted plaintext");
        Ok(blob)
    }

    /// Decrypt a blob produced by [`KeyManager::encrypt`]
    pub async fn decrypt(&self, blob: &[u8]) -> KeyResult<Vec<u8>> {
        let (key_id, payload) = ciphertext::decode(blob)?;

        let Some(key) = self.describe(key_id) else {
            error!(key_id = %key_id, "Ciphertext names a key that is not configured");
            return Err(KeyError::NotFound(key_id.to_string()));
        };

        let plaintext = self.token_manager.decrypt(&key, payload).await?;
        debug!(key_id = %key_id, "Decrypted ciphertext");
        Ok(plaintext)
    }

    /// Whether every configured key is present on its token
    ///
    /// An empty key set is never valid.
    pub async fn are_all_keys_valid(&self) -> bool {
        let keys = self.keys();
        if keys.is_empty() {
            warn!("No keys configured");
            return false;
        }

        match self.token_manager.verify_keys(&keys.descriptions()).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Key validation failed");
                false
            }
        }
    }
}
