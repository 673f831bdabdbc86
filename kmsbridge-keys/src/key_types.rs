//! Key type definitions
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


use crate::error::{KeyError, KeyResult};
use crate::key_id::is_valid_key_id;
use kmsbridge_config::{KeyEntryConfig, TokenConfig};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Client-facing identifier for a key
pub type KeyId = String;

/// Physical location of a logical key: which token, how to unlock it, and
/// which key pair (CKA_ID) on it
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyDescription {
    token_serial_number: String,
    token_pin: String,
    on_token_key_id: u8,
}

impl KeyDescription {
    /// Create a key description; serial number and PIN must be non-empty
    pub fn new(
        token_serial_number: impl Into<String>,
        token_pin: impl Into<String>,
        on_token_key_id: u8,
    ) -> KeyResult<Self> {
        let token_serial_number = token_serial_number.into();
        let token_pin = token_pin.into();
        if token_serial_number.is_empty() {
            return Err(KeyError::Configuration("token serial number is empty".to_string()));
        }
        if token_pin.is_empty() {
            return Err(KeyError::Configuration("token PIN is empty".to_string()));
        }

        Ok(Self {
            token_serial_number,
            token_pin,
            on_token_key_id,
        })
    }

    pub fn token_serial_number(&self) -> &str {
        &self.token_serial_number
    }

    pub fn token_pin(&self) -> &str {
        &self.token_pin
    }

    pub fn on_token_key_id(&self) -> u8 {
        self.on_token_key_id
    }
}

impl std::fmt::Debug for KeyDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDescription")
            .field("token_serial_number", &self.token_serial_number)
            .field("token_pin", &"<redacted>")
            .field("on_token_key_id", &self.on_token_key_id)
            .finish()
    }
}

/// Immutable snapshot of the active logical keys
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<KeyId, KeyDescription>,
}

impl KeySet {
    /// Build the active key set from configuration
    ///
    /// Entries with an invalid identifier or without a token serial number
    /// are skipped. Keys without their own PIN use the token default.
    pub fn from_config(entries: &BTreeMap<String, KeyEntryConfig>, token: &TokenConfig) -> Self {
        let mut keys = HashMap::with_capacity(entries.len());
        for (key_id, entry) in entries {
            if !is_valid_key_id(key_id) {
                warn!(key_id = %key_id, "Skipping configured key with invalid identifier");
                continue;
            }

            let Some(serial) = entry.serial() else {
                warn!(key_id = %key_id, "Skipping configured key without token serial number");
                continue;
            };

            let pin = entry.pin().unwrap_or_else(|| token.default_pin());
            match KeyDescription::new(serial, pin, entry.on_token_id()) {
                Ok(description) => {
                    keys.insert(key_id.clone(), description);
                }
                Err(e) => {
                    warn!(key_id = %key_id, error = %e, "Skipping invalid key configuration");
                }
            }
        }

        Self { keys }
    }

    pub fn get(&self, key_id: &str) -> Option<&KeyDescription> {
        self.keys.get(key_id)
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyId, &KeyDescription)> {
        self.keys.iter()
    }

    /// All key descriptions in the set
    pub fn descriptions(&self) -> Vec<KeyDescription> {
        self.keys.values().cloned().collect()
    }
}

impl FromIterator<(KeyId, KeyDescription)> for KeySet {
    fn from_iter<T: IntoIterator<Item = (KeyId, KeyDescription)>>(iter: T) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
