//! Test doubles shared by the KMS bridge crates
//!
//! [`RecordingTokenManager`] stands in for a hardware token: its
//! "ciphertext" is the on-token key id followed by the plaintext reversed,
//! so a blob only decrypts under the key pair that produced it. Every call is
//! counted so tests can assert that rejected requests never reached a token.
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

use async_trait::async_trait;
use kmsbridge_keys::{KeyDescription, KeySet, TokenError, TokenManager, TokenResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const TEST_SERIAL: &str = "12345678";
pub const TEST_PIN: &str = "123456";

/// Token operation selector for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenOperation {
    Encrypt,
    Decrypt,
    VerifyKeys,
}

/// Failure a [`RecordingTokenManager`] reports instead of doing the work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    TokenNotPresent,
    KeyObjectNotFound,
    PinIncorrect,
    Worker,
}

impl InjectedFailure {
    fn to_error(self, key: Option<&KeyDescription>) -> TokenError {
        let serial = key
            .map(|k| k.token_serial_number().to_string())
            .unwrap_or_else(|| TEST_SERIAL.to_string());
        match self {
            InjectedFailure::TokenNotPresent => TokenError::TokenNotPresent(serial),
            InjectedFailure::KeyObjectNotFound => TokenError::KeyObjectNotFound {
                serial,
                id: key.map(KeyDescription::on_token_key_id).unwrap_or(1),
                class: "private key",
            },
            InjectedFailure::PinIncorrect => TokenError::PinIncorrect(serial),
            InjectedFailure::Worker => TokenError::Worker("injected failure".to_string()),
        }
    }
}

/// In-memory token manager that records what it was asked to do
#[derive(Default)]
pub struct RecordingTokenManager {
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    failures: Mutex<HashMap<TokenOperation, InjectedFailure>>,
    verified: Mutex<Vec<KeyDescription>>,
}

impl RecordingTokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `operation` fail with `failure`
    pub fn fail(&self, operation: TokenOperation, failure: InjectedFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation, failure);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Calls of any kind
    pub fn total_calls(&self) -> usize {
        self.encrypt_calls() + self.decrypt_calls() + self.verify_calls()
    }

    /// Keys passed to `verify_keys`, across all calls
    pub fn verified_keys(&self) -> Vec<KeyDescription> {
        self.verified.lock().unwrap().clone()
    }

    fn injected(&self, operation: TokenOperation, key: Option<&KeyDescription>) -> TokenResult<()> {
        match self.failures.lock().unwrap().get(&operation) {
            Some(failure) => Err(failure.to_error(key)),
            None => Ok(()),
        }
    }
}

/// Payload the double produces for `plaintext` under `key`
pub fn fake_payload(key: &KeyDescription, plaintext: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(plaintext.len() + 1);
    payload.push(key.on_token_key_id());
    payload.extend(plaintext.iter().rev());
    payload
}

#[async_trait]
impl TokenManager for RecordingTokenManager {
    async fn encrypt(&self, key: &KeyDescription, plaintext: &[u8]) -> TokenResult<Vec<u8>> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.injected(TokenOperation::Encrypt, Some(key))?;
        Ok(fake_payload(key, plaintext))
    }

    async fn decrypt(&self, key: &KeyDescription, ciphertext: &[u8]) -> TokenResult<Vec<u8>> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.injected(TokenOperation::Decrypt, Some(key))?;
        match ciphertext.split_first() {
            Some((id, body)) if *id == key.on_token_key_id() => {
                Ok(body.iter().rev().copied().collect())
            }
            // A real token fails the padding check in this case
            _ => Err(TokenError::Worker("decryption failed".to_string())),
        }
    }

    async fn verify_keys(&self, keys: &[KeyDescription]) -> TokenResult<()> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verified.lock().unwrap().extend_from_slice(keys);
        self.injected(TokenOperation::VerifyKeys, keys.first())
    }
}

/// Key on the test token with the given CKA_ID
pub fn test_key(on_token_key_id: u8) -> KeyDescription {
    KeyDescription::new(TEST_SERIAL, TEST_PIN, on_token_key_id).unwrap()
}

/// Key set mapping each name to a key on the test token
pub fn test_key_set(keys: &[(&str, u8)]) -> KeySet {
    keys.iter()
        .map(|(key_id, on_token_key_id)| (key_id.to_string(), test_key(*on_token_key_id)))
        .collect()
}
