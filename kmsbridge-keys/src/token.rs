//! Hardware token interface
//!
//! The key manager talks to tokens only through [`TokenManager`], so the
//! PKCS#11 implementation can be replaced by an in-memory double in tests.
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


use crate::error::TokenResult;
use crate::key_types::KeyDescription;
use async_trait::async_trait;

/// Trait for hardware token backends
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Encrypt `plaintext` with the public key of `key`
    ///
    /// Needs no login; the public key object is readable without a PIN.
    async fn encrypt(&self, key: &KeyDescription, plaintext: &[u8]) -> TokenResult<Vec<u8>>;

    /// Decrypt `ciphertext` with the private key of `key`
    ///
    /// Logs in with the key's PIN and always logs out again before returning.
    async fn decrypt(&self, key: &KeyDescription, ciphertext: &[u8]) -> TokenResult<Vec<u8>>;

    /// Check that every key has both its private and public object present
    ///
    /// Fails on the first missing object or rejected login.
    async fn verify_keys(&self, keys: &[KeyDescription]) -> TokenResult<()>;
}
