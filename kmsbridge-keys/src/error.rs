//! Error types for key management and token access
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


use thiserror::Error;

/// Reasons a token operation could not be completed
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("PKCS#11 library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("No token present with serial number {0}")]
    TokenNotPresent(String),

    #[error("No {class} object with id {id} on token {serial}")]
    KeyObjectNotFound {
        serial: String,
        id: u8,
        class: &'static str,
    },

    #[error("{count} {class} objects with id {id} on token {serial}")]
    AmbiguousKeyObject {
        serial: String,
        id: u8,
        class: &'static str,
        count: usize,
    },

    #[error("Incorrect PIN for token {0}")]
    PinIncorrect(String),

    #[error("PKCS#11 error: {0}")]
    Pkcs11(#[from] cryptoki::error::Error),

    #[error("Token worker failed: {0}")]
    Worker(String),
}

impl TokenError {
    /// The token answered, but the requested token or key object is not there
    pub fn is_missing_material(&self) -> bool {
        matches!(
            self,
            TokenError::TokenNotPresent(_)
                | TokenError::KeyObjectNotFound { .. }
                | TokenError::AmbiguousKeyObject { .. }
        )
    }
}

/// Result type for token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Key management errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(&'static str),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;
