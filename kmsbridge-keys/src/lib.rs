//! Key management for the KMS bridge
//!
//! Maps logical key identifiers onto RSA key pairs held by hardware tokens,
//! encodes ciphertext blobs so they name the key that produced them, and
//! drives the PKCS#11 session lifecycle for every token operation.
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


pub mod ciphertext;
pub mod error;
pub mod key_id;
pub mod key_manager;
pub mod key_types;
pub mod pkcs11;
pub mod token;

pub use error::{KeyError, KeyResult, TokenError, TokenResult};
pub use key_id::is_valid_key_id;
pub use key_manager::KeyManager;
pub use key_types::{KeyDescription, KeyId, KeySet};
pub use pkcs11::Pkcs11TokenManager;
pub use token::TokenManager;
