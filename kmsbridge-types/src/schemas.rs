//! KMS operation payload schemas
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


use serde::{Deserialize, Serialize};

use crate::error::{KmsError, Result};

/// Media type used for every KMS request and response body
pub const KMS_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Unwrap a required payload field
pub fn required(value: Option<String>, field: &'static str) -> Result<String> {
    value.ok_or(KmsError::MissingField(field))
}

// ============================================================================
// Request Payloads
// ============================================================================

/// Payload for `TrentService.DescribeKey`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeKeyRequest {
    #[serde(default)]
    pub key_id: Option<String>,
}

/// Payload for `TrentService.Encrypt`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptRequest {
    #[serde(default)]
    pub key_id: Option<String>,
    /// Base64 encoded plaintext
    #[serde(default)]
    pub plaintext: Option<String>,
}

/// Payload for `TrentService.Decrypt`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecryptRequest {
    /// Base64 encoded ciphertext blob
    #[serde(default)]
    pub ciphertext_blob: Option<String>,
}

// ============================================================================
// Response Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyMetadata {
    pub key_id: String,
}

/// Response for `TrentService.DescribeKey`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeKeyResponse {
    pub key_metadata: KeyMetadata,
}

/// Response for `TrentService.Encrypt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptResponse {
    pub ciphertext_blob: String,
}

/// Response for `TrentService.Decrypt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecryptResponse {
    pub plaintext: String,
}

/// Error body returned for rejected requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "__type")]
    pub error_type: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}
