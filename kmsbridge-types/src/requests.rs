//! KMS request and processing result definitions

use serde::de::DeserializeOwned;

use crate::error::{KmsError, Result};

/// Operation names accepted in the target header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KmsTarget {
    DescribeKey,
    Encrypt,
    Decrypt,
}

impl KmsTarget {
    pub const DESCRIBE_KEY: &'static str = "TrentService.DescribeKey";
    pub const ENCRYPT: &'static str = "TrentService.Encrypt";
    pub const DECRYPT: &'static str = "TrentService.Decrypt";

    /// Resolve a target header value into an operation
    pub fn from_target(target: &str) -> Result<Self> {
        match target {
            Self::DESCRIBE_KEY => Ok(KmsTarget::DescribeKey),
            Self::ENCRYPT => Ok(KmsTarget::Encrypt),
            Self::DECRYPT => Ok(KmsTarget::Decrypt),
            other => Err(KmsError::UnknownTarget(other.to_string())),
        }
    }

    /// Wire name of this operation
    pub fn as_str(&self) -> &'static str {
        match self {
            KmsTarget::DescribeKey => Self::DESCRIBE_KEY,
            KmsTarget::Encrypt => Self::ENCRYPT,
            KmsTarget::Decrypt => Self::DECRYPT,
        }
    }
}

impl std::fmt::Display for KmsTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A KMS operation as received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsRequest {
    /// Operation name from the target header
    pub target: String,

    /// Raw JSON body
    pub content: String,
}

impl KmsRequest {
    pub fn new(target: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            content: content.into(),
        }
    }

    /// Deserialize the body into an operation payload
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.content)?)
    }
}

/// Outcome of processing a [`KmsRequest`]
///
/// `InvalidKmsRequest` means the client sent something unusable and a retry
/// of the same request will fail again. `KmsFailure` means the input was
/// valid but the token could not complete the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessRequestResult {
    KmsResponse {
        content: String,
    },
    InvalidKmsRequest {
        message: &'static str,
        args: Vec<String>,
    },
    KmsFailure {
        message: &'static str,
        args: Vec<String>,
    },
}

impl ProcessRequestResult {
    pub fn response(content: impl Into<String>) -> Self {
        ProcessRequestResult::KmsResponse {
            content: content.into(),
        }
    }

    pub fn invalid(message: &'static str, args: impl IntoIterator<Item = String>) -> Self {
        ProcessRequestResult::InvalidKmsRequest {
            message,
            args: args.into_iter().collect(),
        }
    }

    pub fn failure(message: &'static str, args: impl IntoIterator<Item = String>) -> Self {
        ProcessRequestResult::KmsFailure {
            message,
            args: args.into_iter().collect(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessRequestResult::KmsResponse { .. })
    }
}
