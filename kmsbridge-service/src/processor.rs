//! Dispatch of authenticated KMS operations to the key manager

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kmsbridge_keys::{KeyError, KeyManager};
use kmsbridge_types::{
    required, DecryptRequest, DecryptResponse, DescribeKeyRequest, DescribeKeyResponse,
    EncryptRequest, EncryptResponse, KeyMetadata, KmsError, KmsRequest, KmsTarget,
    ProcessRequestResult,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Decodes operation payloads and runs them against the key manager
pub struct RequestProcessor {
    key_manager: Arc<KeyManager>,
}

impl RequestProcessor {
    pub fn new(key_manager: Arc<KeyManager>) -> Self {
        Self { key_manager }
    }

    pub async fn process(&self, request: &KmsRequest) -> ProcessRequestResult {
        let target = match KmsTarget::from_target(&request.target) {
            Ok(target) => target,
            Err(_) => {
                return ProcessRequestResult::invalid("Unknown target", [request.target.clone()])
            }
        };

        debug!(operation = %target, "Processing KMS request");
        let result = match target {
            KmsTarget::DescribeKey => self.describe_key(request),
            KmsTarget::Encrypt => self.encrypt(request).await,
            KmsTarget::Decrypt => self.decrypt(request).await,
        };

        result.unwrap_or_else(|rejection| rejection)
    }

    fn describe_key(&self, request: &KmsRequest) -> Result<ProcessRequestResult, ProcessRequestResult> {
        let payload: DescribeKeyRequest = request.payload().map_err(payload_error)?;
        let key_id = required(payload.key_id, "KeyId").map_err(payload_error)?;

        // Existence in configuration only, the token is not consulted
        if !self.key_manager.is_valid_key_id(&key_id) {
            return Err(ProcessRequestResult::invalid(
                "Unknown key for DescribeKey",
                [key_id],
            ));
        }

        respond(&DescribeKeyResponse {
            key_metadata: KeyMetadata { key_id },
        })
    }

    async fn encrypt(&self, request: &KmsRequest) -> Result<ProcessRequestResult, ProcessRequestResult> {
        let payload: EncryptRequest = request.payload().map_err(payload_error)?;
        let key_id = required(payload.key_id, "KeyId").map_err(payload_error)?;
        let plaintext = required(payload.plaintext, "Plaintext").map_err(payload_error)?;

        let plaintext = STANDARD.decode(plaintext.as_bytes()).map_err(|e| {
            ProcessRequestResult::invalid("Invalid Plaintext for Encrypt", [e.to_string()])
        })?;

        let blob = self
            .key_manager
            .encrypt(&key_id, &plaintext)
            .await
            .map_err(|e| match &e {
                KeyError::NotFound(_) => {
                    ProcessRequestResult::invalid("Unknown key for Encrypt", [key_id.clone()])
                }
                KeyError::Token(token) if token.is_missing_material() => {
                    ProcessRequestResult::invalid(
                        "Key material unavailable for Encrypt",
                        [key_id.clone(), e.to_string()],
                    )
                }
                _ => ProcessRequestResult::failure("Encrypt failed", [key_id.clone(), e.to_string()]),
            })?;

        respond(&EncryptResponse {
            ciphertext_blob: STANDARD.encode(blob),
        })
    }

    async fn decrypt(&self, request: &KmsRequest) -> Result<ProcessRequestResult, ProcessRequestResult> {
        let payload: DecryptRequest = request.payload().map_err(payload_error)?;
        let blob = required(payload.ciphertext_blob, "CiphertextBlob").map_err(payload_error)?;

        let ciphertext = STANDARD.decode(blob.as_bytes()).map_err(|e| {
            ProcessRequestResult::invalid("Invalid CiphertextBlob for Decrypt", [blob.clone(), e.to_string()])
        })?;

        let plaintext = self
            .key_manager
            .decrypt(&ciphertext)
            .await
            .map_err(|e| match e {
                KeyError::NotFound(key_id) => {
                    ProcessRequestResult::invalid("Unknown key in CiphertextBlob", [key_id])
                }
                KeyError::InvalidCiphertext(reason) => ProcessRequestResult::invalid(
                    "Malformed CiphertextBlob",
                    [reason.to_string()],
                ),
                other => ProcessRequestResult::failure("Decrypt failed", [other.to_string()]),
            })?;

        respond(&DecryptResponse {
            plaintext: STANDARD.encode(plaintext),
        })
    }
}

fn payload_error(error: KmsError) -> ProcessRequestResult {
    match error {
        KmsError::MissingField(field) => {
            ProcessRequestResult::invalid("Missing required field", [field.to_string()])
        }
        other => ProcessRequestResult::invalid("Malformed request body", [other.to_string()]),
    }
}

fn respond<T: Serialize>(body: &T) -> Result<ProcessRequestResult, ProcessRequestResult> {
    serde_json::to_string(body)
        .map(ProcessRequestResult::response)
        .map_err(|e| ProcessRequestResult::failure("Failed to serialize response", [e.to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmsbridge_keys::ciphertext;
    use kmsbridge_test_utils::{
        test_key_set, InjectedFailure, RecordingTokenManager, TokenOperation,
    };

    const KEY_ID: &str = "19ec80b0-dfdd-4d97-8164-c6examplekey";

    fn processor() -> (RequestProcessor, Arc<RecordingTokenManager>) {
        let token = Arc::new(RecordingTokenManager::new());
        let key_manager = KeyManager::new(test_key_set(&[(KEY_ID, 1), ("backup", 2)]), token.clone());
        (RequestProcessor::new(Arc::new(key_manager)), token)
    }

    fn request(target: &str, content: &str) -> KmsRequest {
        KmsRequest::new(target, content)
    }

    fn content(result: ProcessRequestResult) -> serde_json::Value {
        match result {
            ProcessRequestResult::KmsResponse { content } => serde_json::from_str(&content).unwrap(),
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_describe_key() {
        let (processor, token) = processor();
        let result = processor
            .process(&request(KmsTarget::DESCRIBE_KEY, &format!(r#"{{"KeyId":"{}"}}"#, KEY_ID)))
            .await;
        assert_eq!(
            content(result),
            serde_json::json!({ "KeyMetadata": { "KeyId": KEY_ID } })
        );
        assert_eq!(token.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_describe_key_rejections() {
        let (processor, _) = processor();
        for body in [r#"{}"#, r#"{"KeyId":"unknown"}"#, r#"{"KeyId":"bad@id"}"#, "not json"] {
            let result = processor.process(&request(KmsTarget::DESCRIBE_KEY, body)).await;
            assert!(
                matches!(result, ProcessRequestResult::InvalidKmsRequest { .. }),
                "{}",
                body
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let (processor, token) = processor();
        let result = processor.process(&request("TrentService.GenerateDataKey", "{}")).await;
        assert_eq!(
            result,
            ProcessRequestResult::invalid("Unknown target", ["TrentService.GenerateDataKey".to_string()])
        );
        assert_eq!(token.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_encrypt_then_decrypt() {
        let (processor, token) = processor();
        let plaintext = STANDARD.encode(b"secret data key");

        let encrypted = content(
            processor
                .process(&request(
                    KmsTarget::ENCRYPT,
                    &format!(r#"{{"KeyId":"backup","Plaintext":"{}"}}"#, plaintext),
                ))
                .await,
        );
        let blob = encrypted["CiphertextBlob"].as_str().unwrap().to_string();
        let raw = STANDARD.decode(&blob).unwrap();
        let (key_id, _) = ciphertext::decode(&raw).unwrap();
        assert_eq!(key_id, "backup");

        let decrypted = content(
            processor
                .process(&request(
                    KmsTarget::DECRYPT,
                    &format!(r#"{{"CiphertextBlob":"{}"}}"#, blob),
                ))
                .await,
        );
        assert_eq!(decrypted["Plaintext"], plaintext);
        assert_eq!(token.encrypt_calls(), 1);
        assert_eq!(token.decrypt_calls(), 1);
    }

    #[tokio::test]
    async fn test_encrypt_input_errors() {
        let (processor, token) = processor();
        for body in [
            r#"{"Plaintext":"AAAA"}"#,
            r#"{"KeyId":"backup"}"#,
            r#"{"KeyId":"backup","Plaintext":"not base64!"}"#,
            r#"{"KeyId":"unknown","Plaintext":"AAAA"}"#,
        ] {
            let result = processor.process(&request(KmsTarget::ENCRYPT, body)).await;
            assert!(
                matches!(result, ProcessRequestResult::InvalidKmsRequest { .. }),
                "{}",
                body
            );
        }
        assert_eq!(token.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_encrypt_token_failures() {
        let (processor, token) = processor();
        let body = r#"{"KeyId":"backup","Plaintext":"AAAA"}"#;

        token.fail(TokenOperation::Encrypt, InjectedFailure::TokenNotPresent);
        let result = processor.process(&request(KmsTarget::ENCRYPT, body)).await;
        assert!(matches!(result, ProcessRequestResult::InvalidKmsRequest { .. }));

        token.fail(TokenOperation::Encrypt, InjectedFailure::Worker);
        let result = processor.process(&request(KmsTarget::ENCRYPT, body)).await;
        assert!(matches!(result, ProcessRequestResult::KmsFailure { .. }));
    }

    #[tokio::test]
    async fn test_decrypt_input_errors_skip_token() {
        let (processor, token) = processor();
        let unknown_key = STANDARD.encode(ciphertext::encode("retired", &[1, 2, 3]).unwrap());
        let truncated = STANDARD.encode([7u8, b'b']);

        for body in [
            r#"{}"#.to_string(),
            r#"{"CiphertextBlob":"%%%"}"#.to_string(),
            format!(r#"{{"CiphertextBlob":"{}"}}"#, unknown_key),
            format!(r#"{{"CiphertextBlob":"{}"}}"#, truncated),
        ] {
            let result = processor.process(&request(KmsTarget::DECRYPT, &body)).await;
            assert!(
                matches!(result, ProcessRequestResult::InvalidKmsRequest { .. }),
                "{}",
                body
            );
        }
        assert_eq!(token.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_decrypt_token_failure_is_kms_failure() {
        let (processor, token) = processor();
        let blob = STANDARD.encode(ciphertext::encode("backup", &[2, 1]).unwrap());
        token.fail(TokenOperation::Decrypt, InjectedFailure::PinIncorrect);

        let result = processor
            .process(&request(KmsTarget::DECRYPT, &format!(r#"{{"CiphertextBlob":"{}"}}"#, blob)))
            .await;
        assert!(matches!(result, ProcessRequestResult::KmsFailure { .. }));
        assert_eq!(token.decrypt_calls(), 1);
    }
}
