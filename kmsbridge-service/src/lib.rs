//! KMS Bridge Service
//!
//! Serves the DescribeKey, Encrypt and Decrypt operations of the AWS KMS
//! JSON protocol, authenticated with Signature Version 4, and performs the
//! cryptography on PKCS#11 hardware tokens.
//!
//! Every request runs the same pipeline: [`request_parser`] checks the
//! envelope, [`signature`] verifies the signature, [`processor`] dispatches
//! the operation to the key manager. The first failing stage decides the
//! response and later stages never run.
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


pub mod health;
pub mod processor;
pub mod request_parser;
pub mod server;
pub mod signature;

pub use health::{spawn_preheat, CheckResult, HealthChecker, HealthReport};
pub use processor::RequestProcessor;
pub use request_parser::{parse_request, ParseRequestResult, SignedRequest};
pub use server::{router, wait_for_shutdown, AppState};
pub use signature::{SignatureSettings, SignatureVerifier};

use kmsbridge_config::AppConfig;
use kmsbridge_keys::{KeyManager, KeySet};
use tracing::info;

/// Swap in the key set and signing settings of a freshly loaded configuration
///
/// Listen address, body limit and token library are read only at startup.
pub fn apply_config(config: &AppConfig, key_manager: &KeyManager, verifier: &SignatureVerifier) {
    key_manager.update_keys(KeySet::from_config(&config.keys, &config.token));
    verifier.update_settings(SignatureSettings::from_config(&config.signature));
    info!(
        region = %config.signature.region(),
        credentials = config.signature.credentials().is_some(),
        "Configuration applied"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmsbridge_config::{KeyEntryConfig, SignatureConfig};
    use kmsbridge_test_utils::RecordingTokenManager;
    use std::sync::Arc;

    #[test]
    fn test_apply_config_swaps_snapshots() {
        let key_manager = KeyManager::new(KeySet::default(), Arc::new(RecordingTokenManager::new()));
        let verifier = SignatureVerifier::new(SignatureSettings::new(None, "us-east-1"));

        let mut config = AppConfig::default();
        config.keys.insert(
            "alpha".to_string(),
            KeyEntryConfig {
                serial: Some("12345678".to_string()),
                pin: None,
                id: Some(3),
            },
        );
        config.keys.insert("no-serial".to_string(), KeyEntryConfig::default());
        config.signature = SignatureConfig {
            access_key: Some("AKID".to_string()),
            secret_key: Some("secret".to_string()),
            region: Some("eu-central-1".to_string()),
        };

        apply_config(&config, &key_manager, &verifier);

        let keys = key_manager.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("alpha").unwrap().on_token_key_id(), 3);
        assert_eq!(keys.get("alpha").unwrap().token_pin(), "123456");

        let settings = verifier.settings();
        assert_eq!(settings.region, "eu-central-1");
        assert_eq!(settings.credentials.as_ref().unwrap().access_key, "AKID");
    }
}
