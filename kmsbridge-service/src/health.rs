//! Health probes for the KMS bridge
//!
//! Two read-only probes: every configured key must be present on its token,
//! and the signature verifier must reject a known-bad signature (and accept
//! a freshly signed request when credentials are configured).
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


use crate::request_parser::{parse_amz_date, SignedRequest};
use crate::signature::{canonical_request, compute_signature, verify_with, SignatureVerifier};
use axum::http::{HeaderMap, HeaderValue};
use kmsbridge_keys::KeyManager;
use kmsbridge_types::{KmsRequest, KmsTarget, KMS_JSON_CONTENT_TYPE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const PROBE_DATE: &str = "20150830T123600Z";
const BOGUS_SIGNATURE: &str = "873f801077f296e395d761d40445c324eba5b7254ebf075831421fc03937fea3";

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub healthy: bool,
    pub description: &'static str,
}

impl CheckResult {
    fn healthy(description: &'static str) -> Self {
        Self {
            healthy: true,
            description,
        }
    }

    fn unhealthy(description: &'static str) -> Self {
        Self {
            healthy: false,
            description,
        }
    }
}

/// Combined probe results
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: BTreeMap<&'static str, CheckResult>,
}

pub struct HealthChecker {
    key_manager: Arc<KeyManager>,
    verifier: Arc<SignatureVerifier>,
}

impl HealthChecker {
    pub fn new(key_manager: Arc<KeyManager>, verifier: Arc<SignatureVerifier>) -> Self {
        Self {
            key_manager,
            verifier,
        }
    }

    pub async fn check_keys(&self) -> CheckResult {
        if self.key_manager.are_all_keys_valid().await {
            CheckResult::healthy("KMS keys are valid.")
        } else {
            CheckResult::unhealthy("KMS keys are missing or invalid.")
        }
    }

    pub fn check_signature(&self) -> CheckResult {
        let settings = self.verifier.settings();

        if verify_with(&settings, &bogus_request()) {
            return CheckResult::unhealthy("Invalid signature is considered valid.");
        }

        if let Some(credentials) = &settings.credentials {
            let mut request = probe_request();
            let canonical = canonical_request(
                &request.path,
                &request.headers,
                &request.signed_headers,
                &request.request.content,
            );
            request.signature = compute_signature(
                &credentials.secret_key,
                &settings.region,
                request.signed_at,
                &canonical,
            );
            if !verify_with(&settings, &request) {
                return CheckResult::unhealthy("Valid signature is considered invalid.");
            }
        }

        CheckResult::healthy("Invalid signature is considered invalid.")
    }

    pub async fn report(&self) -> HealthReport {
        let mut checks = BTreeMap::new();
        checks.insert("keys", self.check_keys().await);
        checks.insert("signature", self.check_signature());

        HealthReport {
            healthy: checks.values().all(|check| check.healthy),
            checks,
        }
    }
}

/// Run the keys probe once in the background so the token library is
/// loaded before the first request arrives
pub fn spawn_preheat(key_manager: Arc<KeyManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if key_manager.are_all_keys_valid().await {
            info!(keys = key_manager.keys().len(), "Preheat complete, all keys present");
        } else {
            warn!("Preheat complete, some keys are missing or invalid");
        }
    })
}

fn probe_headers(content_type: &'static str, host: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static(content_type));
    headers.insert("host", HeaderValue::from_static(host));
    headers.insert("x-amz-date", HeaderValue::from_static(PROBE_DATE));
    headers.insert("x-amz-target", HeaderValue::from_static(KmsTarget::ENCRYPT));
    headers
}

fn probe_signed_request(
    path: &str,
    headers: HeaderMap,
    signed_headers: &str,
    signature: &str,
) -> SignedRequest {
    SignedRequest {
        path: path.to_string(),
        headers,
        signed_headers: signed_headers.to_string(),
        signed_at: parse_amz_date(PROBE_DATE).unwrap_or_default(),
        signature: signature.to_string(),
        request: KmsRequest::new(KmsTarget::ENCRYPT, r#"{"CiphertextBlob":"abcdefgh"}"#),
    }
}

/// Fixed request carrying a signature no credentials produce
fn bogus_request() -> SignedRequest {
    probe_signed_request(
        "/keys",
        probe_headers("application/json", "aws.amazon.com"),
        "content-type,host,x-amz-date,x-amz-target",
        BOGUS_SIGNATURE,
    )
}

/// Fixed request the probe signs with the configured credentials
fn probe_request() -> SignedRequest {
    probe_signed_request(
        "/",
        probe_headers(KMS_JSON_CONTENT_TYPE, "localhost"),
        "content-type;host;x-amz-date;x-amz-target",
        "",
    )
}
