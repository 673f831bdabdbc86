//! HTTP surface of the KMS bridge
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


use crate::health::HealthChecker;
use crate::processor::RequestProcessor;
use crate::request_parser::{parse_request, ParseRequestResult};
use crate::signature::SignatureVerifier;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use kmsbridge_keys::KeyManager;
use kmsbridge_types::{ErrorResponse, ProcessRequestResult, KMS_JSON_CONTENT_TYPE};
use serde_json::json;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tracing::{error, info_span, warn, Instrument};
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-amzn-requestid");

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<SignatureVerifier>,
    pub processor: Arc<RequestProcessor>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(key_manager: Arc<KeyManager>, verifier: Arc<SignatureVerifier>) -> Self {
        Self {
            processor: Arc::new(RequestProcessor::new(key_manager.clone())),
            health: Arc::new(HealthChecker::new(key_manager, verifier.clone())),
            verifier,
        }
    }
}

/// Build the router; bodies above `max_body_bytes` are refused with 413
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", post(handle_kms_request))
        .route("/keys", post(handle_kms_request))
        .route("/version", get(version))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn handle_kms_request(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("kms_request", request_id = %request_id, path = %uri.path());

    let mut response = process_signed_request(&state, uri.path(), &headers, &body)
        .instrument(span)
        .await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

async fn process_signed_request(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let signed = match parse_request(path, headers, body) {
        ParseRequestResult::SignedRequest(signed) => signed,
        ParseRequestResult::InvalidRequest {
            status,
            message,
            args,
        } => {
            warn!(status = status.as_u16(), reason = message, args = ?args, "Rejected malformed request");
            return error_response(status);
        }
    };

    if !state.verifier.is_signature_valid(&signed) {
        warn!(operation = %signed.request.target, "Request signature rejected");
        return error_response(StatusCode::UNAUTHORIZED);
    }

    match state.processor.process(&signed.request).await {
        ProcessRequestResult::KmsResponse { content } => kms_json(StatusCode::OK, content),
        ProcessRequestResult::InvalidKmsRequest { message, args } => {
            warn!(operation = %signed.request.target, reason = message, args = ?args, "Invalid KMS request");
            kms_error(
                StatusCode::BAD_REQUEST,
                "ValidationException",
                "The request is invalid.",
            )
        }
        ProcessRequestResult::KmsFailure { message, args } => {
            error!(operation = %signed.request.target, reason = message, args = ?args, "KMS operation failed");
            kms_error(
                StatusCode::BAD_REQUEST,
                "KMSInternalException",
                "The request could not be completed.",
            )
        }
    }
}

/// Generic body for a request rejected before processing
fn error_response(status: StatusCode) -> Response {
    match status {
        StatusCode::UNAUTHORIZED => kms_error(
            status,
            "IncompleteSignatureException",
            "The request signature is missing or invalid.",
        ),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => kms_error(
            status,
            "UnsupportedMediaTypeException",
            "Unsupported media type.",
        ),
        _ => kms_error(status, "ValidationException", "The request is malformed."),
    }
}

fn kms_error(status: StatusCode, error_type: &str, message: &str) -> Response {
    let body = serde_json::to_string(&ErrorResponse::new(error_type, message))
        .unwrap_or_else(|_| String::from("{}"));
    kms_json(status, body)
}

fn kms_json(status: StatusCode, body: String) -> Response {
    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static(KMS_JSON_CONTENT_TYPE))],
        body,
    )
        .into_response()
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let report = state.health.report().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if report.healthy { "ok" } else { "unhealthy" },
            "service": "kmsbridge",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "checks": report.checks,
        })),
    )
}

/// Resolve once either shutdown source fires
///
/// A source whose handler could not be installed is logged and dropped;
/// the server keeps running on the remaining one. Returns the name of the
/// source that fired.
pub async fn wait_for_shutdown<C, T>(ctrl_c: C, terminate: T) -> &'static str
where
    C: Future<Output = io::Result<()>>,
    T: Future<Output = io::Result<()>>,
{
    tokio::pin!(ctrl_c, terminate);
    let (mut ctrl_c_armed, mut terminate_armed) = (true, true);

    loop {
        tokio::select! {
            result = &mut ctrl_c, if ctrl_c_armed => match result {
                Ok(()) => return "Ctrl+C",
                Err(e) => {
                    error!(error = %e, "Ctrl+C handler unavailable");
                    ctrl_c_armed = false;
                }
            },
            result = &mut terminate, if terminate_armed => match result {
                Ok(()) => return "SIGTERM",
                Err(e) => {
                    error!(error = %e, "SIGTERM handler unavailable");
                    terminate_armed = false;
                }
            },
            else => return std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureSettings;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use kmsbridge_keys::KeySet;
    use kmsbridge_test_utils::{test_key_set, RecordingTokenManager};
    use tower::ServiceExt;

    fn app(keys: KeySet) -> (Router, Arc<RecordingTokenManager>) {
        let token = Arc::new(RecordingTokenManager::new());
        let key_manager = Arc::new(KeyManager::new(keys, token.clone()));
        let verifier = Arc::new(SignatureVerifier::new(SignatureSettings::new(None, "us-east-1")));
        (router(AppState::new(key_manager, verifier), 64), token)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_version() {
        let (app, _) = app(KeySet::default());
        let response = app
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], env!("CARGO_PKG_VERSION").as_bytes());
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_415() {
        let (app, token) = app(test_key_set(&[("alpha", 1)]));
        let response = app
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(response.headers().contains_key(&REQUEST_ID_HEADER));
        assert_eq!(
            body_json(response).await["__type"],
            "UnsupportedMediaTypeException"
        );
        assert_eq!(token.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (app, _) = app(KeySet::default());
        let response = app
            .oneshot(
                Request::post("/")
                    .header("content-type", KMS_JSON_CONTENT_TYPE)
                    .body(Body::from(vec![b'a'; 65]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_health_reports_unhealthy_without_keys() {
        let (app, _) = app(KeySet::default());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["checks"]["keys"]["healthy"], false);
        assert_eq!(body["checks"]["signature"]["healthy"], true);
    }

    #[tokio::test]
    async fn test_health_ok_with_present_keys() {
        let (app, token) = app(test_key_set(&[("alpha", 1)]));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
        assert_eq!(token.verify_calls(), 1);
    }

    async fn fire() -> io::Result<()> {
        Ok(())
    }

    async fn fail() -> io::Result<()> {
        Err(io::Error::other("no handler"))
    }

    #[tokio::test]
    async fn test_shutdown_on_first_signal() {
        let fired = wait_for_shutdown(fire(), std::future::pending::<io::Result<()>>()).await;
        assert_eq!(fired, "Ctrl+C");

        let fired = wait_for_shutdown(std::future::pending::<io::Result<()>>(), fire()).await;
        assert_eq!(fired, "SIGTERM");
    }

    #[tokio::test]
    async fn test_failed_handler_does_not_shut_down() {
        let fired = wait_for_shutdown(fail(), async {
            tokio::task::yield_now().await;
            fire().await
        })
        .await;
        assert_eq!(fired, "SIGTERM");

        let waiting = wait_for_shutdown(fail(), fail());
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), waiting).await;
        assert!(timed_out.is_err());
    }
}
