//! Structural validation of signed KMS requests
//!
//! Parsing never looks at credentials; it only checks that the envelope a
//! signature covers is complete and well formed.

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use chrono::{DateTime, NaiveDateTime, Utc};
use kmsbridge_types::{KmsRequest, KMS_JSON_CONTENT_TYPE};
use once_cell::sync::Lazy;
use regex::Regex;

pub static AMZ_DATE_HEADER: HeaderName = HeaderName::from_static("x-amz-date");
pub static AMZ_TARGET_HEADER: HeaderName = HeaderName::from_static("x-amz-target");

/// Format of the `X-Amz-Date` header
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

static AMZ_DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}T\d{6}Z$").expect("Invalid date regex"));

static AUTHORIZATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^AWS4-HMAC-SHA256 Credential=.+?/.+?, SignedHeaders=(.+?), Signature=(.+)$")
        .expect("Invalid authorization regex")
});

/// A structurally valid request whose signature is not yet checked
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub path: String,
    pub headers: HeaderMap,
    /// Signed header names exactly as given, `;` separated
    pub signed_headers: String,
    pub signed_at: DateTime<Utc>,
    /// Claimed signature, hex
    pub signature: String,
    pub request: KmsRequest,
}

impl SignedRequest {
    /// Signed header names in the order the client listed them
    pub fn signed_header_names(&self) -> impl Iterator<Item = &str> {
        self.signed_headers.split(';')
    }
}

/// Outcome of [`parse_request`]
#[derive(Debug, Clone)]
pub enum ParseRequestResult {
    SignedRequest(SignedRequest),
    InvalidRequest {
        status: StatusCode,
        message: &'static str,
        args: Vec<String>,
    },
}

impl ParseRequestResult {
    fn invalid(status: StatusCode, message: &'static str) -> Self {
        ParseRequestResult::InvalidRequest {
            status,
            message,
            args: Vec::new(),
        }
    }

    fn invalid_value(status: StatusCode, message: &'static str, value: &str) -> Self {
        ParseRequestResult::InvalidRequest {
            status,
            message,
            args: vec![value.to_string()],
        }
    }
}

/// Check the envelope of a request to the KMS endpoint
pub fn parse_request(path: &str, headers: &HeaderMap, body: &[u8]) -> ParseRequestResult {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    if content_type != Some(KMS_JSON_CONTENT_TYPE) {
        return ParseRequestResult::invalid(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported media type",
        );
    }

    let Some(date) = single_header(headers, &AMZ_DATE_HEADER) else {
        return ParseRequestResult::invalid(StatusCode::BAD_REQUEST, "Missing X-Amz-Date header");
    };
    let Some(signed_at) = parse_amz_date(date) else {
        return ParseRequestResult::invalid_value(
            StatusCode::BAD_REQUEST,
            "Invalid X-Amz-Date header value",
            date,
        );
    };

    let Some(target) = single_header(headers, &AMZ_TARGET_HEADER) else {
        return ParseRequestResult::invalid(StatusCode::BAD_REQUEST, "Missing X-Amz-Target header");
    };

    let Some(authorization) = single_header(headers, &AUTHORIZATION) else {
        return ParseRequestResult::invalid(
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header",
        );
    };
    // The header carries the claimed signature, so it is never echoed into args
    let Some(captures) = AUTHORIZATION_PATTERN.captures(authorization) else {
        return ParseRequestResult::invalid(
            StatusCode::UNAUTHORIZED,
            "Malformed Authorization header",
        );
    };

    // Invalid sequences become U+FFFD and then fail signature verification
    let content = String::from_utf8_lossy(body);

    ParseRequestResult::SignedRequest(SignedRequest {
        path: path.to_string(),
        headers: headers.clone(),
        signed_headers: captures[1].to_string(),
        signed_at,
        signature: captures[2].to_string(),
        request: KmsRequest::new(target, content),
    })
}

/// Parse a `yyyyMMddTHHmmssZ` timestamp as UTC
pub fn parse_amz_date(value: &str) -> Option<DateTime<Utc>> {
    if !AMZ_DATE_PATTERN.is_match(value) {
        return None;
    }
    NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Value of a header that must appear exactly once
fn single_header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    let mut values = headers.get_all(name).iter();
    let value = values.next()?;
    if values.next().is_some() {
        return None;
    }
    value.to_str().ok()
}
