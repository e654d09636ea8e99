//! Response assembly: replayed headers plus the per-response ones.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::debug;

use crate::cache::{CacheKey, EncodingType};

pub const SERVER_NAME: &str = "repcache";
pub const VARY: &str = "Accept, Accept-Language, Accept-Encoding";
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Everything needed to emit a successful representation.
pub(crate) struct Representation<'a> {
    pub variant: &'a CacheKey,
    pub encoding: EncodingType,
    pub stored_headers: &'a [(Bytes, Bytes)],
    pub body: Bytes,
    /// `None` when the response must not be cached downstream.
    pub max_age: Option<u64>,
    pub status: CacheStatus,
}

pub(crate) fn representation(rep: Representation<'_>) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in rep.stored_headers {
        match (
            HeaderName::from_bytes(name),
            HeaderValue::from_bytes(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %String::from_utf8_lossy(name), "skipping invalid stored header"),
        }
    }

    let variant = rep.variant;
    if !variant.content_type().is_empty() {
        let content_type = if variant.charset().is_empty() {
            variant.content_type().to_string()
        } else {
            format!("{}; charset={}", variant.content_type(), variant.charset())
        };
        insert(&mut headers, header::CONTENT_TYPE, &content_type);
    }
    if !variant.language().is_empty() {
        insert(&mut headers, header::CONTENT_LANGUAGE, variant.language());
    }
    match rep.encoding.header_name() {
        Some(token) if rep.encoding != EncodingType::Identity => {
            insert(&mut headers, header::CONTENT_ENCODING, token);
        }
        _ => {}
    }
    let cache_control = match rep.max_age {
        Some(seconds) => format!("max-age={seconds}"),
        None => "no-store".to_string(),
    };
    insert(&mut headers, header::CACHE_CONTROL, &cache_control);
    insert_common(&mut headers);
    insert(&mut headers, X_CACHE, rep.status.as_str());

    let mut response = Response::new(Body::from(rep.body));
    *response.headers_mut() = headers;
    response
}

/// Plain-text error with the negotiation headers still set.
pub(crate) fn status(code: StatusCode) -> Response {
    let reason = code.canonical_reason().unwrap_or("Error");
    let mut response = (code, reason.to_string()).into_response();
    let headers = response.headers_mut();
    insert(headers, header::CACHE_CONTROL, "no-store");
    insert_common(headers);
    response
}

fn insert_common(headers: &mut HeaderMap) {
    headers.insert(header::VARY, HeaderValue::from_static(VARY));
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!(header = %name, value, "skipping invalid header value"),
    }
}
