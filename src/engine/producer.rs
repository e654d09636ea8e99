//! The request view handed to producers and what they hand back.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Uri, header};
use bytes::Bytes;
use thiserror::Error;

use crate::cache::{CacheKey, EncodingType};

/// The parts of a request that negotiation and production look at.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    path: String,
    query: Option<String>,
    accept: Option<String>,
    accept_language: Option<String>,
    accept_encoding: Option<String>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Capture path, query and the `Accept*` headers of an incoming request.
    pub fn from_http(uri: &Uri, headers: &HeaderMap) -> Self {
        let header_value = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            path: uri.path().to_string(),
            query: uri.query().filter(|query| !query.is_empty()).map(str::to_string),
            accept: header_value(header::ACCEPT),
            accept_language: header_value(header::ACCEPT_LANGUAGE),
            accept_encoding: header_value(header::ACCEPT_ENCODING),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_accept(mut self, value: impl Into<String>) -> Self {
        self.accept = Some(value.into());
        self
    }

    pub fn with_accept_language(mut self, value: impl Into<String>) -> Self {
        self.accept_language = Some(value.into());
        self
    }

    pub fn with_accept_encoding(mut self, value: impl Into<String>) -> Self {
        self.accept_encoding = Some(value.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    pub fn accept_language(&self) -> Option<&str> {
        self.accept_language.as_deref()
    }

    pub fn accept_encoding(&self) -> Option<&str> {
        self.accept_encoding.as_deref()
    }

    /// Path plus query: everything about the request that picks the resource.
    pub fn logical_key(&self) -> String {
        match self.query.as_deref() {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }
}

/// Output of a producer for one negotiated variant.
#[derive(Debug, Clone)]
pub struct Produced {
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Coding `body` is already in.
    pub encoding: EncodingType,
    pub groups: Vec<String>,
    /// Zero means the result is served but not stored.
    pub ttl: Duration,
}

impl Produced {
    pub fn new(body: impl Into<Bytes>, ttl: Duration) -> Self {
        Self {
            headers: Vec::new(),
            body: body.into(),
            encoding: EncodingType::Identity,
            groups: Vec::new(),
            ttl,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingType) -> Self {
        self.encoding = encoding;
        self
    }
}

#[derive(Debug, Error)]
pub enum ProduceError {
    #[error("producer failed: {message}")]
    Failed { message: String },
}

impl ProduceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Computes a representation on a cache miss.
///
/// `variant` carries the negotiated content type, charset and language.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(
        &self,
        request: &RequestContext,
        variant: &CacheKey,
    ) -> Result<Produced, ProduceError>;
}
