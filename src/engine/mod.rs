//! Serving: negotiate, look up, produce on miss, store and respond.

mod producer;
mod response;

use std::sync::Arc;
use std::time::Instant;

use axum::{http::StatusCode, response::Response};
use metrics::{counter, histogram};
use tracing::{debug, error, instrument, warn};

use crate::cache::{CacheBackend, CacheKey, CachedRepresentation, EncodingType, SUPPORTED_ENCODINGS};
use crate::negotiate::{ResourceRepresentations, negotiate_encoding};

pub use producer::{ProduceError, Produced, Producer, RequestContext};
pub use response::{CacheStatus, SERVER_NAME, VARY, X_CACHE};

use response::Representation;

const METRIC_HIT: &str = "repcache_hit_total";
const METRIC_MISS: &str = "repcache_miss_total";
const METRIC_NOT_ACCEPTABLE: &str = "repcache_not_acceptable_total";
const METRIC_PRODUCE_MS: &str = "repcache_produce_ms";

/// Negotiable variants of one resource, each with its producer.
pub type Resource = ResourceRepresentations<Arc<dyn Producer>>;

#[derive(Clone)]
pub struct RepresentationEngine {
    backend: Option<Arc<dyn CacheBackend>>,
    encodings: Arc<[EncodingType]>,
}

impl RepresentationEngine {
    /// `None` serves every request from the producer without storing.
    pub fn new(backend: Option<Arc<dyn CacheBackend>>) -> Self {
        Self {
            backend,
            encodings: Arc::from(&SUPPORTED_ENCODINGS[..]),
        }
    }

    /// Restrict the codings offered to clients.
    pub fn with_encodings(mut self, encodings: &[EncodingType]) -> Self {
        self.encodings = Arc::from(encodings);
        self
    }

    pub fn backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.backend.as_ref()
    }

    pub fn invalidate(&self, variant: &CacheKey) {
        if let Some(backend) = &self.backend {
            backend.delete_representation(variant);
        }
    }

    pub fn invalidate_group(&self, group: &str) {
        if let Some(backend) = &self.backend {
            debug!(group, "invalidating group");
            backend.delete_group(group);
        }
    }

    #[instrument(skip_all, fields(path = %request.path()))]
    pub async fn serve(&self, resource: &Resource, request: &RequestContext) -> Response {
        let Some(entry) = resource.negotiate(request.accept(), request.accept_language()) else {
            debug!(outcome = "not_acceptable", dimension = "content", "no representation matches");
            counter!(METRIC_NOT_ACCEPTABLE, "dimension" => "content").increment(1);
            return response::status(StatusCode::NOT_ACCEPTABLE);
        };
        let Ok(encoding) = negotiate_encoding(request.accept_encoding(), &self.encodings) else {
            debug!(outcome = "not_acceptable", dimension = "encoding", "no content coding acceptable");
            counter!(METRIC_NOT_ACCEPTABLE, "dimension" => "encoding").increment(1);
            return response::status(StatusCode::NOT_ACCEPTABLE);
        };

        let variant = CacheKey::new(
            request.logical_key(),
            entry.content_type(),
            entry.charset(),
            entry.language(),
        );

        if let Some(response) = self.serve_cached(&variant, encoding) {
            return response;
        }

        debug!(cache = "representation", outcome = "miss", key = %variant, "producing");
        counter!(METRIC_MISS).increment(1);
        self.produce(entry.handler().as_ref(), request, variant, encoding)
            .await
    }

    fn serve_cached(&self, variant: &CacheKey, encoding: EncodingType) -> Option<Response> {
        let backend = self.backend.as_ref()?;
        let rep = backend.load_representation(variant)?;
        let Some((body, reencoded)) = rep.get_body(encoding) else {
            warn!(key = %variant, coding = %encoding, "stored representation unusable; treating as miss");
            return None;
        };
        if reencoded {
            backend.store_representation(variant.clone(), Arc::clone(&rep));
        }

        debug!(cache = "representation", outcome = "hit", key = %variant, reencoded);
        counter!(METRIC_HIT).increment(1);
        Some(response::representation(Representation {
            variant,
            encoding,
            stored_headers: rep.headers(),
            body,
            max_age: Some(rep.time_to_live().as_secs()),
            status: CacheStatus::Hit,
        }))
    }

    async fn produce(
        &self,
        producer: &dyn Producer,
        request: &RequestContext,
        variant: CacheKey,
        encoding: EncodingType,
    ) -> Response {
        let started = Instant::now();
        let result = producer.produce(request, &variant).await;
        histogram!(METRIC_PRODUCE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let produced = match result {
            Ok(produced) => produced,
            Err(err) => {
                error!(key = %variant, error = %err, "producer failed");
                return response::status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let ttl = produced.ttl;
        let rep = CachedRepresentation::with_ttl(ttl)
            .with_groups(produced.groups)
            .with_headers(produced.headers)
            .with_body(produced.encoding, produced.body);
        let Some((body, _)) = rep.get_body(encoding) else {
            error!(
                key = %variant,
                from = %produced.encoding,
                to = %encoding,
                "produced body cannot be served in the negotiated coding"
            );
            return response::status(StatusCode::INTERNAL_SERVER_ERROR);
        };

        let rep = Arc::new(rep);
        let stored = match &self.backend {
            Some(backend) if !ttl.is_zero() => {
                backend.store_representation(variant.clone(), Arc::clone(&rep));
                true
            }
            _ => false,
        };

        response::representation(Representation {
            variant: &variant,
            encoding,
            stored_headers: rep.headers(),
            body,
            max_age: stored.then(|| ttl.as_secs()),
            status: CacheStatus::Miss,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use http_body_util::BodyExt;

    use super::*;
    use crate::cache::MapBackend;

    struct Counting {
        calls: AtomicUsize,
        ttl: Duration,
    }

    #[async_trait]
    impl Producer for Counting {
        async fn produce(
            &self,
            _request: &RequestContext,
            variant: &CacheKey,
        ) -> Result<Produced, ProduceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Produced::new(format!("hello in {}", variant.language()), self.ttl)
                .with_header("ETag", "\"1\"")
                .with_header("Server", "upstream")
                .with_group("greetings"))
        }
    }

    fn setup(ttl: Duration) -> (Arc<Counting>, Resource) {
        let producer = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            ttl,
        });
        let resource = Resource::new().with(
            &["text/plain; charset=utf-8"],
            &["en", "fr"],
            Arc::clone(&producer) as Arc<dyn Producer>,
        );
        (producer, resource)
    }

    async fn body_of(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn second_request_is_a_hit() {
        let engine = RepresentationEngine::new(Some(Arc::new(MapBackend::new())));
        let (producer, resource) = setup(Duration::from_secs(60));
        let request = RequestContext::new("/hello").with_accept_language("fr");

        let first = engine.serve(&resource, &request).await;
        assert_eq!(first.headers()[X_CACHE.as_str()], "MISS");
        assert_eq!(first.headers()["server"], SERVER_NAME);
        assert_eq!(first.headers()["etag"], "\"1\"");

        let second = engine.serve(&resource, &request).await;
        assert_eq!(second.headers()[X_CACHE.as_str()], "HIT");
        assert_eq!(second.headers()["content-language"], "fr");
        assert_eq!(second.headers()["server"], SERVER_NAME);
        assert_eq!(body_of(second).await, b"hello in fr");
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_never_stored() {
        let engine = RepresentationEngine::new(Some(Arc::new(MapBackend::new())));
        let (producer, resource) = setup(Duration::ZERO);
        let request = RequestContext::new("/hello");

        let response = engine.serve(&resource, &request).await;
        assert_eq!(response.headers()["cache-control"], "no-store");
        engine.serve(&resource, &request).await;
        assert_eq!(producer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn group_invalidation_forces_a_miss() {
        let engine = RepresentationEngine::new(Some(Arc::new(MapBackend::new())));
        let (producer, resource) = setup(Duration::from_secs(60));
        let request = RequestContext::new("/hello");

        engine.serve(&resource, &request).await;
        engine.invalidate_group("greetings");
        let response = engine.serve(&resource, &request).await;

        assert_eq!(response.headers()[X_CACHE.as_str()], "MISS");
        assert_eq!(producer.calls.load(Ordering::SeqCst), 2);
    }
}
