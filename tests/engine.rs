use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, Uri, header},
    response::Response,
    routing::get,
};
use http_body_util::BodyExt;
use repcache::cache::{CacheBackend, CacheKey, EncodingType, MapBackend};
use repcache::engine::{
    ProduceError, Produced, Producer, RepresentationEngine, RequestContext, Resource, VARY,
};
use tower::ServiceExt;

const PAGE: &str = "<p>a page that is long enough to be worth compressing, compressing, compressing</p>";

struct Page {
    calls: AtomicUsize,
    fail: bool,
}

impl Page {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Producer for Page {
    async fn produce(
        &self,
        request: &RequestContext,
        _variant: &CacheKey,
    ) -> Result<Produced, ProduceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProduceError::failed("upstream unavailable"));
        }
        Ok(Produced::new(PAGE, Duration::from_secs(120))
            .with_header("X-Generated-For", request.path())
            .with_header("Content-Length", "1")
            .with_group("pages"))
    }
}

#[derive(Clone)]
struct TestState {
    engine: RepresentationEngine,
    resource: Arc<Resource>,
}

async fn page(State(state): State<TestState>, uri: Uri, headers: HeaderMap) -> Response {
    let request = RequestContext::from_http(&uri, &headers);
    state.engine.serve(&state.resource, &request).await
}

fn router(backend: Option<Arc<dyn CacheBackend>>, producer: Arc<Page>) -> Router {
    let resource = Resource::new().with(
        &["text/html; charset=utf-8"],
        &["en"],
        producer as Arc<dyn Producer>,
    );
    Router::new().route("/page", get(page)).with_state(TestState {
        engine: RepresentationEngine::new(backend),
        resource: Arc::new(resource),
    })
}

async fn send(app: &Router, headers: &[(header::HeaderName, &str)]) -> Response {
    let mut builder = Request::builder().uri("/page");
    for (name, value) in headers {
        builder = builder.header(name, *value);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).expect("request should build"))
        .await
        .expect("router should respond")
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

fn page_key() -> CacheKey {
    CacheKey::new("/page", "text/html", "utf-8", "en")
}

#[tokio::test]
async fn miss_then_hit_with_regenerated_headers() {
    let producer = Page::new();
    let app = router(Some(Arc::new(MapBackend::new())), Arc::clone(&producer));

    let first = send(&app, &[]).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache"], "MISS");
    assert_eq!(first.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(first.headers()[header::CONTENT_LANGUAGE], "en");
    assert_eq!(first.headers()[header::VARY], VARY);
    assert_eq!(first.headers()[header::CACHE_CONTROL], "max-age=120");
    assert!(first.headers().get(header::CONTENT_ENCODING).is_none());
    assert_eq!(first.headers()["x-generated-for"], "/page");
    assert_eq!(body_of(first).await, PAGE.as_bytes());

    let second = send(&app, &[]).await;
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(second.headers()[header::SERVER], "repcache");
    assert_eq!(body_of(second).await, PAGE.as_bytes());
    assert_eq!(producer.calls(), 1);
}

#[tokio::test]
async fn stored_transport_headers_are_not_replayed() {
    let app = router(Some(Arc::new(MapBackend::new())), Page::new());
    send(&app, &[]).await;

    let hit = send(&app, &[]).await;
    let lengths: Vec<_> = hit.headers().get_all(header::CONTENT_LENGTH).iter().collect();
    assert!(lengths.iter().all(|value| *value != "1"));
}

#[tokio::test]
async fn reencoded_body_is_persisted() {
    let backend = Arc::new(MapBackend::new());
    let producer = Page::new();
    let app = router(
        Some(Arc::clone(&backend) as Arc<dyn CacheBackend>),
        Arc::clone(&producer),
    );

    send(&app, &[]).await;
    let stored = backend.load_representation(&page_key()).expect("stored");
    assert_eq!(stored.encodings(), vec![EncodingType::Identity]);

    let compressed = send(&app, &[(header::ACCEPT_ENCODING, "br")]).await;
    assert_eq!(compressed.headers()["x-cache"], "HIT");
    assert_eq!(compressed.headers()[header::CONTENT_ENCODING], "br");
    let body = body_of(compressed).await;
    let decoded = EncodingType::Brotli.decode_to_vec(&body).expect("brotli body");
    assert_eq!(decoded, PAGE.as_bytes());

    let stored = backend.load_representation(&page_key()).expect("stored");
    assert!(stored.encodings().contains(&EncodingType::Brotli));
    assert_eq!(producer.calls(), 1);
}

#[tokio::test]
async fn gzip_miss_serves_compressed_body() {
    let app = router(Some(Arc::new(MapBackend::new())), Page::new());

    let response = send(&app, &[(header::ACCEPT_ENCODING, "gzip")]).await;
    assert_eq!(response.headers()["x-cache"], "MISS");
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    let decoded = EncodingType::GZip
        .decode_to_vec(&body_of(response).await)
        .expect("gzip body");
    assert_eq!(decoded, PAGE.as_bytes());
}

#[tokio::test]
async fn refused_content_type_is_not_acceptable() {
    let producer = Page::new();
    let app = router(Some(Arc::new(MapBackend::new())), Arc::clone(&producer));

    let response = send(&app, &[(header::ACCEPT, "application/json, text/html;q=0")]).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(response.headers()[header::VARY], VARY);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(producer.calls(), 0);
}

#[tokio::test]
async fn refused_identity_is_not_acceptable() {
    let producer = Page::new();
    let app = router(Some(Arc::new(MapBackend::new())), Arc::clone(&producer));

    let response = send(&app, &[(header::ACCEPT_ENCODING, "identity;q=0, *;q=0")]).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(producer.calls(), 0);
}

#[tokio::test]
async fn producer_failure_is_a_server_error_and_not_stored() {
    let producer = Page::failing();
    let app = router(Some(Arc::new(MapBackend::new())), Arc::clone(&producer));

    let first = send(&app, &[]).await;
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(first.headers()[header::CACHE_CONTROL], "no-store");

    send(&app, &[]).await;
    assert_eq!(producer.calls(), 2);
}

#[tokio::test]
async fn without_a_backend_every_request_is_produced() {
    let producer = Page::new();
    let app = router(None, Arc::clone(&producer));

    let first = send(&app, &[]).await;
    assert_eq!(first.headers()[header::CACHE_CONTROL], "no-store");
    let second = send(&app, &[]).await;
    assert_eq!(second.headers()["x-cache"], "MISS");
    assert_eq!(producer.calls(), 2);
}

#[tokio::test]
async fn group_invalidation_through_the_engine() {
    let backend = Arc::new(MapBackend::new());
    let producer = Page::new();
    let engine = RepresentationEngine::new(Some(Arc::clone(&backend) as Arc<dyn CacheBackend>));
    let resource = Resource::new().with(
        &["text/html; charset=utf-8"],
        &["en"],
        Arc::clone(&producer) as Arc<dyn Producer>,
    );
    let request = RequestContext::new("/page");

    engine.serve(&resource, &request).await;
    assert_eq!(backend.group_len("pages"), 1);

    engine.invalidate_group("pages");
    assert!(backend.is_empty());

    let response = engine.serve(&resource, &request).await;
    assert_eq!(response.headers()["x-cache"], "MISS");
    assert_eq!(producer.calls(), 2);
}
