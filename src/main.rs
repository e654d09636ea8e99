use std::{process, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::Response,
    routing::{get, post},
};
use repcache::{
    cache::{CacheKey, Lifecycle, build_backend},
    config,
    engine::{ProduceError, Produced, Producer, RepresentationEngine, RequestContext, Resource},
    infra::{error::InfraError, telemetry},
};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const GREETING_TTL: Duration = Duration::from_secs(60);
const STATUS_TTL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::CheckConfig(_) => {
            println!("{settings:#?}");
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), InfraError> {
    let backend = build_backend(&settings.cache)?;
    let lifecycle = match &backend {
        Some(backend) => Lifecycle::for_backend(backend.as_ref()),
        None => Lifecycle::new(Vec::new()),
    };
    lifecycle.start().await?;

    info!(
        cache = settings.cache.kind.as_str(),
        workers = lifecycle.len(),
        "representation cache ready"
    );

    let state = DemoState {
        engine: RepresentationEngine::new(backend),
        greeting: Arc::new(greeting_resource()),
        status: Arc::new(status_resource()),
    };
    let result = serve_http(&settings, state).await;

    if tokio::time::timeout(settings.server.graceful_shutdown, lifecycle.stop())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "cache workers did not stop before the shutdown deadline"
        );
    }

    result
}

async fn serve_http(settings: &config::Settings, state: DemoState) -> Result<(), InfraError> {
    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(addr = %settings.server.addr, "listening");

    axum::serve(listener, build_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[derive(Clone)]
struct DemoState {
    engine: RepresentationEngine,
    greeting: Arc<Resource>,
    status: Arc<Resource>,
}

fn build_router(state: DemoState) -> Router {
    Router::new()
        .route("/greeting", get(greeting))
        .route("/status", get(status))
        .route("/purge/{group}", post(purge))
        .with_state(state)
}

async fn greeting(State(state): State<DemoState>, uri: Uri, headers: HeaderMap) -> Response {
    let request = RequestContext::from_http(&uri, &headers);
    state.engine.serve(&state.greeting, &request).await
}

async fn status(State(state): State<DemoState>, uri: Uri, headers: HeaderMap) -> Response {
    let request = RequestContext::from_http(&uri, &headers);
    state.engine.serve(&state.status, &request).await
}

async fn purge(State(state): State<DemoState>, Path(group): Path<String>) -> StatusCode {
    state.engine.invalidate_group(&group);
    StatusCode::NO_CONTENT
}

fn greeting_resource() -> Resource {
    Resource::new().with(
        &["text/html; charset=utf-8", "text/plain; charset=utf-8"],
        &["en", "fr"],
        Arc::new(GreetingProducer),
    )
}

fn status_resource() -> Resource {
    Resource::new().with(&["application/json"], &[], Arc::new(StatusProducer))
}

struct GreetingProducer;

#[async_trait]
impl Producer for GreetingProducer {
    async fn produce(
        &self,
        _request: &RequestContext,
        variant: &CacheKey,
    ) -> Result<Produced, ProduceError> {
        let text = match variant.language() {
            "fr" => "Bonjour",
            _ => "Hello",
        };
        let body = if variant.content_type().eq_ignore_ascii_case("text/html") {
            format!("<!doctype html><p>{text}</p>\n")
        } else {
            format!("{text}\n")
        };

        Ok(Produced::new(body, GREETING_TTL)
            .with_header("ETag", format!("\"{}\"", variant.language()))
            .with_group("greetings"))
    }
}

struct StatusProducer;

#[async_trait]
impl Producer for StatusProducer {
    async fn produce(
        &self,
        request: &RequestContext,
        _variant: &CacheKey,
    ) -> Result<Produced, ProduceError> {
        let body = serde_json::to_vec(&json!({
            "path": request.path(),
            "generated_at": OffsetDateTime::now_utc().unix_timestamp(),
        }))
        .map_err(|err| ProduceError::failed(err.to_string()))?;

        Ok(Produced::new(body, STATUS_TTL).with_group("status"))
    }
}
