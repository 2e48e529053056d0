use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use digger_core::{DiggerConfig, Observation, RecordedOperation, SchemaDigger};
use digger_types::{OriginSchema, Registry, TrafficEvent};

#[derive(Clone)]
struct AppState {
    digger: Arc<SchemaDigger>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    operations: Vec<RecordedOperation>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,digger_store=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cfg = DiggerConfig::from_env()?;
    info!(
        strategy = %cfg.extraction,
        methods = ?cfg.classifier.methods,
        "starting schema digger"
    );

    let state = AppState {
        digger: Arc::new(SchemaDigger::from_config(&cfg)),
    };

    let addr: SocketAddr = cfg.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("schema digger listening on {addr}");
    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/events", post(ingest))
        .route("/v1/origins", get(origins))
        .route("/v1/schema", get(registry).delete(reset_all))
        .route("/v1/schema/:origin", get(schema).delete(reset_origin))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ingest(State(state): State<AppState>, Json(event): Json<TrafficEvent>) -> Json<EventResponse> {
    let resp = match state.digger.observe(&event) {
        Observation::Recorded { origin, operations } => EventResponse {
            recorded: true,
            origin: Some(origin),
            operations,
        },
        Observation::Ignored => EventResponse {
            recorded: false,
            origin: None,
            operations: Vec::new(),
        },
    };
    Json(resp)
}

async fn origins(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.digger.list_origins())
}

async fn registry(State(state): State<AppState>) -> Json<Registry> {
    Json(state.digger.registry())
}

async fn schema(State(state): State<AppState>, Path(origin): Path<String>) -> Json<OriginSchema> {
    Json(state.digger.get_schema(&origin))
}

async fn reset_all(State(state): State<AppState>) -> StatusCode {
    state.digger.reset(None);
    StatusCode::NO_CONTENT
}

async fn reset_origin(State(state): State<AppState>, Path(origin): Path<String>) -> StatusCode {
    state.digger.reset(Some(&origin));
    StatusCode::NO_CONTENT
}

async fn healthz() -> &'static str {
    "ok"
}
