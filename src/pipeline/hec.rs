//! Splunk-compatible HTTP Event Collector.
//!
//! `POST /services/collector/event` accepts the standard JSON envelope
//! and `POST /services/collector/raw` accepts the body as the message.
//! Authentication: `Authorization: Splunk <token>`, `?token=<token>`,
//! or `Authorization: Bearer <token>` validated against the token
//! store. Success returns `{"text":"Success","code":"0"}`; failures
//! map to 401 (auth) and 400 (malformed body).

use crate::model::Event;
use crate::pipeline::IngestionPipeline;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use chrono::DateTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Validates bearer tokens against an external identity collaborator
/// (the metadata store's api_tokens table in the default wiring).
pub trait TokenValidator: Send + Sync {
    /// Is this bearer token currently valid?
    fn validate(&self, token: &str) -> bool;
}

/// Shared state for the collector handlers.
#[derive(Clone)]
pub struct HecState {
    pipeline: Arc<IngestionPipeline>,
    token: String,
    validator: Option<Arc<dyn TokenValidator>>,
}

impl HecState {
    /// New collector state. An empty static token disables the
    /// `Splunk`/`?token=` paths; bearer tokens still work when a
    /// validator is present.
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        token: String,
        validator: Option<Arc<dyn TokenValidator>>,
    ) -> Self {
        Self {
            pipeline,
            token,
            validator,
        }
    }
}

/// The collector's axum router.
pub fn router(state: HecState) -> Router {
    Router::new()
        .route("/services/collector/event", post(handle_event))
        .route("/services/collector/raw", post(handle_raw))
        .with_state(state)
}

/// Bind the listener; a bind failure is a startup failure.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP event collector listening");
    Ok(listener)
}

/// Serve until the shutdown signal fires.
pub async fn serve(listener: TcpListener, state: HecState, mut shutdown: watch::Receiver<bool>) {
    let app = router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, "HTTP event collector terminated");
    }
}

#[derive(Debug, Deserialize)]
struct HecEnvelope {
    event: serde_json::Value,
    #[serde(default)]
    source: String,
    #[serde(default)]
    sourcetype: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    #[allow(dead_code)] // accepted for wire compatibility, routing is single-index
    index: Option<String>,
}

fn success_body() -> Json<serde_json::Value> {
    Json(serde_json::json!({"text": "Success", "code": "0"}))
}

/// Check the three accepted credential forms, in order.
fn authorized(state: &HecState, headers: &HeaderMap, query: &HashMap<String, String>) -> bool {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.token.is_empty() {
        if auth == format!("Splunk {}", state.token) {
            return true;
        }
        if query.get("token").map(String::as_str) == Some(state.token.as_str()) {
            return true;
        }
    }
    if let Some(bearer) = auth.strip_prefix("Bearer ") {
        if let Some(validator) = &state.validator {
            return validator.validate(bearer);
        }
    }
    false
}

async fn handle_event(
    State(state): State<HecState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    if !authorized(&state, &headers, &query) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    let envelope: HecEnvelope = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(_) => return (StatusCode::BAD_REQUEST, "Bad request").into_response(),
    };

    let message = match &envelope.event {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut ev = Event::new(
        if envelope.source.is_empty() {
            "hec".to_string()
        } else {
            envelope.source
        },
        envelope.host,
        message,
    );
    ev.category = envelope.sourcetype;
    if let Some(secs) = envelope.time {
        if secs > 0.0 {
            let nanos = (secs * 1e9) as i64;
            ev.timestamp = DateTime::from_timestamp(
                nanos.div_euclid(1_000_000_000),
                nanos.rem_euclid(1_000_000_000) as u32,
            )
            .unwrap_or(ev.timestamp);
        }
    }
    state.pipeline.ingest(ev);
    success_body().into_response()
}

async fn handle_raw(
    State(state): State<HecState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    if !authorized(&state, &headers, &query) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    let host = query.get("host").cloned().unwrap_or_default();
    let source = query
        .get("source")
        .cloned()
        .unwrap_or_else(|| "hec".to_string());

    let ev = Event::new(source, host, body);
    state.pipeline.ingest(ev);
    success_body().into_response()
}
