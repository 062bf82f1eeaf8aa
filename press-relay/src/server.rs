use crate::hub::BroadcastHub;
use crate::types::{PersistedEvent, RelayError};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{future, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

static LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_topics))
        .route("/health", get(health))
        .route("/{topic}", get(stream_topic))
        .route("/{topic}/", get(stream_topic))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn list_topics(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.hub.topics().await)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /{topic}/`: the topic as an event stream, resumable via
/// `Last-Event-ID`.
async fn stream_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let cursor = parse_cursor(&headers)?;
    let subscription = state.hub.subscribe(&topic, cursor).await?;
    let subscriber = subscription.id();

    let events = subscription
        .into_stream()
        .take_until(state.shutdown.cancelled_owned());
    let stream = sse_events(events, subscriber);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Absent or blank means live-only; any integer (0 included) resumes after it.
fn parse_cursor(headers: &HeaderMap) -> Result<Option<i64>, ApiError> {
    let Some(value) = headers.get(&LAST_EVENT_ID) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadCursor("non-ASCII header".to_string()))?
        .trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ApiError::BadCursor(value.to_string()))
}

/// Frames for `events`, ending at the first delivery or encoding failure so
/// the client reconnects with its last id instead of missing an event.
fn sse_events<S>(events: S, subscriber: Uuid) -> impl Stream<Item = Result<Event, Infallible>> + Send
where
    S: Stream<Item = Result<PersistedEvent, RelayError>> + Send,
{
    events
        .map(|result| result.and_then(|event| to_sse_event(&event)))
        .take_while(move |result| {
            if let Err(e) = result {
                warn!("Closing stream for subscriber {}: {}", subscriber, e);
            }
            future::ready(result.is_ok())
        })
        .filter_map(|result| future::ready(result.ok().map(Ok)))
}

fn to_sse_event(event: &PersistedEvent) -> Result<Event, RelayError> {
    Event::default()
        .id(event.id.to_string())
        .event("item")
        .json_data(&event.item)
        .map_err(|e| RelayError::Parse(format!("event {} could not be encoded: {}", event.id, e)))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unknown topic: {0}")]
    NotFound(String),

    #[error("Invalid Last-Event-ID: {0}")]
    BadCursor(String),

    #[error(transparent)]
    Internal(RelayError),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::UnknownTopic(topic) => ApiError::NotFound(topic),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadCursor(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(e) => {
                warn!("Stream request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
