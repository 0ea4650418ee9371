//! Thin Axum boundary over [`MemoryFacade`]. Route handlers
//! only translate between wire JSON and facade calls; every status-code
//! decision lives in `MemoryError`'s `IntoResponse` mapping below.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::MemoryError;
use crate::facade::MemoryFacade;
use crate::search::MetadataFilter;
use crate::store::{Message, MessageInput, OrderBy, Session, Summary};

const ZEP_VERSION_HEADER: &str = "X-Zep-Version";

pub fn router(facade: Arc<MemoryFacade>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", get(list_sessions).post(create_session))
        .route(
            "/sessions/{session_id}",
            get(get_session).patch(update_session),
        )
        .route(
            "/sessions/{session_id}/memory",
            get(get_memory).post(post_memory).delete(delete_memory),
        )
        .route("/sessions/{session_id}/search", post(search_memory))
        .with_state(facade)
        .layer(middleware::from_fn(add_version_header))
        .layer(TraceLayer::new_for_http())
}

async fn add_version_header(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(ZEP_VERSION_HEADER, HeaderValue::from_static(env!("CARGO_PKG_VERSION")));
    response
}

#[derive(Serialize)]
struct HealthResponse {
    now: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        now: Utc::now().timestamp_millis(),
    })
}

// --------------------------------------------------------------- sessions

#[derive(Deserialize)]
struct ListSessionsQuery {
    #[serde(default)]
    page: i64,
    #[serde(default = "default_page_size")]
    size: i64,
    #[serde(default)]
    order_by: Option<String>,
    #[serde(default)]
    asc: bool,
}

fn default_page_size() -> i64 {
    50
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<Session>,
    total: i64,
}

async fn list_sessions(
    State(facade): State<Arc<MemoryFacade>>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let order_by = match query.order_by.as_deref() {
        Some("updated_at") => OrderBy::UpdatedAt,
        Some("session_id") => OrderBy::SessionId,
        _ => OrderBy::CreatedAt,
    };

    let (sessions, total) = facade
        .store_list_sessions_ordered(query.page, query.size, order_by, query.asc)
        .await?;

    Ok(Json(ListSessionsResponse { sessions, total }))
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    session_id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

async fn create_session(
    State(facade): State<Arc<MemoryFacade>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = facade
        .create_session(body.session_id, body.user_id, body.metadata)
        .await?;
    Ok(Json(session))
}

async fn get_session(
    State(facade): State<Arc<MemoryFacade>>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    match facade.get_session(session_id).await? {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError(MemoryError::NotFound)),
    }
}

#[derive(Deserialize)]
struct UpdateSessionRequest {
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    privileged: bool,
}

async fn update_session(
    State(facade): State<Arc<MemoryFacade>>,
    Path(session_id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = facade
        .update_session(session_id, body.metadata, body.privileged)
        .await?;
    Ok(Json(session))
}

// ----------------------------------------------------------------- memory

#[derive(Deserialize)]
struct GetMemoryQuery {
    #[serde(default)]
    last_n: i64,
}

#[derive(Serialize)]
struct GetMemoryResponse {
    messages: Vec<Message>,
    summary: Option<Summary>,
}

async fn get_memory(
    State(facade): State<Arc<MemoryFacade>>,
    Path(session_id): Path<String>,
    Query(query): Query<GetMemoryQuery>,
) -> Result<Json<GetMemoryResponse>, ApiError> {
    let result = facade.get_memory(session_id, query.last_n).await?;
    Ok(Json(GetMemoryResponse {
        messages: result.messages,
        summary: result.summary,
    }))
}

#[derive(Deserialize)]
struct PostMemoryRequest {
    messages: Vec<MessageInput>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    privileged: bool,
}

async fn post_memory(
    State(facade): State<Arc<MemoryFacade>>,
    Path(session_id): Path<String>,
    Json(body): Json<PostMemoryRequest>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let saved = facade
        .post_memory(
            session_id,
            body.messages,
            body.metadata,
            body.user_id,
            body.privileged,
        )
        .await?;
    Ok(Json(saved))
}

async fn delete_memory(
    State(facade): State<Arc<MemoryFacade>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    facade.delete_memory(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SearchMemoryRequest {
    text: String,
    #[serde(default)]
    metadata_filter: Option<MetadataFilter>,
    #[serde(default = "default_search_limit")]
    limit: i64,
}

fn default_search_limit() -> i64 {
    10
}

#[derive(Serialize)]
struct SearchResultWire {
    message: Message,
    score: f32,
}

async fn search_memory(
    State(facade): State<Arc<MemoryFacade>>,
    Path(session_id): Path<String>,
    Json(body): Json<SearchMemoryRequest>,
) -> Result<Json<Vec<SearchResultWire>>, ApiError> {
    let results = facade
        .search_memory(session_id, body.text, body.metadata_filter, body.limit)
        .await?;

    Ok(Json(
        results
            .into_iter()
            .map(|r| SearchResultWire {
                message: r.message,
                score: r.score,
            })
            .collect(),
    ))
}

// ------------------------------------------------------------------- errors

/// Wraps [`MemoryError`] for the HTTP boundary, mapping each variant to the
/// status code it's surfaced as.
struct ApiError(MemoryError);

impl From<MemoryError> for ApiError {
    fn from(e: MemoryError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();

        let status = if MemoryError::is_deleted_message(&message) {
            StatusCode::BAD_REQUEST
        } else {
            match &self.0 {
                MemoryError::NotFound => StatusCode::NOT_FOUND,
                MemoryError::BadRequest(_) => StatusCode::BAD_REQUEST,
                MemoryError::SessionEnded => StatusCode::BAD_REQUEST,
                MemoryError::AlreadyExists => StatusCode::INTERNAL_SERVER_ERROR,
                MemoryError::LockAcquisitionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                MemoryError::StorageFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                MemoryError::UpstreamModelFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
