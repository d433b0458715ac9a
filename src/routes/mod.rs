//! API routes

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;

use crate::conversation::{Conversation, ConversationSummary};
use crate::core::{ChatError, ChatReply, ChatRequest, StoreError};
use crate::AppState;

const UPSTREAM_ERROR: &str = "Service indisponible";
const UPSTREAM_MESSAGE: &str =
    "L'IA ne répond pas pour le moment. Vérifiez votre clé API ou quota.";

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: &'static str,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
}

/// Which route produced an error; the wording of the JSON body depends on it
#[derive(Debug, Clone, Copy)]
pub enum Endpoint {
    Send,
    Read,
    History,
}

/// A failed request, rendered as `{ "error": ..., "message"?: ... }`
#[derive(Debug)]
pub enum ApiError {
    Chat { endpoint: Endpoint, source: ChatError },
    /// Body that could not be read as a chat request
    InvalidBody(JsonRejection),
}

impl ApiError {
    fn on(endpoint: Endpoint) -> impl FnOnce(ChatError) -> Self {
        move |source| Self::Chat { endpoint, source }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (source, endpoint) = match self {
            Self::Chat { endpoint, source } => (source, endpoint),
            Self::InvalidBody(rejection) => {
                tracing::debug!(error = %rejection.body_text(), "Rejected chat request body");
                let body = json!({
                    "error": "Invalid request body",
                    "message": rejection.body_text(),
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
        };

        let (status, body) = match (&source, endpoint) {
            (ChatError::EmptyMessage, _) => {
                (StatusCode::BAD_REQUEST, json!({ "error": "No message" }))
            }
            (ChatError::NotFound(_), Endpoint::Send) => {
                (StatusCode::NOT_FOUND, json!({ "error": "Chat not found" }))
            }
            (ChatError::NotFound(_), _) => {
                (StatusCode::NOT_FOUND, json!({ "error": "Not found" }))
            }
            (ChatError::Storage(StoreError::Unavailable), Endpoint::Read | Endpoint::History) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "Storage unavailable" }),
            ),
            (ChatError::Upstream(_), _) | (_, Endpoint::Send) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": UPSTREAM_ERROR, "message": UPSTREAM_MESSAGE }),
            ),
            (ChatError::Storage(_), Endpoint::History) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Failed to fetch history" }),
            ),
            (ChatError::Storage(_), Endpoint::Read) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Failed" }))
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %source, status = status.as_u16(), "Request failed");
        }

        (status, Json(body)).into_response()
    }
}

async fn root() -> &'static str {
    "AgroVision API is running..."
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: if state.session.storage_available() {
            "connected"
        } else {
            "offline"
        },
    })
}

async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload?;
    tracing::debug!(
        conversation_id = request.conversation_id.as_deref().unwrap_or("<new>"),
        "Incoming chat message"
    );

    let reply = state
        .session
        .send(request)
        .await
        .map_err(ApiError::on(Endpoint::Send))?;

    Ok(Json(reply))
}

async fn history(State(state): State<AppState>) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let summaries = state
        .session
        .history()
        .await
        .map_err(ApiError::on(Endpoint::History))?;

    Ok(Json(summaries))
}

async fn models(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let models = state
        .session
        .models()
        .await
        .map_err(ApiError::on(Endpoint::Read))?;

    Ok(Json(models))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .session
        .conversation(&id)
        .await
        .map_err(ApiError::on(Endpoint::Read))?;

    Ok(Json(conversation))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state
        .session
        .delete(&id)
        .await
        .map_err(ApiError::on(Endpoint::Read))?;

    tracing::info!(conversation_id = %id, "Deleted conversation");
    Ok(Json(DeleteResponse { success: true }))
}

pub fn router() -> Router<AppState> {
    let chat = Router::new()
        .route("/", post(send_message))
        .route("/history", get(history))
        .route("/models", get(models))
        .route("/:id", get(get_conversation).delete(delete_conversation));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/chat", chat)
}
