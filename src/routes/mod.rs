// Route exports
pub mod host;
pub mod participant;
pub mod stream;

use actix_web::{dev::Payload, error, http::header, http::StatusCode, web, FromRequest, HttpRequest, HttpResponse};
use serde::Serialize;
use std::future::{ready, Ready};
use std::sync::Arc;
use thiserror::Error;

use crate::core::{EngineConfig, EngineError, MatchingEngine, Registrar, Rejection};
use crate::models::{Event, Participant};
use crate::services::{bearer_token, AuthError, BroadcastNotifier, Store, StoreError, TokenIssuer};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: MatchingEngine,
    pub registrar: Registrar,
    pub store: Arc<dyn Store>,
    pub hub: Arc<BroadcastNotifier>,
    pub tokens: Arc<TokenIssuer>,
    pub host_key: Arc<str>,
}

impl AppState {
    /// Wire the engine, registrar and hub around one store
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<BroadcastNotifier>,
        tokens: TokenIssuer,
        host_key: &str,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine: MatchingEngine::new(store.clone(), hub.clone(), config),
            registrar: Registrar::new(store.clone()),
            store,
            hub,
            tokens: Arc::new(tokens),
            host_key: Arc::from(host_key),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(participant::configure)
            .configure(host::configure)
            .configure(stream::configure),
    );
}

/// JSON error body returned by every handler
#[derive(Debug, Clone, Serialize, Error)]
#[error("{error}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl ApiError {
    pub fn new(error: &str, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            status_code,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("INVALID_REQUEST", message, 400)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHENTICATED", message, 401)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message, 500)
    }
}

impl error::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self)
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        ApiError::new(rejection.code(), rejection.to_string(), rejection.status_code())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(rejection) => rejection.into(),
            EngineError::StorageFailure(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Storage failure: {}", err);
        ApiError::new("STORAGE_FAILURE", "Storage failure", 500)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        tracing::debug!("Authentication failed: {}", err);
        ApiError::unauthorized(err.to_string())
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    ApiError::new("INVALID_JSON", format!("Invalid JSON: {}", err), 400).into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(err: error::QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::new("INVALID_QUERY", format!("Invalid query: {}", err), 400).into()
}

/// Identity carried by a valid participant bearer token
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedParticipant {
    pub participant_id: i64,
    pub event_id: i64,
}

impl AuthenticatedParticipant {
    pub fn from_token(state: &AppState, token: &str) -> Result<Self, ApiError> {
        let claims = state.tokens.verify(token)?;
        Ok(Self {
            participant_id: claims.sub,
            event_id: claims.evt,
        })
    }

    /// Load the caller's event and participant rows. A token for a participant
    /// that no longer exists is treated as unauthenticated.
    pub async fn load(&self, state: &AppState) -> Result<(Event, Participant), ApiError> {
        let participant = state
            .store
            .find_participant(self.event_id, self.participant_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Unknown participant"))?;
        let event = state
            .store
            .find_event_by_id(self.event_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Unknown event"))?;
        Ok((event, participant))
    }
}

impl FromRequest for AuthenticatedParticipant {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedParticipant, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::internal("Application state missing"))?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::Missing)?;

    AuthenticatedParticipant::from_token(state, token)
}

/// Check the shared host key from the `X-Host-Key` header or a query fallback
pub fn require_host(state: &AppState, req: &HttpRequest, query_key: Option<&str>) -> Result<(), ApiError> {
    let provided = req
        .headers()
        .get("X-Host-Key")
        .and_then(|value| value.to_str().ok())
        .or(query_key);

    match provided {
        Some(key) if key == &*state.host_key => Ok(()),
        Some(_) => Err(ApiError::new("FORBIDDEN", "Invalid host key", 403)),
        None => Err(ApiError::unauthorized("Host key required")),
    }
}
