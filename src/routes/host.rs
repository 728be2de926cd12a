use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use validator::Validate;

use crate::core::{phase, Rejection};
use crate::models::{
    CreateEventRequest, Event, EventCodeQuery, Gender, MessagesResponse, ParticipantStats, SnapshotResponse,
};
use crate::routes::{require_host, ApiError, AppState};

/// Configure host dashboard routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/host")
            .route("/events", web::post().to(create_event))
            .route("/snapshot", web::get().to(snapshot))
            .route("/messages", web::get().to(messages))
            .route("/events/{code}/toggle-status", web::post().to(toggle_status))
            .route("/events/{code}/message-phase/open", web::post().to(open_message_phase))
            .route("/events/{code}/message-phase/close", web::post().to(close_message_phase)),
    );
}

async fn event_by_code(state: &AppState, code: &str) -> Result<Event, ApiError> {
    state
        .store
        .find_event(code.trim())
        .await?
        .ok_or_else(|| Rejection::EventNotFound.into())
}

async fn create_event(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    req: web::Json<CreateEventRequest>,
) -> Result<HttpResponse, ApiError> {
    require_host(&state, &http_req, None)?;
    let req = req.into_inner().normalized();
    if let Err(errors) = req.validate() {
        return Err(ApiError::bad_request(errors.to_string()));
    }

    let event = state.registrar.create_event(&req.code).await?;
    Ok(HttpResponse::Created().json(event))
}

/// Dashboard snapshot
///
/// GET /api/v1/host/snapshot?code={code}
async fn snapshot(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    query: web::Query<EventCodeQuery>,
) -> Result<HttpResponse, ApiError> {
    require_host(&state, &http_req, query.key.as_deref())?;
    let event = event_by_code(&state, &query.code).await?;

    let stats = state.store.event_stats(event.id).await?;
    let (males, females): (Vec<ParticipantStats>, Vec<ParticipantStats>) = state
        .store
        .list_participants(event.id)
        .await?
        .into_iter()
        .partition(|row| row.participant.gender == Gender::Male);

    let message_open = phase::is_open(&event, Utc::now(), state.engine.config().message_window);

    Ok(HttpResponse::Ok().json(SnapshotResponse {
        event,
        message_open,
        stats,
        males,
        females,
    }))
}

/// Every message sent in the event, oldest first
///
/// GET /api/v1/host/messages?code={code}
async fn messages(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    query: web::Query<EventCodeQuery>,
) -> Result<HttpResponse, ApiError> {
    require_host(&state, &http_req, query.key.as_deref())?;
    let event = event_by_code(&state, &query.code).await?;

    let messages = state.store.list_messages(event.id).await?;
    Ok(HttpResponse::Ok().json(MessagesResponse { messages }))
}

async fn toggle_status(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    code: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    require_host(&state, &http_req, None)?;
    let event = event_by_code(&state, &code).await?;

    let updated = state
        .store
        .set_event_status(event.id, event.status.toggled())
        .await?
        .ok_or(Rejection::EventNotFound)?;

    tracing::info!("Event {} status set to {:?}", updated.code, updated.status);
    Ok(HttpResponse::Ok().json(updated))
}

/// Open the message window, starting the countdown now
async fn open_message_phase(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    code: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    require_host(&state, &http_req, None)?;
    let event = event_by_code(&state, &code).await?;

    let updated = state
        .store
        .set_message_phase(event.id, true, Some(Utc::now()))
        .await?
        .ok_or(Rejection::EventNotFound)?;

    tracing::info!(
        "Message phase opened for event {} until {:?}",
        updated.code,
        phase::closes_at(&updated, state.engine.config().message_window)
    );
    Ok(HttpResponse::Ok().json(updated))
}

async fn close_message_phase(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    code: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    require_host(&state, &http_req, None)?;
    let event = event_by_code(&state, &code).await?;

    let updated = state
        .store
        .set_message_phase(event.id, false, None)
        .await?
        .ok_or(Rejection::EventNotFound)?;

    tracing::info!("Message phase closed for event {}", updated.code);
    Ok(HttpResponse::Ok().json(updated))
}
