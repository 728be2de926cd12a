use actix_web::{web, HttpResponse};
use std::collections::HashSet;
use validator::Validate;

use crate::models::{
    Card, CardsResponse, CountResponse, EventStateResponse, Gender, HealthResponse, JoinRequest,
    JoinResponse, MatchesResponse, MeResponse, MessageRequest, PartnerView, SignalRequest,
    SignalResponse,
};
use crate::routes::{ApiError, AppState, AuthenticatedParticipant};

/// Configure participant-facing routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/join", web::post().to(join))
        .route("/me", web::get().to(me))
        .route("/cards", web::get().to(cards))
        .route("/signal", web::post().to(send_signal))
        .route("/matches", web::get().to(matches))
        .route("/event-state", web::get().to(event_state))
        .route("/message-count", web::get().to(message_count))
        .route("/message", web::post().to(send_message));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let healthy = state.store.health_check().await.unwrap_or(false);

    let status = if healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Join an event
///
/// POST /api/v1/join
///
/// Request body:
/// ```json
/// { "code": "string", "nickname": "string", "gender": "M|F", "pin": "1234" }
/// ```
async fn join(
    state: web::Data<AppState>,
    req: web::Json<JoinRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner().normalized();
    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for join request: {}", errors);
        return Err(ApiError::bad_request(errors.to_string()));
    }
    let gender = Gender::from_code(&req.gender)
        .ok_or_else(|| ApiError::bad_request("gender must be M or F"))?;

    let (event, participant) = state
        .registrar
        .join(&req.code, &req.nickname, gender, &req.pin)
        .await?;
    let token = state
        .tokens
        .issue(participant.id, event.id)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(JoinResponse {
        id: participant.id,
        token,
    }))
}

/// The caller's own state plus their most recent match partner
async fn me(
    state: web::Data<AppState>,
    auth: AuthenticatedParticipant,
) -> Result<HttpResponse, ApiError> {
    let (event, me) = auth.load(&state).await?;
    let sent_count = state.store.count_sent_signals(event.id, me.id).await?;

    let partner = match state.store.matches_for(event.id, me.id).await?.first() {
        Some(latest) => {
            let partner_id = latest.pair().partner_of(me.id);
            match partner_id {
                Some(id) => state.store.find_participant(event.id, id).await?,
                None => None,
            }
        }
        None => None,
    };

    Ok(HttpResponse::Ok().json(MeResponse {
        id: me.id,
        event_id: event.id,
        event_code: event.code,
        event_status: event.status,
        nickname: me.nickname,
        gender: me.gender,
        received_count: me.received_count,
        sent_count,
        partner: partner.map(|p| PartnerView {
            id: p.id,
            nickname: p.nickname,
        }),
    }))
}

/// Opposite-gender participants, flagged with whether the caller signalled them
async fn cards(
    state: web::Data<AppState>,
    auth: AuthenticatedParticipant,
) -> Result<HttpResponse, ApiError> {
    let (event, me) = auth.load(&state).await?;
    let sent_to: HashSet<i64> = state
        .store
        .signal_targets(event.id, me.id)
        .await?
        .into_iter()
        .collect();

    let opposite = me.gender.opposite();
    let cards = state
        .store
        .list_participants(event.id)
        .await?
        .into_iter()
        .map(|row| row.participant)
        .filter(|p| p.gender == opposite && p.id != me.id)
        .map(|p| Card {
            sent: sent_to.contains(&p.id),
            id: p.id,
            nickname: p.nickname,
        })
        .collect();

    Ok(HttpResponse::Ok().json(CardsResponse { cards }))
}

/// Send a signal
///
/// POST /api/v1/signal
///
/// Request body:
/// ```json
/// { "toId": 42 }
/// ```
async fn send_signal(
    state: web::Data<AppState>,
    auth: AuthenticatedParticipant,
    req: web::Json<SignalRequest>,
) -> Result<HttpResponse, ApiError> {
    let receipt = state
        .engine
        .submit_signal(auth.event_id, auth.participant_id, req.to_id)
        .await?;

    Ok(HttpResponse::Created().json(SignalResponse {
        ok: true,
        matched: receipt.match_state.is_matched(),
    }))
}

/// Every partner the caller matched with, by nickname
async fn matches(
    state: web::Data<AppState>,
    auth: AuthenticatedParticipant,
) -> Result<HttpResponse, ApiError> {
    let (event, me) = auth.load(&state).await?;
    let partner_ids: HashSet<i64> = state
        .store
        .matches_for(event.id, me.id)
        .await?
        .iter()
        .filter_map(|m| m.pair().partner_of(me.id))
        .collect();

    let matches = state
        .store
        .list_participants(event.id)
        .await?
        .into_iter()
        .map(|row| row.participant)
        .filter(|p| partner_ids.contains(&p.id))
        .map(|p| PartnerView {
            id: p.id,
            nickname: p.nickname,
        })
        .collect();

    Ok(HttpResponse::Ok().json(MatchesResponse { matches }))
}

async fn event_state(
    state: web::Data<AppState>,
    auth: AuthenticatedParticipant,
) -> Result<HttpResponse, ApiError> {
    let message_open = state.engine.is_message_phase_open(auth.event_id).await?;
    Ok(HttpResponse::Ok().json(EventStateResponse { message_open }))
}

/// Number of messages addressed to the caller; contents stay with the host
async fn message_count(
    state: web::Data<AppState>,
    auth: AuthenticatedParticipant,
) -> Result<HttpResponse, ApiError> {
    let (event, me) = auth.load(&state).await?;
    let count = state.store.count_messages_to(event.id, me.id).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

/// Send the caller's single message
///
/// POST /api/v1/message
///
/// Request body:
/// ```json
/// { "toId": 42, "text": "string" }
/// ```
async fn send_message(
    state: web::Data<AppState>,
    auth: AuthenticatedParticipant,
    req: web::Json<MessageRequest>,
) -> Result<HttpResponse, ApiError> {
    state
        .engine
        .submit_message(auth.event_id, auth.participant_id, req.to_id, &req.text)
        .await?;

    Ok(HttpResponse::Created().json(serde_json::json!({ "ok": true })))
}
