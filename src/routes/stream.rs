use actix_web::{http::header, web, HttpRequest, HttpResponse};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::core::{Notification, Topic};
use crate::models::{EventCodeQuery, StreamQuery};
use crate::routes::{require_host, ApiError, AppState, AuthenticatedParticipant};
use crate::services::bearer_token;

/// Configure server-sent event streams
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/stream/participant", web::get().to(participant_stream))
        .route("/stream/host", web::get().to(host_stream));
}

/// Encode one notification as an SSE frame
pub fn sse_frame(notification: &Notification) -> Option<web::Bytes> {
    match serde_json::to_string(notification) {
        Ok(json) => Some(web::Bytes::from(format!("event: {}\ndata: {}\n\n", notification.kind(), json))),
        Err(e) => {
            tracing::warn!("Failed to encode {} notification: {}", notification.kind(), e);
            None
        }
    }
}

/// Comment frame sent on idle streams so proxies keep the connection open
const KEEP_ALIVE: &[u8] = b":\n\n";
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Turn a topic subscription into a byte stream of SSE frames, with a
/// keep-alive comment after every `period` of silence. Frames lost to lag are
/// skipped; the stream ends when the topic channel closes.
fn frames(
    rx: broadcast::Receiver<Notification>,
    topic: Topic,
    period: Duration,
) -> impl Stream<Item = Result<web::Bytes, Infallible>> {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    stream::unfold((rx, ticker), move |(mut rx, mut ticker)| async move {
        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Ok(notification) => {
                        if let Some(frame) = sse_frame(&notification) {
                            ticker.reset();
                            return Some((Ok(frame), (rx, ticker)));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscriber on {} lagged, skipped {} notifications", topic, skipped);
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = ticker.tick() => {
                    return Some((Ok(web::Bytes::from_static(KEEP_ALIVE)), (rx, ticker)));
                }
            }
        }
    })
}

fn sse_response(state: &AppState, topic: Topic) -> HttpResponse {
    let rx = state.hub.subscribe(topic);
    tracing::debug!("Stream opened on {}", topic);

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        // keeps the Compress middleware from buffering the stream
        .insert_header((header::CONTENT_ENCODING, "identity"))
        .streaming(frames(rx, topic, KEEP_ALIVE_INTERVAL))
}

/// Live notifications for the authenticated participant
///
/// GET /api/v1/stream/participant?token={token}
///
/// The token may also be sent as a bearer header.
async fn participant_stream(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<StreamQuery>,
) -> Result<HttpResponse, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .or(query.token.as_deref())
        .ok_or_else(|| ApiError::unauthorized("Missing credentials"))?;

    let auth = AuthenticatedParticipant::from_token(&state, token)?;
    let (_, me) = auth.load(&state).await?;

    Ok(sse_response(&state, Topic::Participant(me.id)))
}

/// Live match count for the host dashboard
///
/// GET /api/v1/stream/host?code={code}&key={hostKey}
async fn host_stream(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<EventCodeQuery>,
) -> Result<HttpResponse, ApiError> {
    require_host(&state, &req, query.key.as_deref())?;
    let event = state
        .store
        .find_event(query.code.trim())
        .await?
        .ok_or(crate::core::Rejection::EventNotFound)?;

    Ok(sse_response(&state, Topic::Host(event.id)))
}
