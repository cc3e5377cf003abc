//! Call-control webhook handling.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use callbridge_telephony::{CallEvent, CallEventKind};

use crate::state::GatewayState;

pub async fn webhook_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let event = match CallEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Unparseable webhook body");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })));
        }
    };

    #[cfg(feature = "metrics")]
    crate::metrics::record_webhook(&event.event_type);

    // Control-plane failures are logged; the platform does not retry usefully.
    if let Err(e) = handle_call_event(&state, &event).await {
        warn!(event_type = %event.event_type, call_id = ?event.call_id, error = %e, "Webhook action failed");
    }
    (StatusCode::OK, Json(json!({ "received": true })))
}

/// Act on one lifecycle event.
pub async fn handle_call_event(state: &GatewayState, event: &CallEvent) -> anyhow::Result<()> {
    let Some(call_id) = event.call_id.as_deref() else {
        debug!(event_type = %event.event_type, "Webhook without call id");
        return Ok(());
    };
    let telephony = state.config.telephony();
    let control = &state.services.call_control;

    match &event.kind {
        CallEventKind::Answered => {
            info!(call_id, "Call answered");
            match telephony.greeting.as_deref().filter(|g| !g.trim().is_empty()) {
                Some(greeting) => {
                    control
                        .speak(
                            call_id,
                            greeting,
                            &telephony.greeting_voice,
                            &telephony.greeting_language,
                        )
                        .await?
                }
                None => start_streaming(state, call_id).await?,
            }
        }
        CallEventKind::SpeakEnded => {
            if state.registry.get(call_id).await.is_some() {
                debug!(call_id, "Speak ended on a streaming call");
            } else {
                start_streaming(state, call_id).await?;
            }
        }
        CallEventKind::PlaybackEnded => {
            let Some(playback_id) = event.playback_id() else {
                debug!(call_id, "Playback ended without a playback id");
                return Ok(());
            };
            match state.registry.get(call_id).await {
                Some(session) => {
                    session.playback_finished(&playback_id).await;
                }
                None => debug!(call_id, %playback_id, "Playback ended for unknown call"),
            }
        }
        CallEventKind::Hangup => info!(call_id, "Call hung up"),
        kind => debug!(call_id, ?kind, "Webhook event"),
    }
    Ok(())
}

async fn start_streaming(state: &GatewayState, call_id: &str) -> anyhow::Result<()> {
    let stream_url = format!("{}/media-stream", state.config.stream_url());
    let track = state.config.telephony().stream_track;
    info!(call_id, %stream_url, "Starting media stream");
    state
        .services
        .call_control
        .streaming_start(call_id, &stream_url, &track, None)
        .await
}
