//! Media stream connection lifecycle.
//!
//! One WebSocket carries one call's audio. Events are handled in arrival
//! order on the connection task; the call session is created on `start` and
//! torn down on `stop`, on close, or when the socket fails.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use callbridge_core::protocol::StreamEvent;

use crate::session::CallSession;
use crate::state::GatewayState;

/// Event dispatch for one media stream, independent of the socket.
pub struct MediaStream {
    state: Arc<GatewayState>,
    conn_id: String,
    session: Option<CallSession>,
}

impl MediaStream {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self {
            state,
            conn_id: Uuid::new_v4().to_string(),
            session: None,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    /// Handle one text frame. Malformed events are logged and skipped.
    pub async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        match StreamEvent::parse(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "Skipping malformed stream event");
                #[cfg(feature = "metrics")]
                crate::metrics::record_error(e.kind());
                ControlFlow::Continue(())
            }
        }
    }

    pub async fn handle_event(&mut self, event: StreamEvent) -> ControlFlow<()> {
        match event {
            StreamEvent::Connected => {
                debug!(conn_id = %self.conn_id, "Stream connected");
            }
            StreamEvent::Start(start) => {
                if let Some(session) = &self.session {
                    warn!(
                        conn_id = %self.conn_id,
                        call_id = %session.call_id(),
                        ignored = %start.call_id,
                        "Duplicate start; ignored"
                    );
                    return ControlFlow::Continue(());
                }
                self.session = Some(CallSession::start(self.state.clone(), &start).await);
            }
            StreamEvent::Media { payload, track } => {
                if track.as_deref().is_some_and(|t| t != "inbound") {
                    return ControlFlow::Continue(());
                }
                let Some(session) = self.session.as_mut() else {
                    warn!(conn_id = %self.conn_id, "Media before start; dropped");
                    return ControlFlow::Continue(());
                };
                if let Err(e) = session.on_media(&payload) {
                    warn!(conn_id = %self.conn_id, call_id = %session.call_id(), error = %e, "Dropping media frame");
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_error(e.kind());
                }
            }
            StreamEvent::PlaybackEnded { playback_id } => {
                if let Some(session) = &self.session {
                    session.on_playback_ended(&playback_id).await;
                }
            }
            StreamEvent::Dtmf { digit } => {
                info!(conn_id = %self.conn_id, %digit, "DTMF received");
            }
            StreamEvent::Stop => {
                info!(conn_id = %self.conn_id, "Stream stopped");
                return ControlFlow::Break(());
            }
            StreamEvent::Unknown(name) => {
                debug!(conn_id = %self.conn_id, event = %name, "Ignoring unknown stream event");
            }
        }
        ControlFlow::Continue(())
    }

    /// Close the call session, if any. Returns its turn worker.
    pub async fn finish(mut self) -> Option<JoinHandle<()>> {
        match self.session.take() {
            Some(session) => Some(session.close().await),
            None => None,
        }
    }
}

/// Handle a new media stream WebSocket.
pub async fn handle_media_stream(state: Arc<GatewayState>, mut ws: WebSocket) {
    let mut stream = MediaStream::new(state);
    let conn_id = stream.conn_id().to_string();
    info!(conn_id = %conn_id, "Media stream connected");
    #[cfg(feature = "metrics")]
    crate::metrics::record_stream_connect();

    while let Some(msg_result) = ws.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if stream.handle_text(text.as_str()).await.is_break() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
        }
    }

    // The worker finishes any queued turn on its own.
    stream.finish().await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_stream_disconnect();
    info!(conn_id = %conn_id, "Media stream closed");
}
