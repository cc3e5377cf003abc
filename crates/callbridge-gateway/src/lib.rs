//! Telephony gateway: media streams in, synthesized replies out.
//!
//! The gateway hosts the media-stream WebSocket the telephony platform
//! connects to, the call-control webhook, and the reply assets the platform
//! fetches for playback. Each streamed call gets a [`session::CallSession`]
//! that turns caller speech into assistant replies.

pub mod assets;
pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;
pub mod webhook;

pub use server::{build_router, start_gateway};
pub use state::{GatewayState, Services};
