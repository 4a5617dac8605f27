//! # WebSocket Speech Endpoints
//!
//! Two WebSocket protocols, one actor per connection:
//!
//! - **`/stt`** ([`stt::SttWebSocket`]): binary frames of raw PCM in, exactly
//!   one JSON text frame out (`{"status":"ok","text":…}` or
//!   `{"status":"error","error":…}`), then the server closes the socket.
//! - **`/tts`** ([`tts::TtsWebSocket`]): JSON text frames
//!   `{"data":{"text":…}}` in, binary audio frames out, one request at a time.
//!
//! Both endpoints take a session slot from [`AppState`](crate::state::AppState)
//! before upgrading and refuse the upgrade with 503 when none is free.

pub mod stt;
pub mod tts;

pub use stt::stt_websocket;
pub use tts::tts_websocket;

use actix::prelude::*;
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::warn;

/// How often the server pings an idle client.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A client silent for this long is treated as gone.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Actors whose liveness is tracked through ping/pong.
pub trait Heartbeat {
    fn last_heartbeat(&self) -> Instant;
}

/// Ping the client every [`HEARTBEAT_INTERVAL`], stop the actor once it has
/// been silent for [`CLIENT_TIMEOUT`].
pub fn start_heartbeat<A>(ctx: &mut ws::WebsocketContext<A>)
where
    A: Actor<Context = ws::WebsocketContext<A>> + Heartbeat,
{
    ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
        if Instant::now().duration_since(act.last_heartbeat()) > CLIENT_TIMEOUT {
            warn!("WebSocket heartbeat timeout, closing connection");
            ctx.stop();
        } else {
            ctx.ping(b"");
        }
    });
}
