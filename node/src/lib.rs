//! Authoritative server process: session coordination, realtime fan-out,
//! the HTTP/WebSocket API, and the withdrawal reconciler.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod reconciler;

/// Milliseconds since the UNIX epoch: the timestamp injected into the
/// engine for every command. The engine itself never reads the clock.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
