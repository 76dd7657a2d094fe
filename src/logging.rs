//! Structured logging init.
//!
//! Uses `tracing` directly — every orchestrator task opens an
//! `info_span!("participant", participant_id = %id)` and nests a
//! `response_id`/`call_id` span for the duration of a response or tool call,
//! satisfying §4.J's "structured logs carry participant_id, response_id,
//! call_id where applicable" without a separate logging process to route to.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Idempotent: a second call is a
/// no-op (the `try_init` failure is swallowed), mirroring how the rest of the
/// crate treats double-initialization of global state.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_env("AEROVOX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("AEROVOX_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        subscriber.json().try_init()
    } else {
        subscriber.compact().try_init()
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already initialized: {e}");
    }
}
