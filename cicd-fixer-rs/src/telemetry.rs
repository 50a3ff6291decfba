// cicd-fixer-rs/src/telemetry.rs
// Process-wide tracing subscriber setup for binaries and tests embedding the
// engine.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `default_level`
/// when it is unset. Set `CICD_FIXER_LOG_FORMAT=json` for JSON lines.
///
/// Only the first call has any effect; a subscriber installed by someone
/// else is left in place.
pub fn init_tracing(default_level: &str) {
    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = env::var("CICD_FIXER_LOG_FORMAT")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    match installed {
        Ok(()) => tracing::debug!(json, "tracing initialized"),
        Err(err) => eprintln!("tracing subscriber already set: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_tracing("debug");
        init_tracing("trace");
        assert!(TRACING_INITIALIZED.load(Ordering::SeqCst));
    }
}
