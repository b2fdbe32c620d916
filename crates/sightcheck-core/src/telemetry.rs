//! Tracing setup for the Sightcheck binaries.
//!
//! Without `RUST_LOG`, the sightcheck crates log at the requested level and
//! everything else (reqwest, hyper, axum) at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const OWN_TARGETS: [&str; 3] = ["sightcheck_core", "sightcheck", "sightcheckd"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber; `json` switches to newline-delimited JSON.
///
/// Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    if installed.is_ok() {
        tracing::debug!(json, level = %level, "tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_crates_follow_requested_level() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,sightcheck_core=debug,sightcheck=debug,sightcheckd=debug"
        );
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
        tracing::info!("still logging");
    }
}
