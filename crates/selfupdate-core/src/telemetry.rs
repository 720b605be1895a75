//! Log output for the `selfupdate` binary.
//!
//! Every log line goes to stderr. Stdout is reserved for what the user asked
//! for: the `resolve` JSON document, the `sources` listing and the restart
//! prompt. The workflow events from [`crate::obs`] carry a `check_id` field,
//! which the JSON format keeps as a structured key.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP internals stay at `warn` unless `RUST_LOG` asks for them.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

/// Install the stderr subscriber. Only the first call in a process takes
/// effect.
///
/// `RUST_LOG` overrides `level`, e.g. `RUST_LOG=selfupdate_core=debug`
/// to trace resolution and install phases only.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        // Lines logged inside a check span carry its `check_id`.
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
        registry.with(layer).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialised");
    }
}

fn default_directives(level: Level) -> String {
    let mut directives = level.as_str().to_ascii_lowercase();
    for target in QUIET_DEPENDENCIES {
        directives.push_str(&format!(",{target}=warn"));
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_http_stack() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_repeated_init_keeps_first_subscriber() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
