//! Log output for the `cfgprobe` command.
//!
//! Probe and run events (see [`crate::obs`]) go to stderr, leaving stdout
//! to the run summary. The filter comes from `CFGPROBE_LOG`, then
//! `RUST_LOG`, then the verbosity chosen on the command line.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a filter directive for cfgprobe alone.
pub const LOG_ENV: &str = "CFGPROBE_LOG";

/// Pick the filter directive: `CFGPROBE_LOG`, `RUST_LOG`, else `fallback`.
fn filter_directive(
    cfgprobe_log: Option<String>,
    rust_log: Option<String>,
    fallback: Level,
) -> String {
    [cfgprobe_log, rust_log]
        .into_iter()
        .flatten()
        .map(|d| d.trim().to_string())
        .find(|d| !d.is_empty())
        .unwrap_or_else(|| fallback.as_str().to_lowercase())
}

/// Install the process-wide subscriber. Only the first call has an effect.
///
/// With `json` set, each event is one JSON object per line, which is how
/// CI wrappers consume `probe.evaluated` and `run.finished`.
pub fn init_tracing(json: bool, level: Level) {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        level,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfgprobe_log_wins_over_rust_log() {
        let directive = filter_directive(
            Some("cfgprobe_core=trace".into()),
            Some("warn".into()),
            Level::INFO,
        );
        assert_eq!(directive, "cfgprobe_core=trace");
    }

    #[test]
    fn test_blank_variables_fall_back_to_level() {
        let directive = filter_directive(Some("  ".into()), None, Level::DEBUG);
        assert_eq!(directive, "debug");
    }

    #[test]
    fn test_rust_log_used_when_cfgprobe_log_unset() {
        assert_eq!(filter_directive(None, Some("error".into()), Level::INFO), "error");
    }
}
