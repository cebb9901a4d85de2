//! Tracing subscriber setup for hosts embedding the engine.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{GeneralConfig, LogFormat};

/// Install a global `fmt` subscriber. `RUST_LOG` overrides the configured
/// level. Returns `false` if a global subscriber was already set.
pub fn init_tracing(config: &GeneralConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (json, pretty) = match config.log_format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_false() {
        let cfg = GeneralConfig::default();
        let _ = init_tracing(&cfg);
        assert!(!init_tracing(&cfg));
    }
}
