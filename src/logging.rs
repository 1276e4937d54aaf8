//! Tracing bootstrap shared by the CLI and the server.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// Returns an error string if a subscriber is already installed; callers
/// treat that as non-fatal.
pub fn init_logging(level: &str, json: bool) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("invalid log level `{}`: {}", level, e))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| format!("failed to install subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected_not_panicking() {
        let _ = init_logging("info", false);
        assert!(init_logging("debug", true).is_err());
    }
}
