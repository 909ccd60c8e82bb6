//! Tracing subscriber bootstrap. Only binaries call this.

use std::io;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{CoreError, CoreResult};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `config.level`. Output goes to stderr so that stdout
/// stays free for command results.
pub fn init_logging(config: &LoggingConfig) -> CoreResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CoreError::ConfigError(format!("invalid log level '{}': {}", config.level, e)))?;

    let builder = fmt().with_writer(io::stderr).with_env_filter(filter);

    let result = match config.format {
        LogFormat::Pretty => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };

    result.map_err(|e| CoreError::ConfigError(format!("failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
