use time::UtcOffset;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::{errors::InitializationError, RelayConfig, RelayError};

pub fn setup_logging(config: &RelayConfig) -> Result<(), RelayError> {
    config
        .logging
        .validate()
        .map_err(|e| RelayError::Init(InitializationError::logging(e)))?;

    let timer = OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        time::format_description::well_known::Rfc3339,
    );

    let base_level = config.logging.get_level_filter();

    let mut env_filter = EnvFilter::default().add_directive(base_level.into());

    if config.logging.trace_frames {
        env_filter = env_filter
            .add_directive("modbus_core::frame=trace".parse().unwrap())
            .add_directive("modbus_core::transport=trace".parse().unwrap());
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(config.logging.thread_ids)
        .with_thread_names(config.logging.thread_names)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location)
        .with_level(true)
        .with_timer(timer)
        .with_filter(env_filter);

    Registry::default().with(layer).try_init().map_err(|e| {
        RelayError::Init(InitializationError::logging(format!(
            "failed to initialize logging: {e}"
        )))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingConfig;

    #[test]
    fn rejects_invalid_level_before_subscriber_init() {
        let config = RelayConfig {
            logging: LoggingConfig { level: "invalid".to_string(), ..LoggingConfig::default() },
            ..RelayConfig::default()
        };
        assert!(config.logging.validate().is_err());
        // setup_logging would fail validation before touching the global subscriber.
    }

    #[test]
    fn default_config_level_filter_is_info() {
        use tracing::level_filters::LevelFilter;
        assert_eq!(LoggingConfig::default().get_level_filter(), LevelFilter::INFO);
    }
}
