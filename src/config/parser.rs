use crate::config::types::{Config, StoreBackend};
use crate::ConfigError;
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Every section and field is optional; missing values take their
/// defaults. The parsed configuration is validated before being returned.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Validates a configuration
///
/// Checks the cross-field constraints the type system can't express.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.engine.workers == 0 {
        return Err(ConfigError::Validation(
            "engine.workers must be at least 1".to_string(),
        ));
    }
    if config.engine.stall_threshold_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.stall-threshold-secs must be positive".to_string(),
        ));
    }
    if config.fetch.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch.timeout-secs must be positive".to_string(),
        ));
    }
    for code in &config.fetch.permanent_status_codes {
        if !(100..=599).contains(code) {
            return Err(ConfigError::Validation(format!(
                "fetch.permanent-status-codes: {} is not an HTTP status code",
                code
            )));
        }
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "retry.max-attempts must be at least 1".to_string(),
        ));
    }
    if config.retry.multiplier < 1.0 {
        return Err(ConfigError::Validation(
            "retry.multiplier must be at least 1.0".to_string(),
        ));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return Err(ConfigError::Validation(
            "retry.max-delay-ms must not be below retry.base-delay-ms".to_string(),
        ));
    }
    if config.store.backend == StoreBackend::File && config.store.jobs_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "store.jobs-dir is required for the file backend".to_string(),
        ));
    }
    Ok(())
}
