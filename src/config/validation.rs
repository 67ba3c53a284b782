use super::{ConfigError, EngineConfig};

const VALID_LOG_LEVELS: &[&str] = &[
    "DISABLED", "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL",
];

/// Validate the full engine config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    validate_log_level(config)?;
    validate_reporter(config)?;
    validate_continuation(config)?;
    validate_optional_durations(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_log_level(config: &EngineConfig) -> Result<(), ConfigError> {
    let level = config.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {}, got '{}'",
            VALID_LOG_LEVELS.join(", "),
            config.log_level
        )));
    }
    Ok(())
}

fn validate_reporter(config: &EngineConfig) -> Result<(), ConfigError> {
    let reporter = &config.reporter;
    if reporter.text_flush_chars == 0 {
        return Err(validation_err(
            "reporter.text_flush_chars must be greater than 0",
        ));
    }
    if reporter.thinking_flush_chars == 0 {
        return Err(validation_err(
            "reporter.thinking_flush_chars must be greater than 0",
        ));
    }
    if reporter.placeholder_text.is_empty() {
        return Err(validation_err("reporter.placeholder_text must not be empty"));
    }
    Ok(())
}

fn validate_continuation(config: &EngineConfig) -> Result<(), ConfigError> {
    let continuation = &config.continuation;
    if continuation.ttl_secs == 0 {
        return Err(validation_err("continuation.ttl_secs must be greater than 0"));
    }
    if continuation.max_entries == 0 {
        return Err(validation_err(
            "continuation.max_entries must be greater than 0",
        ));
    }
    if continuation.window == 0 {
        return Err(validation_err("continuation.window must be greater than 0"));
    }
    let threshold = continuation.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 100.0) {
        return Err(validation_err(format!(
            "continuation.similarity_threshold must be in (0, 100], got {threshold}"
        )));
    }
    if continuation.summary_max_chars == 0 {
        return Err(validation_err(
            "continuation.summary_max_chars must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_optional_durations(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.session.marker_ttl_secs == Some(0) {
        return Err(validation_err(
            "session.marker_ttl_secs must be greater than 0 when set",
        ));
    }
    if config.stream.idle_timeout_secs == Some(0) {
        return Err(validation_err(
            "stream.idle_timeout_secs must be greater than 0 when set",
        ));
    }
    Ok(())
}
