use super::{ClientConfig, ConfigError};

/// Validate the full client config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_service(config)?;
    validate_exchange(config)?;
    validate_cache(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_service(config: &ClientConfig) -> Result<(), ConfigError> {
    let service = &config.service;
    validate_url("service.host", &service.host, &["http", "https"])?;
    validate_url("service.hub_url", &service.hub_url, &["ws", "wss"])?;

    let has_token = service
        .user_token
        .as_deref()
        .is_some_and(|token| !token.trim().is_empty());
    let has_cookies = service
        .cookies
        .as_deref()
        .is_some_and(|cookies| !cookies.trim().is_empty());
    if !has_token && !has_cookies {
        return Err(validation_err(
            "service.user_token or service.cookies must be set",
        ));
    }

    if let Some(proxy) = service.proxy.as_deref() {
        if proxy.trim().is_empty() {
            return Err(validation_err("service.proxy cannot be empty when set"));
        }
        // The hub tunnel speaks CONNECT over plain TCP.
        validate_url("service.proxy", proxy, &["http"])?;
    }

    for (field, value) in [
        ("service.locale", &service.locale),
        ("service.market", &service.market),
        ("service.region", &service.region),
    ] {
        if value.trim().is_empty() {
            return Err(validation_err(format!("{field} cannot be empty")));
        }
    }
    Ok(())
}

fn validate_url(field: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|err| validation_err(format!("{field} is not a valid URL: {err}")))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(validation_err(format!(
            "{field} must use one of: {}",
            schemes
                .iter()
                .map(|scheme| format!("{scheme}://"))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(())
}

fn validate_exchange(config: &ClientConfig) -> Result<(), ConfigError> {
    let exchange = &config.exchange;
    for (field, value) in [
        ("exchange.response_timeout_ms", exchange.response_timeout_ms),
        ("exchange.keepalive_interval_ms", exchange.keepalive_interval_ms),
        ("exchange.connect_timeout_ms", exchange.connect_timeout_ms),
        ("exchange.http_timeout_ms", exchange.http_timeout_ms),
    ] {
        if value == 0 {
            return Err(validation_err(format!("{field} must be greater than 0")));
        }
    }
    Ok(())
}

fn validate_cache(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.cache.namespace.trim().is_empty() {
        return Err(validation_err("cache.namespace cannot be empty"));
    }
    if let Some(path) = config.cache.path.as_deref() {
        if path.trim().is_empty() {
            return Err(validation_err("cache.path cannot be empty when set"));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DISABLED", "TRACE", "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL",
];

fn validate_log_level(config: &ClientConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is invalid. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
