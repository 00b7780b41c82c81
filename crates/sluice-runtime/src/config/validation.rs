//! Configuration validation utilities.

use std::net::SocketAddr;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    GatewayConfig, HostConfig, LogOutput, LoggingConfig, MessagingConfig, SluiceConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &SluiceConfig) -> ConfigResult<()> {
    validate_host_config(&config.host)?;
    validate_gateway_config(&config.gateway)?;
    validate_messaging_config(&config.messaging)?;
    validate_logging_config(&config.logging)?;

    if config.batch.max_size == Some(0) {
        return Err(ConfigError::validation(
            "Batch max size must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_host_config(host: &HostConfig) -> ConfigResult<()> {
    if let Some(listen) = &host.listen
        && listen.parse::<SocketAddr>().is_err()
    {
        return Err(ConfigError::InvalidAddress(listen.clone()));
    }

    if host.max_gateway_depth == 0 {
        return Err(ConfigError::validation(
            "Max gateway depth must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_gateway_config(gateway: &GatewayConfig) -> ConfigResult<()> {
    if gateway.timeout_ms == 0 {
        return Err(ConfigError::validation("Timeout must be greater than 0"));
    }

    if let Some(name) = gateway.routes.keys().find(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Route operation names must not be empty, got '{name}'"
        )));
    }

    match &gateway.remote_url {
        Some(url) => validate_url(url)?,
        None if gateway.uses_remote() => {
            return Err(ConfigError::missing_field("gateway.remote_url"));
        }
        None => {}
    }

    Ok(())
}

fn validate_messaging_config(messaging: &MessagingConfig) -> ConfigResult<()> {
    if messaging.workers == 0 {
        return Err(ConfigError::validation(
            "Messaging workers must be greater than 0",
        ));
    }

    if messaging.capacity == 0 {
        return Err(ConfigError::validation(
            "Messaging capacity must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(target) = logging.filters.keys().find(|t| t.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Log filter targets must not be empty, got '{target}'"
        )));
    }

    Ok(())
}

/// Validates a remote base URL.
fn validate_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("gateway.remote_url"));
    }

    let valid_schemes = ["http://", "https://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteTarget;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&SluiceConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_listen_address() {
        let mut config = SluiceConfig::default();
        config.host.listen = Some("not an address".to_string());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidAddress(_))
        ));

        config.host.listen = Some("127.0.0.1:8080".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn remote_routes_need_a_remote_url() {
        let mut config = SluiceConfig::default();
        config
            .gateway
            .routes
            .insert("GetInvoice".to_string(), RouteTarget::Remote);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.gateway.remote_url = Some("ftp://billing".to_string());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));

        config.gateway.remote_url = Some("http://billing:8080".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_zero_counts() {
        let mut config = SluiceConfig::default();
        config.messaging.workers = 0;
        assert!(validate_config(&config).is_err());

        let mut config = SluiceConfig::default();
        config.gateway.timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = SluiceConfig::default();
        config.batch.max_size = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn file_output_needs_a_path() {
        let mut config = SluiceConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
