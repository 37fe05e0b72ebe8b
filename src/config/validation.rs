//! Configuration validation
//!
//! Validates configuration and reports issues.

use std::time::Duration;

use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_gateway_url(config, result);
    result = validate_timeouts(config, result);
    result = validate_reconnect(config, result);

    if !config.enabled {
        result = result.with_warning(
            ValidationIssue::new("enabled", "Gateway client is disabled; connect() will refuse to run.")
                .with_suggestion("Set CLAWLINK_ENABLED=true or enabled: true in config"),
        );
    }

    result
}

fn validate_gateway_url(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    match url::Url::parse(&config.gateway.url) {
        Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {
            if url.scheme() == "ws" && !is_loopback(&url) {
                result = result.with_warning(
                    ValidationIssue::new(
                        "gateway.url",
                        "Unencrypted WebSocket to a non-local host.",
                    )
                    .with_suggestion("Use a wss:// endpoint for remote gateways"),
                );
            }
        }
        Ok(url) => {
            result = result.with_error(
                ValidationIssue::new(
                    "gateway.url",
                    format!("Unsupported scheme '{}'", url.scheme()),
                )
                .with_suggestion("Use ws:// or wss://"),
            );
        }
        Err(e) => {
            result = result.with_error(
                ValidationIssue::new("gateway.url", format!("Invalid URL: {}", e))
                    .with_suggestion("Example: ws://127.0.0.1:18789"),
            );
        }
    }

    result
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn validate_timeouts(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.gateway.request_timeout.is_zero() {
        result = result.with_error(
            ValidationIssue::new("gateway.requestTimeout", "Request timeout must be greater than zero.")
                .with_suggestion("The default is 30s"),
        );
    }
    if config.gateway.connect_timeout.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "gateway.connectTimeout",
            "Connect timeout must be greater than zero.",
        ));
    }

    result
}

fn validate_reconnect(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let reconnect = &config.gateway.reconnect;

    if config.gateway.auto_connect && reconnect.max_attempts == 0 {
        result = result.with_warning(
            ValidationIssue::new(
                "gateway.reconnect.maxAttempts",
                "Auto-connect is enabled but no reconnect attempts are allowed.",
            )
            .with_suggestion("Set maxAttempts to at least 1"),
        );
    }

    // Last delay of the schedule: base * 2^(max-1)
    let exponent = reconnect.max_attempts.saturating_sub(1).min(31);
    let longest = reconnect.base_delay.saturating_mul(1u32 << exponent);
    if longest > Duration::from_secs(3600) {
        result = result.with_warning(ValidationIssue::new(
            "gateway.reconnect",
            format!("Final reconnect delay is {}s.", longest.as_secs()),
        ));
    }

    result
}
