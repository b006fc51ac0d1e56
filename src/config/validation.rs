//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate pool bounds per tier after overrides
//! - Validate value ranges (timeouts > 0, addresses are `host:port`)
//! - Detect conflicting endpoints and duplicate users
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::backend::Tier;
use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check everything serde cannot.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for tier in Tier::ALL {
        let pool = config.pool_config(tier);
        let field = format!("tiers.{}", tier);
        if pool.max_alive == 0 {
            errors.push(ValidationError::new(
                format!("{}.max_alive", field),
                "must be greater than 0",
            ));
        }
        if pool.min_alive > pool.max_alive {
            errors.push(ValidationError::new(
                format!("{}.min_alive", field),
                format!("{} exceeds max_alive {}", pool.min_alive, pool.max_alive),
            ));
        }
        if pool.max_idle > pool.max_alive {
            errors.push(ValidationError::new(
                format!("{}.max_idle", field),
                format!("{} exceeds max_alive {}", pool.max_idle, pool.max_alive),
            ));
        }

        let mut seen = HashSet::new();
        for addr in &config.tier(tier).endpoints {
            if !is_host_port(addr) {
                errors.push(ValidationError::new(
                    format!("{}.endpoints", field),
                    format!("'{}' is not host:port", addr),
                ));
            }
            if !seen.insert(addr.as_str()) {
                errors.push(ValidationError::new(
                    format!("{}.endpoints", field),
                    format!("'{}' listed twice", addr),
                ));
            }
        }
    }

    for addr in &config.tiers.admin.endpoints {
        if config.tiers.readonly.endpoints.contains(addr) {
            errors.push(ValidationError::new(
                "tiers",
                format!("'{}' appears in both admin and readonly tiers", addr),
            ));
        }
    }

    let pool = &config.pool;
    for (field, value) in [
        ("pool.connect_timeout_ms", pool.connect_timeout_ms),
        ("pool.borrow_timeout_ms", pool.borrow_timeout_ms),
        ("pool.stale_after_ms", pool.stale_after_ms),
        ("pool.idle_timeout_secs", pool.idle_timeout_secs),
        ("pool.maintenance_interval_ms", pool.maintenance_interval_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if pool.warm_base_delay_ms > pool.warm_max_delay_ms {
        errors.push(ValidationError::new(
            "pool.warm_base_delay_ms",
            "exceeds warm_max_delay_ms",
        ));
    }

    let mut users = HashSet::new();
    for (i, user) in config.userlist.iter().enumerate() {
        if user.user.is_empty() {
            errors.push(ValidationError::new(format!("userlist[{}].user", i), "must not be empty"));
        } else if !users.insert(user.user.as_str()) {
            errors.push(ValidationError::new(
                format!("userlist[{}].user", i),
                format!("duplicate user '{}'", user.user),
            ));
        }
    }

    if config.discovery.enabled && !is_host_port(&config.discovery.address) {
        errors.push(ValidationError::new("discovery.address", "must be host:port"));
    }
    if config.discovery.channel_capacity == 0 {
        errors.push(ValidationError::new("discovery.channel_capacity", "must be greater than 0"));
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a non-empty host and a numeric port.
pub(crate) fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::UserConfig;

    fn valid() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.tiers.admin.endpoints = vec!["primary:5432".into()];
        config.tiers.readonly.endpoints = vec!["replica-1:5432".into(), "replica-2:5432".into()];
        config
    }

    #[test]
    fn default_with_endpoints_is_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn zero_max_alive_rejected() {
        let mut config = valid();
        config.tiers.admin.max_alive = Some(0);
        config.tiers.admin.min_alive = Some(0);
        config.tiers.admin.max_idle = Some(0);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "tiers.admin.max_alive");
    }

    #[test]
    fn collects_every_error() {
        let mut config = valid();
        config.pool.min_alive = 40;
        config.tiers.readonly.endpoints.push("no-port".into());
        config.tiers.readonly.endpoints.push("primary:5432".into());
        config.pool.borrow_timeout_ms = 0;
        config.userlist = vec![
            UserConfig { user: "a".into(), password: "x".into() },
            UserConfig { user: "a".into(), password: "y".into() },
        ];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"tiers.admin.min_alive"));
        assert!(fields.contains(&"tiers.readonly.min_alive"));
        assert!(fields.contains(&"tiers.readonly.endpoints"));
        assert!(fields.contains(&"tiers"));
        assert!(fields.contains(&"pool.borrow_timeout_ms"));
        assert!(fields.contains(&"userlist[1].user"));
    }

    #[test]
    fn host_port_parsing() {
        assert!(is_host_port("db.internal:5432"));
        assert!(is_host_port("[::1]:5432"));
        assert!(!is_host_port(":5432"));
        assert!(!is_host_port("db:port"));
        assert!(!is_host_port("db"));
    }
}
