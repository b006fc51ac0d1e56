//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::backend::Tier;
use crate::pool::PoolConfig;
use crate::resilience::BackoffPolicy;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Pool defaults shared by both tiers.
    pub pool: PoolSettings,

    /// Per-tier endpoints and bound overrides.
    pub tiers: TiersConfig,

    /// Topology discovery feed.
    pub discovery: DiscoveryConfig,

    /// Static tenant credentials.
    pub userlist: Vec<UserConfig>,
}

impl ProxyConfig {
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Admin => &self.tiers.admin,
            Tier::Readonly => &self.tiers.readonly,
        }
    }

    /// Effective pool bounds for `tier`: shared defaults with the tier's overrides applied.
    pub fn pool_config(&self, tier: Tier) -> PoolConfig {
        let overrides = self.tier(tier);
        let pool = &self.pool;
        PoolConfig {
            min_alive: overrides.min_alive.unwrap_or(pool.min_alive),
            max_alive: overrides.max_alive.unwrap_or(pool.max_alive),
            max_idle: overrides.max_idle.unwrap_or(pool.max_idle),
            stale_after: Duration::from_millis(pool.stale_after_ms),
            idle_timeout: Duration::from_secs(pool.idle_timeout_secs),
            connect_timeout: pool.connect_timeout(),
            warm_backoff: BackoffPolicy::new(
                pool.warm_base_delay_ms,
                pool.warm_max_delay_ms,
                pool.warm_max_attempts,
            ),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Single-line log output without targets.
    pub compact_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            compact_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Pool settings applied to both tiers unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Links kept open per Active endpoint.
    pub min_alive: usize,

    /// Hard cap on links per tier.
    pub max_alive: usize,

    /// Idle links kept per tier before maintenance trims them.
    pub max_idle: usize,

    /// Idle links unused for longer are pinged before reuse.
    pub stale_after_ms: u64,

    /// Idle links unused for longer are closed by maintenance.
    pub idle_timeout_secs: u64,

    /// Timeout for a single connect or ping.
    pub connect_timeout_ms: u64,

    /// How long a session waits for a link.
    pub borrow_timeout_ms: u64,

    /// Period of the shrink / re-warm / prune pass.
    pub maintenance_interval_ms: u64,

    /// How long shutdown waits for borrowed links.
    pub shutdown_grace_secs: u64,

    pub warm_base_delay_ms: u64,
    pub warm_max_delay_ms: u64,
    /// 0 retries forever.
    pub warm_max_attempts: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_alive: 2,
            max_alive: 32,
            max_idle: 8,
            stale_after_ms: 5_000,
            idle_timeout_secs: 300,
            connect_timeout_ms: 3_000,
            borrow_timeout_ms: 5_000,
            maintenance_interval_ms: 10_000,
            shutdown_grace_secs: 30,
            warm_base_delay_ms: 100,
            warm_max_delay_ms: 5_000,
            warm_max_attempts: 8,
        }
    }
}

impl PoolSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn borrow_timeout(&self) -> Duration {
        Duration::from_millis(self.borrow_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Endpoint lists for both tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TiersConfig {
    pub admin: TierConfig,
    pub readonly: TierConfig,
}

/// One tier's endpoints and optional bound overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TierConfig {
    /// Backend addresses (`host:port`) seeded at startup.
    pub endpoints: Vec<String>,

    pub min_alive: Option<usize>,
    pub max_alive: Option<usize>,
    pub max_idle: Option<usize>,
}

/// Topology discovery feed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Subscribe to the feed.
    pub enabled: bool,

    /// Feed address (`host:port`), JSON-lines.
    pub address: String,

    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,

    /// Buffered topology events between producers and the coordinator.
    pub channel_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:7400".to_string(),
            reconnect_base_ms: 250,
            reconnect_max_ms: 10_000,
            channel_capacity: 256,
        }
    }
}

impl DiscoveryConfig {
    pub fn reconnect_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.reconnect_base_ms, self.reconnect_max_ms, 0)
    }
}

/// A tenant credential.
#[derive(Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_overrides_apply_to_pool_config() {
        let mut config = ProxyConfig::default();
        config.tiers.readonly.max_alive = Some(64);
        config.tiers.readonly.min_alive = Some(4);

        let readonly = config.pool_config(Tier::Readonly);
        assert_eq!((readonly.min_alive, readonly.max_alive, readonly.max_idle), (4, 64, 8));

        let admin = config.pool_config(Tier::Admin);
        assert_eq!((admin.min_alive, admin.max_alive), (2, 32));
        assert_eq!(admin.stale_after, Duration::from_secs(5));
    }

    #[test]
    fn user_password_is_redacted() {
        let user = UserConfig {
            user: "tenant_a".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{:?}", user);
        assert!(printed.contains("tenant_a"));
        assert!(!printed.contains("hunter2"));
    }
}
