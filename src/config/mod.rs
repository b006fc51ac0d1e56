//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → pool bounds read once when the PoolManager is built
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → endpoint lists diffed against the previous ones
//!     → EndpointAdded / EndpointRemoved events on the topology channel
//! ```
//!
//! # Design Decisions
//! - Only endpoint lists are live; pool bounds need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, DiscoveryConfig, ObservabilityConfig, PoolSettings, ProxyConfig, TierConfig,
    TiersConfig, UserConfig,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
