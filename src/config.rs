//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and data formats (TOML, JSON)
//! - **derive macros**: Automatically generate Debug, Clone, Serialize, Deserialize
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_RELAY_MAX_CONCURRENT_CALLS, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, relay) makes it
/// easier to understand and maintain as the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub relay: RelayConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Bridge relay tuning.
///
/// ## Fields:
/// - `max_concurrent_calls`: how many live call sessions the registry accepts
/// - `heartbeat_interval_secs`: how often each leg is pinged
/// - `heartbeat_timeout_secs`: how long a silent leg survives before being dropped
/// - `browser_float_samples`: when true, the browser leg sends/receives raw
///   little-endian `f32` frames and the relay converts to/from PCM16 at that
///   boundary; when false (default) the browser already speaks PCM16 and
///   frames are forwarded verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub max_concurrent_calls: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub browser_float_samples: bool,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration
/// file exists. They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(), // Localhost only (safe for development)
                port: 8080,
            },
            relay: RelayConfig {
                max_concurrent_calls: 50,
                heartbeat_interval_secs: 30,
                heartbeat_timeout_secs: 60,
                browser_float_samples: false, // production browser path converts client-side
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_RELAY_MAX_CONCURRENT_CALLS=200`: Override the call cap
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml if present; required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject bare HOST/PORT variables
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved)
    /// - The call cap allows at least one call
    /// - The heartbeat timeout is strictly longer than the ping interval,
    ///   otherwise every leg would be dropped before it could answer a ping
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.relay.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent calls must be greater than 0"
            ));
        }

        if self.relay.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.relay.heartbeat_timeout_secs <= self.relay.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Heartbeat timeout must be greater than the heartbeat interval"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only fields present in the JSON are changed. For example, sending just
    /// `{"relay": {"max_concurrent_calls": 200}}` updates the call cap and
    /// leaves everything else alone. The updated configuration is validated
    /// before being accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(relay) = partial_config.get("relay") {
            if let Some(calls) = relay.get("max_concurrent_calls").and_then(|v| v.as_u64()) {
                self.relay.max_concurrent_calls = calls as usize;
            }
            if let Some(interval) = relay
                .get("heartbeat_interval_secs")
                .and_then(|v| v.as_u64())
            {
                self.relay.heartbeat_interval_secs = interval;
            }
            if let Some(timeout) = relay.get("heartbeat_timeout_secs").and_then(|v| v.as_u64()) {
                self.relay.heartbeat_timeout_secs = timeout;
            }
            if let Some(float_mode) = relay.get("browser_float_samples").and_then(|v| v.as_bool())
            {
                self.relay.browser_float_samples = float_mode;
            }
        }

        // Validate the updated configuration to ensure it's still coherent
        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(!config.relay.browser_float_samples);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0; // Invalid port
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.max_concurrent_calls = 0;
        assert!(config.validate().is_err());

        // Timeout must exceed the interval
        let mut config = AppConfig::default();
        config.relay.heartbeat_timeout_secs = config.relay.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    /// Test that runtime configuration updates work correctly.
    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"relay": {"max_concurrent_calls": 200, "browser_float_samples": true}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.relay.max_concurrent_calls, 200);
        assert!(config.relay.browser_float_samples);
        // Other fields should remain unchanged
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
    }

    /// Test that an update producing an invalid configuration is rejected.
    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"relay": {"heartbeat_timeout_secs": 5}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
