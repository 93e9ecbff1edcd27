//! Configuration management for rtc-bridge
//!
//! Values come from `RTC_BRIDGE_*` environment variables, optionally seeded
//! from a `.env` file.

use config::{Config, ConfigError, Environment};
use rtc_bridge_types::{IceServer, IceTransportPolicy, RtcConfiguration};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RTC_BRIDGE";

/// Ids that must remain above `channel_id_base`: one per SCTP stream
pub const MIN_CHANNEL_ID_RANGE: u32 = u16::MAX as u32 + 1;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

/// Bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Comma-separated STUN/TURN URLs
    pub ice_servers: Option<String>,
    pub ice_username: Option<String>,
    pub ice_credential: Option<String>,
    pub ice_transport_policy: IceTransportPolicy,
    /// First identifier minted for remote-initiated data channels
    pub channel_id_base: u32,
    /// 0 disables the negotiation timeout
    pub negotiation_timeout_ms: u64,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::build(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from an explicit variable map instead of the
    /// process environment. Keys carry the `RTC_BRIDGE_` prefix.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn build(environment: Environment) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .set_default("log_level", "info")?
            .set_default("log_format", "console")?
            .set_default("ice_transport_policy", "all")?
            .set_default("channel_id_base", 10000)?
            .set_default("negotiation_timeout_ms", 0)?
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if u32::MAX - self.channel_id_base < MIN_CHANNEL_ID_RANGE - 1 {
            return Err(ConfigError::Message(format!(
                "channel_id_base {} leaves fewer than {} data channel ids",
                self.channel_id_base, MIN_CHANNEL_ID_RANGE
            )));
        }
        Ok(())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }

    /// Negotiation timeout, if one is configured
    pub fn negotiation_timeout(&self) -> Option<Duration> {
        match self.negotiation_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Peer connection configuration handed to the engine
    pub fn rtc_configuration(&self) -> RtcConfiguration {
        let ice_servers = self
            .ice_servers
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| IceServer {
                urls: vec![url.to_string()],
                username: self.ice_username.clone(),
                credential: self.ice_credential.clone(),
            })
            .collect();

        RtcConfiguration {
            ice_servers,
            ice_transport_policy: self.ice_transport_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::from_map(HashMap::new()).unwrap();

        assert_eq!(config.log_level(), "info");
        assert_eq!(config.log_format, LogFormat::Console);
        assert_eq!(config.channel_id_base, 10000);
        assert_eq!(config.negotiation_timeout(), None);
        assert!(config.rtc_configuration().ice_servers.is_empty());
        assert_eq!(config.ice_transport_policy, IceTransportPolicy::All);
    }

    #[test]
    fn test_config_overrides() {
        let config = BridgeConfig::from_map(vars(&[
            ("RTC_BRIDGE_LOG_LEVEL", "debug"),
            ("RTC_BRIDGE_ICE_SERVERS", "stun:stun.example.org:3478, turn:turn.example.org"),
            ("RTC_BRIDGE_ICE_USERNAME", "alice"),
            ("RTC_BRIDGE_ICE_TRANSPORT_POLICY", "relay"),
            ("RTC_BRIDGE_NEGOTIATION_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();

        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.negotiation_timeout(), Some(Duration::from_millis(2500)));

        let rtc = config.rtc_configuration();
        assert_eq!(rtc.ice_transport_policy, IceTransportPolicy::Relay);
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[1].urls, vec!["turn:turn.example.org".to_string()]);
        assert_eq!(rtc.ice_servers[0].username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_channel_id_base_must_leave_room() {
        let err = BridgeConfig::from_map(vars(&[("RTC_BRIDGE_CHANNEL_ID_BASE", "4294967295")])).unwrap_err();
        assert!(err.to_string().contains("channel_id_base"));

        let highest = u32::MAX - (MIN_CHANNEL_ID_RANGE - 1);
        let base = highest.to_string();
        let config = BridgeConfig::from_map(vars(&[("RTC_BRIDGE_CHANNEL_ID_BASE", base.as_str())])).unwrap();
        assert_eq!(config.channel_id_base, highest);

        let base = (highest + 1).to_string();
        assert!(BridgeConfig::from_map(vars(&[("RTC_BRIDGE_CHANNEL_ID_BASE", base.as_str())])).is_err());
    }
}
