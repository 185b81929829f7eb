//! Configuration types for client sessions

use captionroom_protocol::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a client session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Minimum gap between a recognizer stop and the next start
    /// (default: 500ms, range: 0-10000ms)
    pub recognition_restart_debounce_ms: u64,

    /// Time allowed for one negotiation attempt to reach Connected
    /// (default: 15s, range: 1-300s)
    pub negotiation_timeout_secs: u64,

    /// Negotiation attempts per peer before giving up (default: 2, range: 1-10)
    pub max_negotiation_attempts: u32,

    /// Join with the microphone disabled (default: false)
    pub start_muted: bool,

    /// Join with the camera disabled (default: false)
    pub start_video_disabled: bool,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8080".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            recognition_restart_debounce_ms: 500,
            negotiation_timeout_secs: 15,
            max_negotiation_attempts: 2,
            start_muted: false,
            start_video_disabled: false,
        }
    }
}

impl ClientConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `stun_servers` is empty or holds a non-STUN URL
    /// - a TURN URL does not start with `turn:` or `turns:`
    /// - `recognition_restart_debounce_ms` is above 10000
    /// - `negotiation_timeout_secs` is not in range 1-300
    /// - `max_negotiation_attempts` is not in range 1-10
    pub fn validate(&self) -> Result<()> {
        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if self.recognition_restart_debounce_ms > 10_000 {
            return Err(Error::InvalidConfig(format!(
                "recognition_restart_debounce_ms must be at most 10000, got {}",
                self.recognition_restart_debounce_ms
            )));
        }

        if !(1..=300).contains(&self.negotiation_timeout_secs) {
            return Err(Error::InvalidConfig(format!(
                "negotiation_timeout_secs must be in range 1-300, got {}",
                self.negotiation_timeout_secs
            )));
        }

        if !(1..=10).contains(&self.max_negotiation_attempts) {
            return Err(Error::InvalidConfig(format!(
                "max_negotiation_attempts must be in range 1-10, got {}",
                self.max_negotiation_attempts
            )));
        }

        Ok(())
    }

    /// Recognizer restart debounce window
    pub fn recognition_debounce(&self) -> Duration {
        Duration::from_millis(self.recognition_restart_debounce_ms)
    }

    /// Time allowed per negotiation attempt
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    /// Set the signaling URL
    pub fn with_signaling_url(mut self, url: &str) -> Self {
        self.signaling_url = url.to_string();
        self
    }

    /// Set the TURN servers
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recognition_debounce(), Duration::from_millis(500));
        assert_eq!(config.negotiation_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_signaling_url_fails() {
        let config = ClientConfig::default().with_signaling_url("http://localhost:8080");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_stun_servers_fails() {
        let mut config = ClientConfig::default();
        config.stun_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_turn_url_fails() {
        let config = ClientConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "stun:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negotiation_limits() {
        let mut config = ClientConfig::default();
        config.negotiation_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.max_negotiation_attempts = 0;
        assert!(config.validate().is_err());
    }
}
