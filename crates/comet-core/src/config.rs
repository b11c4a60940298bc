use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Address to bind the HTTP surface (e.g., "0.0.0.0:8080")
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long a comet request may stay queued before being answered with
    /// "TIMEOUT", in milliseconds
    #[serde(default = "default_comet_timeout_ms")]
    pub comet_timeout_ms: u64,
    /// How long a delivered message may wait for its pingback before the
    /// sender is answered with "TIMEOUT", in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl BrokerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn comet_timeout(&self) -> Duration {
        Duration::from_millis(self.comet_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            comet_timeout_ms: default_comet_timeout_ms(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_comet_timeout_ms() -> u64 {
    300_000
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Broker base URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Number of long-poll comet connections to ramp up
    #[serde(default = "default_connections")]
    pub connections: u32,
    /// Number of one-shot messages to send once all connections are waiting
    #[serde(default = "default_messages")]
    pub messages: u32,
    /// Sleep between comet connection starts, in milliseconds
    #[serde(default = "default_connection_throttle_ms")]
    pub connection_throttle_ms: u64,
    /// Sleep between message sends, in milliseconds
    #[serde(default = "default_message_throttle_ms")]
    pub message_throttle_ms: u64,
    /// Deadline for the broker's waiting count to reach `connections`
    #[serde(default = "default_await_timeout_ms")]
    pub await_connections_timeout_ms: u64,
    /// Deadline for the ack counter to reach `messages`
    #[serde(default = "default_await_timeout_ms")]
    pub await_acks_timeout_ms: u64,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connections: default_connections(),
            messages: default_messages(),
            connection_throttle_ms: default_connection_throttle_ms(),
            message_throttle_ms: default_message_throttle_ms(),
            await_connections_timeout_ms: default_await_timeout_ms(),
            await_acks_timeout_ms: default_await_timeout_ms(),
        }
    }
}

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_connections() -> u32 {
    1000
}

fn default_messages() -> u32 {
    1000
}

fn default_connection_throttle_ms() -> u64 {
    1
}

fn default_message_throttle_ms() -> u64 {
    10
}

fn default_await_timeout_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_serde() {
        let config_str = r#"
bind = "127.0.0.1:9090"
comet_timeout_ms = 500
        "#;

        let config: BrokerConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9090");
        assert_eq!(config.comet_timeout(), Duration::from_millis(500));
        // unspecified fields fall back to defaults
        assert_eq!(config.message_timeout_ms, 30_000);
    }

    #[test]
    fn test_client_config_serde() {
        let config_str = r#"
url = "http://10.0.0.5:8080"
connections = 50
messages = 25
message_throttle_ms = 0
        "#;

        let config: ClientConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.url, "http://10.0.0.5:8080");
        assert_eq!(config.connections, 50);
        assert_eq!(config.messages, 25);
        assert_eq!(config.message_throttle_ms, 0);
        assert_eq!(config.connection_throttle_ms, 1);
        assert_eq!(config.await_acks_timeout_ms, 60_000);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.connections, 1000);
        assert_eq!(config.messages, 1000);
    }
}
