//! Server configuration.

use std::time::Duration;

use axum::http::HeaderValue;
use parley_core::history::HISTORY_LIMIT;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("allowed origin {0:?} is not a valid header value")]
    InvalidOrigin(String),
    #[error("history limit must be at least 1")]
    ZeroHistoryLimit,
    #[error("generation timeout must be greater than zero")]
    ZeroTimeout,
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeat,
    #[error("client timeout must be greater than zero")]
    ZeroClientTimeout,
    #[error("send queue must hold at least one message")]
    ZeroSendQueue,
}

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `4020`, `0` to auto-assign).
    pub port: u16,
    /// The only browser origin allowed to connect, with credentials.
    pub allowed_origin: String,
    /// Outbound frames buffered per client before new ones are dropped.
    pub max_send_queue: usize,
    /// Turns kept per conversation.
    pub history_limit: usize,
    /// Upper bound on one generation, retries included.
    pub generation_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Clients silent for longer than this are dropped.
    pub client_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4020,
            allowed_origin: "http://localhost:3000".into(),
            max_send_queue: 256,
            history_limit: HISTORY_LIMIT,
            generation_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_header()?;
        if self.history_limit == 0 {
            return Err(ConfigError::ZeroHistoryLimit);
        }
        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroHeartbeat);
        }
        if self.client_timeout_secs == 0 {
            return Err(ConfigError::ZeroClientTimeout);
        }
        if self.max_send_queue == 0 {
            return Err(ConfigError::ZeroSendQueue);
        }
        Ok(())
    }

    pub fn origin_header(&self) -> Result<HeaderValue, ConfigError> {
        HeaderValue::from_str(&self.allowed_origin)
            .map_err(|_| ConfigError::InvalidOrigin(self.allowed_origin.clone()))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 4020);
        assert_eq!(cfg.allowed_origin, "http://localhost:3000");
        assert_eq!(cfg.history_limit, 24);
        assert_eq!(cfg.generation_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.bind_addr(), "0.0.0.0:4020");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_origin() {
        let cfg = ServerConfig {
            allowed_origin: "http://bad\norigin".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidOrigin(_))));
    }

    #[test]
    fn rejects_zero_history_limit() {
        let cfg = ServerConfig {
            history_limit: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroHistoryLimit)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let cfg = ServerConfig {
            generation_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroHeartbeat)));
    }

    #[test]
    fn rejects_zero_client_timeout() {
        let cfg = ServerConfig {
            client_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroClientTimeout)));
    }

    #[test]
    fn rejects_zero_send_queue() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"max_send_queue":0}"#).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroSendQueue)));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port":8080}"#).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.history_limit, 24);
        assert_eq!(cfg.allowed_origin, "http://localhost:3000");
    }
}
