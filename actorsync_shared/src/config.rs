//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files. Values are fixed once a
//! server or client has been constructed from them.

use std::{net::SocketAddr, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:28785`.
    pub server_addr: String,
    /// Fixed simulation step length.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Connections beyond this count are closed on accept.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Inbound messages longer than this (in chars) close the connection.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    /// Target render rate (client only).
    #[serde(default = "default_render_fps")]
    pub render_fps: u32,
    /// Client interpolation substep length.
    #[serde(default = "default_render_substep_ms")]
    pub render_substep_ms: u64,
    /// How often the server driver polls the simulation clock.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between the shutdown broadcast and closing connections.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_max_clients() -> usize {
    64
}

fn default_max_message_len() -> usize {
    128
}

fn default_render_fps() -> u32 {
    30
}

fn default_render_substep_ms() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_shutdown_grace_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:28785".to_string(),
            tick_interval_ms: default_tick_interval_ms(),
            max_clients: default_max_clients(),
            max_message_len: default_max_message_len(),
            render_fps: default_render_fps(),
            render_substep_ms: default_render_substep_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Parsed listen/connect address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(self.server_addr.clone()))
    }

    /// Checks every field; called before any session is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("tick_interval_ms"));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Zero("max_clients"));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::Zero("max_message_len"));
        }
        if self.render_fps == 0 {
            return Err(ConfigError::Zero("render_fps"));
        }
        if self.render_substep_ms == 0 {
            return Err(ConfigError::Zero("render_substep_ms"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        if self.render_substep_ms > self.tick_interval_ms {
            return Err(ConfigError::SubstepTooLong {
                substep: self.render_substep_ms,
                tick: self.tick_interval_ms,
            });
        }
        Ok(())
    }

    /// Milliseconds between rendered frames.
    pub fn frame_time_ms(&self) -> u64 {
        (1000.0 / f64::from(self.render_fps.max(1))).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
        assert_eq!(EngineConfig::default().frame_time_ms(), 33);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"server_addr":"0.0.0.0:9000","max_clients":2}"#)
            .unwrap();
        assert_eq!(cfg.max_clients, 2);
        assert_eq!(cfg.tick_interval_ms, 50);
        assert_eq!(cfg.max_message_len, 128);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_addr = EngineConfig {
            server_addr: "localhost:notaport".into(),
            ..Default::default()
        };
        assert_eq!(
            bad_addr.validate(),
            Err(ConfigError::InvalidAddr("localhost:notaport".into()))
        );

        let no_clients = EngineConfig {
            max_clients: 0,
            ..Default::default()
        };
        assert_eq!(no_clients.validate(), Err(ConfigError::Zero("max_clients")));

        let long_substep = EngineConfig {
            tick_interval_ms: 20,
            render_substep_ms: 30,
            ..Default::default()
        };
        assert!(matches!(
            long_substep.validate(),
            Err(ConfigError::SubstepTooLong { .. })
        ));
    }
}
