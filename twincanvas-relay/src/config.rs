//! Server configuration, loaded from the environment.

use std::str::FromStr;
use thiserror::Error;

/// Who may drive playback (`videoPlay` / `videoPause` / `videoSeek`) in
/// movie and screen rooms. Draw rooms ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlPolicy {
    /// Any member may control playback.
    #[default]
    AnyMember,
    /// Only the current broadcaster may control playback.
    BroadcasterOnly,
}

impl FromStr for ControlPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "anyMember" | "any" => Ok(Self::AnyMember),
            "broadcasterOnly" | "broadcaster" => Ok(Self::BroadcasterOnly),
            other => Err(ConfigError::Invalid {
                var: "TWINCANVAS_CONTROL_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum members per room
    pub max_members_per_room: usize,
    /// Frames queued per connection before further frames are dropped
    pub outbox_capacity: usize,
    /// WebSocket ping interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Close connections silent for this long (0 = never)
    pub idle_timeout_secs: u64,
    /// Playback control policy for movie/screen rooms
    pub control_policy: ControlPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            max_members_per_room: 100,
            outbox_capacity: 256,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
            control_policy: ControlPolicy::AnyMember,
        }
    }
}

impl ServerConfig {
    /// Read configuration from process environment variables.
    ///
    /// `PORT`, `TWINCANVAS_BIND`, `TWINCANVAS_MAX_MEMBERS`,
    /// `TWINCANVAS_OUTBOX_CAPACITY`, `TWINCANVAS_HEARTBEAT_SECS`, `TWINCANVAS_IDLE_TIMEOUT_SECS`,
    /// `TWINCANVAS_CONTROL_POLICY`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_var("PORT", &port)?;
            config.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(addr) = lookup("TWINCANVAS_BIND") {
            if addr.trim().is_empty() {
                return Err(ConfigError::Invalid { var: "TWINCANVAS_BIND", value: addr });
            }
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(max) = lookup("TWINCANVAS_MAX_MEMBERS") {
            config.max_members_per_room = parse_var("TWINCANVAS_MAX_MEMBERS", &max)?;
            if config.max_members_per_room == 0 {
                return Err(ConfigError::Invalid { var: "TWINCANVAS_MAX_MEMBERS", value: max });
            }
        }
        if let Some(capacity) = lookup("TWINCANVAS_OUTBOX_CAPACITY") {
            config.outbox_capacity = parse_var("TWINCANVAS_OUTBOX_CAPACITY", &capacity)?;
            if config.outbox_capacity == 0 {
                return Err(ConfigError::Invalid { var: "TWINCANVAS_OUTBOX_CAPACITY", value: capacity });
            }
        }
        if let Some(secs) = lookup("TWINCANVAS_HEARTBEAT_SECS") {
            config.heartbeat_interval_secs = parse_var("TWINCANVAS_HEARTBEAT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("TWINCANVAS_IDLE_TIMEOUT_SECS") {
            config.idle_timeout_secs = parse_var("TWINCANVAS_IDLE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(policy) = lookup("TWINCANVAS_CONTROL_POLICY") {
            config.control_policy = policy.parse()?;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}
