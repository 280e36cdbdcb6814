//! Client configuration.
//!
//! ## Keys (TOML file and/or `PRESENCE_*` environment)
//!
//! | Key                       | Default            | Description                          |
//! |---------------------------|--------------------|--------------------------------------|
//! | `endpoint`                | `127.0.0.1:7400`   | World server `host:port`             |
//! | `token`                   | *(empty)*          | Join credential                      |
//! | `local_id`                | *(empty)*          | Local participant id                 |
//! | `sub_world_id`            | `lobby`            | Sub-world to join                    |
//! | `report_interval_ms`      | `100`              | Outbound state cadence               |
//! | `reconcile_duration_ms`   | `100`              | Remote motion smoothing window       |
//! | `reconcile_step_ms`       | `16`               | Smoothing step cadence               |
//! | `room_status_interval_ms` | `3000`             | Headcount / latency refresh          |
//! | `connect_timeout_ms`      | `5000`             | TCP connect timeout                  |
//! | `call_timeout_ms`         | `10000`            | Request/response timeout             |
//! | `heartbeat_interval_ms`   | `5000`             | Ping cadence                         |
//! | `heartbeat_timeout_ms`    | `15000`            | Silence before a forced disconnect   |
//!
//! Environment variables win over the file: `PRESENCE_SUB_WORLD_ID=plaza`.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Everything a session needs, with durations resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub endpoint: String,
    pub token: String,
    pub local_id: String,
    pub sub_world_id: String,
    pub report_interval: Duration,
    pub reconcile_duration: Duration,
    pub reconcile_step: Duration,
    pub room_status_interval: Duration,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl SessionConfig {
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        local_id: impl Into<String>,
        sub_world_id: impl Into<String>,
    ) -> Self {
        ClientSettings {
            endpoint: endpoint.into(),
            token: token.into(),
            local_id: local_id.into(),
            sub_world_id: sub_world_id.into(),
            ..Default::default()
        }
        .session_config()
    }
}

/// Wall-clock milliseconds since the Unix epoch, as sent in the join request.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Serialisable settings as they appear in files and the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub endpoint: String,
    pub token: String,
    pub local_id: String,
    pub sub_world_id: String,
    pub report_interval_ms: u64,
    pub reconcile_duration_ms: u64,
    pub reconcile_step_ms: u64,
    pub room_status_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:7400".to_string(),
            token: String::new(),
            local_id: String::new(),
            sub_world_id: "lobby".to_string(),
            report_interval_ms: 100,
            reconcile_duration_ms: 100,
            reconcile_step_ms: 16,
            room_status_interval_ms: 3_000,
            connect_timeout_ms: 5_000,
            call_timeout_ms: 10_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
        }
    }
}

impl ClientSettings {
    /// Layer an optional TOML file under `PRESENCE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix("PRESENCE").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Same layering, from an in-memory TOML document instead of a file.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn session_config(&self) -> SessionConfig {
        // A zero period would make the tokio interval panic.
        let ms = |v: u64| Duration::from_millis(v.max(1));
        SessionConfig {
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            local_id: self.local_id.clone(),
            sub_world_id: self.sub_world_id.clone(),
            report_interval: ms(self.report_interval_ms),
            reconcile_duration: Duration::from_millis(self.reconcile_duration_ms),
            reconcile_step: ms(self.reconcile_step_ms),
            room_status_interval: ms(self.room_status_interval_ms),
            connect_timeout: ms(self.connect_timeout_ms),
            call_timeout: ms(self.call_timeout_ms),
            heartbeat_interval: ms(self.heartbeat_interval_ms),
            heartbeat_timeout: ms(self.heartbeat_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
