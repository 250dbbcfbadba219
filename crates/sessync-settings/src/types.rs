//! Settings sections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Remote endpoints.
    pub server: ServerSettings,
    /// Event connection behaviour.
    pub connection: ConnectionSettings,
    /// Synchronization pipeline behaviour.
    pub sync: PipelineSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Remote endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Base URL of the session REST API.
    pub rest_url: String,
    /// Base URL of the event service. Derived from `rest_url` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_url: Option<String>,
    /// Base URL of the type-tag service. Tags are derived locally when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_service_url: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            rest_url: "http://localhost:8000".to_string(),
            events_url: None,
            type_service_url: None,
        }
    }
}

/// Event connection behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Keepalive ping interval in milliseconds. `0` disables pings.
    pub ping_interval_ms: u64,
    /// Timeout for opening the connection in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ConnectionSettings {
    /// Keepalive interval, if enabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Synchronization pipeline behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Upper bound for a single remote fetch in milliseconds. `0` disables it.
    pub fetch_timeout_ms: u64,
    /// Per-sequence buffer for slow subscribers.
    pub broadcast_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 30_000,
            broadcast_capacity: 256,
        }
    }
}

impl PipelineSettings {
    /// Fetch timeout, if enabled.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive. `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_durations() {
        let conn = ConnectionSettings {
            ping_interval_ms: 0,
            ..Default::default()
        };
        assert!(conn.ping_interval().is_none());

        let sync = PipelineSettings {
            fetch_timeout_ms: 0,
            ..Default::default()
        };
        assert!(sync.fetch_timeout().is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(SyncSettings::default()).unwrap();
        assert_eq!(json["server"]["restUrl"], "http://localhost:8000");
        assert_eq!(json["sync"]["fetchTimeoutMs"], 30_000);
        assert!(json["server"].get("eventsUrl").is_none());
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let settings: SyncSettings =
            serde_json::from_value(serde_json::json!({"connection": {"pingIntervalMs": 5}}))
                .unwrap();
        assert_eq!(settings.connection.ping_interval_ms, 5);
        assert_eq!(settings.connection.connect_timeout_ms, 10_000);
    }
}
