use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operating mode of the appliance, as reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Idle,
    StreamingActive,
    BluetoothActive,
    LineInActive,
}

impl Mode {
    /// i18n key for the source label shown in the header.
    pub fn label_key(&self) -> &'static str {
        match self {
            Mode::Idle => "source.idle",
            Mode::StreamingActive => "source.streaming",
            Mode::BluetoothActive => "source.bluetooth",
            Mode::LineInActive => "source.line_in",
        }
    }
}

/// Backend-reported error, kept until the next successful state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub message: String,
    pub code: Option<String>,
    pub plugin: Option<String>,
    pub received_at: DateTime<Local>,
}

/// Multiroom status of one playback client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientStatus {
    pub id: String,
    pub name: String,
    pub connected: bool,
    /// 0..=100
    pub volume: u8,
    pub muted: bool,
}

/// Canonical appliance state.  Only the reconciler writes to it; everything
/// else reads a reference or a clone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemState {
    pub mode: Mode,
    pub is_transitioning: bool,
    pub active_source_plugin: Option<String>,
    pub metadata: Map<String, Value>,
    pub last_error: Option<ErrorInfo>,
    #[serde(default)]
    pub multiroom_clients: BTreeMap<String, ClientStatus>,
    #[serde(default)]
    pub multiroom_enabled: bool,
    #[serde(default)]
    pub equalizer_enabled: bool,
}

impl SystemState {
    /// A source is active, not mid-transition, and the plugin does not
    /// report itself paused or stopped.
    pub fn is_playing(&self) -> bool {
        if self.mode == Mode::Idle || self.is_transitioning {
            return false;
        }
        !matches!(
            self.metadata.get("status").and_then(Value::as_str),
            Some("pause") | Some("stop")
        )
    }

    /// Track title from plugin metadata (`title`, falling back to `track`).
    pub fn track_title(&self) -> Option<&str> {
        self.metadata
            .get("title")
            .or_else(|| self.metadata.get("track"))
            .and_then(Value::as_str)
    }

    pub fn source_label(&self) -> &'static str {
        self.mode.label_key()
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn is_source_active(&self, plugin: &str) -> bool {
        self.active_source_plugin.as_deref() == Some(plugin)
    }

    pub fn connected_clients(&self) -> impl Iterator<Item = &ClientStatus> {
        self.multiroom_clients.values().filter(|c| c.connected)
    }
}
