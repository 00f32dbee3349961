//! Typed view of the notifications the remote understands.
//!
//! Parsing happens up front so that a malformed payload is rejected before
//! any state is touched.  Unrecognised (category, type) pairs parse to
//! `Ok(None)`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::Notification;
use crate::state::Mode;

pub const CAT_SYSTEM: &str = "system";
pub const CAT_PLUGIN: &str = "plugin";
pub const CAT_MULTIROOM: &str = "multiroom";
pub const CAT_VOLUME: &str = "volume";

#[derive(Debug, Error, PartialEq)]
#[error("malformed {category}/{kind} event: {reason}")]
pub struct MalformedEvent {
    pub category: String,
    pub kind: String,
    pub reason: String,
}

/// Full state carried by `system/state_changed`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub mode: Mode,
    #[serde(default, alias = "active_source_plugin")]
    pub active_source_plugin: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Optional state fields that may ride along on `system/transition_complete`.
///
/// `active_source_plugin` distinguishes "absent" (`None`) from an explicit
/// null (`Some(None)`).
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartialState {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(
        default,
        alias = "active_source_plugin",
        deserialize_with = "present_or_null"
    )]
    pub active_source_plugin: Option<Option<String>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub plugin: Option<String>,
}

impl ErrorPayload {
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown error")
    }

    /// Codes arrive as strings or numbers depending on the plugin.
    pub fn code(&self) -> Option<String> {
        match &self.code {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Partial update for one multiroom client.  Only `id` is required.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClientStatusPatch {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub volume: Option<i64>,
    #[serde(default)]
    pub muted: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct ClientRef {
    id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
struct OutputsPayload {
    #[serde(default)]
    multiroom: Option<bool>,
    #[serde(default)]
    equalizer: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct VolumePayload {
    volume: i64,
    #[serde(default, alias = "show_bar")]
    show_bar: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChanged(StateSnapshot),
    TransitionStart,
    TransitionComplete(PartialState),
    Error(ErrorPayload),
    /// `plugin/state_changed` and `plugin/metadata` both shallow-merge.
    PluginMetadata(Map<String, Value>),
    ClientStatus(ClientStatusPatch),
    ClientRemoved { id: String },
    OutputsChanged {
        multiroom: Option<bool>,
        equalizer: Option<bool>,
    },
    VolumeChanged { volume: i64, show_bar: bool },
}

impl Event {
    pub fn parse(n: &Notification) -> Result<Option<Event>, MalformedEvent> {
        let event = match (n.category.as_str(), n.kind.as_str()) {
            (CAT_SYSTEM, "state_changed") => Event::StateChanged(payload(n)?),
            (CAT_SYSTEM, "transition_start") => Event::TransitionStart,
            (CAT_SYSTEM, "transition_complete") => {
                Event::TransitionComplete(payload_or_default(n)?)
            }
            (CAT_SYSTEM, "error") => Event::Error(payload_or_default(n)?),
            (CAT_SYSTEM, "outputs_changed") => {
                let p: OutputsPayload = payload(n)?;
                Event::OutputsChanged {
                    multiroom: p.multiroom,
                    equalizer: p.equalizer,
                }
            }
            (CAT_PLUGIN, "state_changed") | (CAT_PLUGIN, "metadata") => match &n.data {
                Value::Object(map) => Event::PluginMetadata(map.clone()),
                other => return Err(malformed(n, format!("expected object, got {}", other))),
            },
            (CAT_MULTIROOM, "client_status") => Event::ClientStatus(payload(n)?),
            (CAT_MULTIROOM, "client_removed") => {
                let r: ClientRef = payload(n)?;
                Event::ClientRemoved { id: r.id }
            }
            (CAT_VOLUME, "changed") => {
                let v: VolumePayload = payload(n)?;
                Event::VolumeChanged {
                    volume: v.volume,
                    show_bar: v.show_bar,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn malformed(n: &Notification, reason: String) -> MalformedEvent {
    MalformedEvent {
        category: n.category.clone(),
        kind: n.kind.clone(),
        reason,
    }
}

fn payload<T: DeserializeOwned>(n: &Notification) -> Result<T, MalformedEvent> {
    serde_json::from_value(n.data.clone()).map_err(|e| malformed(n, e.to_string()))
}

/// Like `payload`, but a null/absent `data` yields the default value.
fn payload_or_default<T: DeserializeOwned + Default>(n: &Notification) -> Result<T, MalformedEvent> {
    if n.data.is_null() {
        return Ok(T::default());
    }
    payload(n)
}

fn present_or_null<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}
