use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A push notification delivered by the backend over the event channel.
///
/// `data` is free-form; the (category, type) pair decides how it is read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Notification {
    pub fn new(category: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            category: category.into(),
            kind: kind.into(),
            data,
        }
    }

    /// True if this notification matches a (category, type) filter.
    /// A type filter of `"*"` matches every type in the category.
    pub fn matches(&self, category: &str, kind: &str) -> bool {
        self.category == category && (kind == "*" || self.kind == kind)
    }
}

/// Messages sent from the remote to the backend over the event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum ClientRequest {
    ActivateSource { plugin: String },
    SetMultiroom { enabled: bool },
    SetEqualizer { enabled: bool },
    /// Ask the backend to push a full `system/state_changed` snapshot.
    RequestState,
}

/// Status field shared by every HTTP reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

/// Reply to `set_volume`, `adjust_volume` and `get_volume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeReply {
    pub status: ApiStatus,
    #[serde(default)]
    pub volume: i64,
}

impl VolumeReply {
    pub fn success(volume: i64) -> Self {
        Self {
            status: ApiStatus::Success,
            volume,
        }
    }

    pub fn error() -> Self {
        Self {
            status: ApiStatus::Error,
            volume: 0,
        }
    }
}

/// Body of `POST /api/v1/volume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetVolumeBody {
    pub volume: u8,
    pub show_bar: bool,
}

/// Body of `POST /api/v1/volume/adjust`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdjustVolumeBody {
    pub delta: i32,
    pub show_bar: bool,
}

/// Reply to `update_setting`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsReply {
    pub status: ApiStatus,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_wire_shape() {
        let raw = json!({"category": "system", "type": "transition_start", "data": {}});
        let n: Notification = serde_json::from_value(raw).unwrap();
        assert_eq!(n.category, "system");
        assert_eq!(n.kind, "transition_start");

        let back = serde_json::to_value(&n).unwrap();
        assert_eq!(back["type"], "transition_start");
    }

    #[test]
    fn test_notification_missing_data_is_null() {
        let n: Notification =
            serde_json::from_str(r#"{"category":"plugin","type":"metadata"}"#).unwrap();
        assert!(n.data.is_null());
    }

    #[test]
    fn test_wildcard_match() {
        let n = Notification::new("multiroom", "client_status", Value::Null);
        assert!(n.matches("multiroom", "*"));
        assert!(n.matches("multiroom", "client_status"));
        assert!(!n.matches("system", "*"));
        assert!(!n.matches("multiroom", "client_removed"));
    }

    #[test]
    fn test_client_request_tagging() {
        let req = ClientRequest::ActivateSource {
            plugin: "bluetooth".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"cmd": "ActivateSource", "plugin": "bluetooth"}));
    }

    #[test]
    fn test_error_reply_without_volume() {
        let r: VolumeReply = serde_json::from_str(r#"{"status":"error"}"#).unwrap();
        assert_eq!(r.status, ApiStatus::Error);
        assert_eq!(r.volume, 0);
    }
}
