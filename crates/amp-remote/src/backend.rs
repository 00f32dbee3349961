//! Seams to the backend command API.  `http::HttpBackend` is the real
//! implementation; tests substitute scripted fakes.

use async_trait::async_trait;
use serde_json::Value;

use amp_proto::protocol::{SettingsReply, VolumeReply};

use crate::error::ApiResult;

#[async_trait]
pub trait VolumeApi: Send + Sync {
    async fn set_volume(&self, volume: u8, show_bar: bool) -> ApiResult<VolumeReply>;
    async fn adjust_volume(&self, delta: i32, show_bar: bool) -> ApiResult<VolumeReply>;
    async fn get_volume(&self) -> ApiResult<VolumeReply>;
}

#[async_trait]
pub trait SettingsApi: Send + Sync {
    async fn update_setting(&self, group: &str, payload: Value) -> ApiResult<SettingsReply>;
}
