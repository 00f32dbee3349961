//! reqwest client for the appliance's HTTP command API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use amp_proto::config::BackendConfig;
use amp_proto::protocol::{AdjustVolumeBody, SetVolumeBody, SettingsReply, VolumeReply};

use crate::backend::{SettingsApi, VolumeApi};
use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ApiError::Unavailable);
        }
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(format!("amp-remote/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        info!("HTTP backend at {}", base_url);
        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &BackendConfig) -> ApiResult<Self> {
        Self::new(config.http_base_url(), config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn read_reply<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl VolumeApi for HttpBackend {
    async fn set_volume(&self, volume: u8, show_bar: bool) -> ApiResult<VolumeReply> {
        debug!("HTTP: set volume {}", volume);
        let response = self
            .http
            .post(self.url("/volume"))
            .json(&SetVolumeBody { volume, show_bar })
            .send()
            .await?;
        Self::read_reply(response).await
    }

    async fn adjust_volume(&self, delta: i32, show_bar: bool) -> ApiResult<VolumeReply> {
        debug!("HTTP: adjust volume {:+}", delta);
        let response = self
            .http
            .post(self.url("/volume/adjust"))
            .json(&AdjustVolumeBody { delta, show_bar })
            .send()
            .await?;
        Self::read_reply(response).await
    }

    async fn get_volume(&self) -> ApiResult<VolumeReply> {
        let response = self.http.get(self.url("/volume")).send().await?;
        Self::read_reply(response).await
    }
}

#[async_trait]
impl SettingsApi for HttpBackend {
    async fn update_setting(&self, group: &str, payload: Value) -> ApiResult<SettingsReply> {
        debug!("HTTP: update settings group {}", group);
        let response = self
            .http
            .post(self.url(&format!("/settings/{}", group)))
            .json(&payload)
            .send()
            .await?;
        Self::read_reply(response).await
    }
}
