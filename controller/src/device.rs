use std::{future::Future, time::Duration};

use anyhow::Context;
use reqwest::Client;
use tracing::debug;

use heater_common::{config::DeviceConfig, DeviceStatus, Mode, ModeCommand};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("heater did not answer within {0} ms")]
    Timeout(u64),

    #[error("heater unreachable: {0}")]
    Unreachable(String),

    #[error("heater answered with HTTP {0}")]
    Rejected(u16),

    #[error("malformed heater response: {0}")]
    Decode(String),
}

impl DeviceError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unreachable(_))
    }
}

pub trait HeaterDevice: Send + Sync + 'static {
    fn fetch_status(&self) -> impl Future<Output = Result<DeviceStatus, DeviceError>> + Send;

    fn send_mode(&self, mode: Mode) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpHeaterDevice {
    http: Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpHeaterDevice {
    pub fn new(config: &DeviceConfig, timeout_ms: u64) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build heater http client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, err: reqwest::Error) -> DeviceError {
        if err.is_timeout() {
            DeviceError::Timeout(self.timeout_ms)
        } else if let Some(status) = err.status() {
            DeviceError::Rejected(status.as_u16())
        } else if err.is_decode() {
            DeviceError::Decode(err.to_string())
        } else {
            DeviceError::Unreachable(err.to_string())
        }
    }
}

impl HeaterDevice for HttpHeaterDevice {
    async fn fetch_status(&self) -> Result<DeviceStatus, DeviceError> {
        let url = format!("{}/status", self.base_url);
        debug!(url = %url, "fetching heater status");

        self.http
            .get(&url)
            .send()
            .await
            .map_err(|err| self.classify(err))?
            .error_for_status()
            .map_err(|err| self.classify(err))?
            .json::<DeviceStatus>()
            .await
            .map_err(|err| self.classify(err))
    }

    async fn send_mode(&self, mode: Mode) -> Result<(), DeviceError> {
        let url = format!("{}/mode", self.base_url);
        debug!(url = %url, mode = %mode, "sending heater mode");

        self.http
            .post(&url)
            .json(&ModeCommand { mode })
            .send()
            .await
            .map_err(|err| self.classify(err))?
            .error_for_status()
            .map_err(|err| self.classify(err))?;
        Ok(())
    }
}
