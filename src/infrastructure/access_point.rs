//! Wi-Fi Access Point Bring-up
//!
//! One-shot configuration of the AP interface. The interface is cycled off
//! and on before the config is applied, so calling `setup` again is safe.

use crate::domain::models::NetworkConfig;
use crate::domain::settings::{AccessPointConfig, AccessPointSettings};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Driver for the WLAN interface in AP mode
pub trait WlanInterface: Send {
    fn set_active(&mut self, active: bool) -> anyhow::Result<()>;

    fn configure(&mut self, config: &AccessPointConfig) -> anyhow::Result<()>;

    /// Current (ip, netmask, gateway, dns)
    fn ifconfig(&self) -> anyhow::Result<NetworkConfig>;
}

#[derive(Error, Debug)]
pub enum AccessPointError {
    #[error("Failed to deactivate interface: {0}")]
    Deactivate(String),

    #[error("Failed to activate interface: {0}")]
    Activate(String),

    #[error("Failed to apply AP configuration: {0}")]
    Configure(String),

    #[error("Failed to read interface configuration: {0}")]
    Ifconfig(String),
}

pub struct AccessPointManager<W: WlanInterface> {
    wlan: W,
    restart_delay: Duration,
    settle_delay: Duration,
}

impl<W: WlanInterface> AccessPointManager<W> {
    pub fn new(wlan: W, settings: &AccessPointSettings) -> Self {
        Self {
            wlan,
            restart_delay: Duration::from_millis(settings.restart_delay_ms),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
        }
    }

    /// Bring the AP up with `config` and return the interface addresses
    pub async fn setup(
        &mut self,
        config: AccessPointConfig,
    ) -> Result<NetworkConfig, AccessPointError> {
        // Disable first so stale config does not conflict
        self.wlan
            .set_active(false)
            .map_err(|e| AccessPointError::Deactivate(e.to_string()))?;
        tokio::time::sleep(self.restart_delay).await;
        self.wlan
            .set_active(true)
            .map_err(|e| AccessPointError::Activate(e.to_string()))?;

        self.wlan
            .configure(&config)
            .map_err(|e| AccessPointError::Configure(e.to_string()))?;

        tokio::time::sleep(self.settle_delay).await;

        let network = self
            .wlan
            .ifconfig()
            .map_err(|e| AccessPointError::Ifconfig(e.to_string()))?;

        info!("WiFi AP started");
        info!(
            "SSID: {}, channel: {}, auth mode: {}",
            config.ssid, config.channel, config.auth_mode
        );
        info!("IP address: {}, netmask: {}", network.ip, network.netmask);
        info!("Gateway: {}, DNS: {}", network.gateway, network.dns);
        Ok(network)
    }

    /// `setup` for callers that only need to know whether the AP came up
    pub async fn setup_logged(&mut self, config: AccessPointConfig) -> Option<NetworkConfig> {
        match self.setup(config).await {
            Ok(network) => Some(network),
            Err(e) => {
                error!("WiFi AP startup failed: {}", e);
                None
            }
        }
    }
}
