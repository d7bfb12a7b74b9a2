//! Boot Sequencer
//!
//! Brings the access point up once, then supervises the peripheral link
//! forever. A failed cycle is logged and the next one starts after the
//! usual pause.

use crate::domain::models::{ConnectOutcome, ConnectionState, DeviceAddress, NetworkConfig};
use crate::domain::settings::Settings;
use crate::infrastructure::access_point::{AccessPointManager, WlanInterface};
use crate::infrastructure::cellular::{CellularLinkMonitor, ModemSerial};
use crate::infrastructure::radio::ConnectionController;
use tracing::{error, info, warn};

/// What a single supervision cycle achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Already connected, nothing to do
    LinkAlive,
    NotFound,
    Connected(DeviceAddress),
    ConnectFailed(DeviceAddress, ConnectOutcome),
}

pub struct BootSequencer<W: WlanInterface, S: ModemSerial> {
    settings: Settings,
    access_point: AccessPointManager<W>,
    cellular: CellularLinkMonitor<S>,
    controller: ConnectionController,
}

impl<W: WlanInterface, S: ModemSerial> BootSequencer<W, S> {
    pub fn new(
        settings: Settings,
        access_point: AccessPointManager<W>,
        cellular: CellularLinkMonitor<S>,
        controller: ConnectionController,
    ) -> Self {
        Self {
            settings,
            access_point,
            cellular,
            controller,
        }
    }

    /// Run until the process is stopped
    pub async fn run(mut self) {
        self.start().await;

        info!("Entering main loop...");
        loop {
            self.tick().await;
        }
    }

    /// Bring up the access point; failure is logged and boot continues
    pub async fn start(&mut self) -> Option<NetworkConfig> {
        info!("Setting up WiFi AP...");
        let config = self.settings.access_point.config.clone();
        self.access_point.setup_logged(config).await
    }

    /// One supervised cycle, the cellular check, then the inter-cycle pause
    pub async fn tick(&mut self) -> Option<CycleOutcome> {
        let outcome = match self.run_cycle().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Cycle failed, restarting: {:#}", e);
                None
            }
        };

        if self.settings.cellular.enabled {
            if self.cellular.is_registered().await {
                info!("Cellular link registered");
            } else {
                warn!("Cellular link not registered");
            }
        }

        tokio::time::sleep(self.settings.cycle_interval()).await;
        outcome
    }

    /// Scan and connect unless the link is already up
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleOutcome> {
        let link = self.controller.snapshot();
        if let (ConnectionState::Connected, Some(peer)) = (link.state, link.peer) {
            info!("Link to {} still up", peer.address);
            return Ok(CycleOutcome::LinkAlive);
        }

        info!("Scanning BLE devices...");
        let scan_timeout = self.settings.ble.scan_timeout();
        let found = self.controller.scan_for_target(scan_timeout).await?;
        // an earlier connect request may have completed during the scan
        if self.controller.is_connected() {
            info!("Link came up during the scan");
            return Ok(CycleOutcome::LinkAlive);
        }
        let Some(address) = found else {
            info!("Target {} not found", self.settings.ble.target_name);
            return Ok(CycleOutcome::NotFound);
        };
        info!("Found device address: {}", address);

        match self.controller.connect_to(address).await? {
            ConnectOutcome::Connected => {
                info!("Device connected successfully: {}", address);
                Ok(CycleOutcome::Connected(address))
            }
            outcome => {
                warn!("Connection to {} failed: {:?}", address, outcome);
                Ok(CycleOutcome::ConnectFailed(address, outcome))
            }
        }
    }
}
