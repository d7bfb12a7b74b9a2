//! Peripheral Link State Machine
//!
//! Every change to scan/connect state goes through [`LinkStateMachine::apply`],
//! whether it comes from a radio event, a deadline or an API call.
//!
//! Radio completions may arrive after the call that requested them has
//! given up. A late PERIPHERAL_CONNECTED is kept and shows up in the state
//! the next call sees; a late SCAN_DONE from an expired scan is swallowed so
//! it cannot end the scan that follows.
//!
//! ```text
//!  IDLE / SCAN_DONE / DISCONNECTED
//!     │                       │
//!     │ scan_for_target       │ connect_to
//!     ▼                       ▼
//!  SCANNING               CONNECTING ──── timeout / drop ───▶ DISCONNECTED
//!     │ SCAN_RESULT: keep     │                                    ▲
//!     │   filtered matches    │ PERIPHERAL_CONNECTED               │
//!     ▼ SCAN_DONE / deadline  ▼                                    │
//!  SCAN_DONE              CONNECTED ── PERIPHERAL_DISCONNECTED ────┘
//! ```

use crate::domain::advertisement;
use crate::domain::filter::DeviceFilter;
use crate::domain::models::{BdAddr, ConnectionState, DeviceAddress, DiscoveredDevice, RadioEvent};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Devices collected by one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    pub deadline: Instant,
    pub discovered: Vec<DiscoveredDevice>,
}

impl ScanSession {
    fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            discovered: Vec::new(),
        }
    }

    /// First matching device in arrival order
    pub fn first_match(&self) -> Option<&DiscoveredDevice> {
        self.discovered.first()
    }
}

/// An established link to the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerLink {
    pub conn_handle: u16,
    pub address: DeviceAddress,
}

/// Inputs accepted by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    ScanStarted { deadline: Instant },
    ScanDeadline,
    ConnectRequested(DeviceAddress),
    ConnectTimeout,
    /// The radio refused the request that opened the current phase
    RequestFailed,
    Radio(RadioEvent),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot {action} while {state}")]
    Busy {
        action: &'static str,
        state: ConnectionState,
    },

    #[error("Connect event for {got} while waiting for {expected}")]
    UnexpectedPeer {
        expected: DeviceAddress,
        got: DeviceAddress,
    },

    #[error("Unsolicited connect event for {address} while {state}")]
    UnsolicitedConnect {
        address: DeviceAddress,
        state: ConnectionState,
    },

    #[error("Disconnect event for unknown handle {conn_handle}")]
    UnknownHandle { conn_handle: u16 },
}

/// Read-only copy of the controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub state: ConnectionState,
    pub session: Option<ScanSession>,
    pub peer: Option<PeerLink>,
}

#[derive(Debug)]
pub struct LinkStateMachine {
    filter: DeviceFilter,
    state: ConnectionState,
    /// State to return to if the radio refuses the request that left it
    resume_state: ConnectionState,
    session: Option<ScanSession>,
    /// Last address passed to `connect_to`
    requested: Option<DeviceAddress>,
    /// Connect requests the radio has not answered yet
    outstanding: Vec<BdAddr>,
    /// Scans sealed by their deadline whose SCAN_DONE is still due
    stale_scan_dones: u32,
    peer: Option<PeerLink>,
}

impl LinkStateMachine {
    pub fn new(filter: DeviceFilter) -> Self {
        Self {
            filter,
            state: ConnectionState::Idle,
            resume_state: ConnectionState::Idle,
            session: None,
            requested: None,
            outstanding: Vec::new(),
            stale_scan_dones: 0,
            peer: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            session: self.session.clone(),
            peer: self.peer,
        }
    }

    /// Apply one trigger; `Ok(true)` when observable state changed
    ///
    /// On error the state is left exactly as it was.
    pub fn apply(&mut self, trigger: Trigger) -> Result<bool, TransitionError> {
        match trigger {
            Trigger::ScanStarted { deadline } => self.start_scan(deadline),
            Trigger::ScanDeadline => Ok(self.expire_scan()),
            Trigger::ConnectRequested(address) => self.start_connect(address),
            Trigger::ConnectTimeout => Ok(self.abort_connect()),
            Trigger::RequestFailed => Ok(self.resume()),
            Trigger::Radio(event) => self.on_radio_event(event),
        }
    }

    fn start_scan(&mut self, deadline: Instant) -> Result<bool, TransitionError> {
        match self.state {
            ConnectionState::Idle | ConnectionState::ScanDone | ConnectionState::Disconnected => {
                self.resume_state = self.state;
                self.state = ConnectionState::Scanning;
                self.session = Some(ScanSession::new(deadline));
                Ok(true)
            }
            state => Err(TransitionError::Busy {
                action: "start a scan",
                state,
            }),
        }
    }

    /// Seal the scan once its deadline has passed
    fn expire_scan(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if self.state != ConnectionState::Scanning || Instant::now() < session.deadline {
            return false;
        }

        // The radio is still scanning and owes us a SCAN_DONE
        self.stale_scan_dones += 1;
        self.seal_scan("deadline reached")
    }

    fn on_scan_done(&mut self) -> bool {
        if self.stale_scan_dones > 0 {
            self.stale_scan_dones -= 1;
            debug!("SCAN_DONE from an expired scan absorbed");
            return false;
        }
        self.seal_scan("radio reported done")
    }

    fn seal_scan(&mut self, reason: &str) -> bool {
        if self.state != ConnectionState::Scanning {
            return false;
        }
        let found = self.session.as_ref().map_or(0, |s| s.discovered.len());
        debug!("Scan finished ({}), {} matching device(s)", reason, found);

        self.state = match self.peer {
            Some(peer) => {
                info!("Link to {} came up during the scan", peer.address);
                ConnectionState::Connected
            }
            None => ConnectionState::ScanDone,
        };
        true
    }

    fn start_connect(&mut self, address: DeviceAddress) -> Result<bool, TransitionError> {
        match self.state {
            ConnectionState::Idle | ConnectionState::ScanDone | ConnectionState::Disconnected => {
                self.resume_state = self.state;
                self.state = ConnectionState::Connecting;
                self.requested = Some(address);
                if !self.outstanding.contains(&address.address) {
                    self.outstanding.push(address.address);
                }
                self.peer = None;
                Ok(true)
            }
            state => Err(TransitionError::Busy {
                action: "connect",
                state,
            }),
        }
    }

    fn abort_connect(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        true
    }

    fn resume(&mut self) -> bool {
        match self.state {
            ConnectionState::Scanning => {
                self.session = None;
                // a late link may have come up in between
                self.state = match self.peer {
                    Some(_) => ConnectionState::Connected,
                    None => self.resume_state,
                };
            }
            ConnectionState::Connecting => {
                if let Some(requested) = self.requested.take() {
                    self.outstanding.retain(|a| *a != requested.address);
                }
                self.state = self.resume_state;
            }
            _ => return false,
        }
        true
    }

    fn on_radio_event(&mut self, event: RadioEvent) -> Result<bool, TransitionError> {
        match event {
            RadioEvent::ScanResult {
                address,
                rssi,
                adv_data,
            } => Ok(self.on_scan_result(address, rssi, &adv_data)),
            RadioEvent::ScanDone => Ok(self.on_scan_done()),
            RadioEvent::PeripheralConnected {
                conn_handle,
                address,
            } => self.on_connected(conn_handle, address),
            RadioEvent::PeripheralDisconnected {
                conn_handle,
                address,
            } => self.on_disconnected(conn_handle, address),
        }
    }

    fn on_scan_result(&mut self, address: DeviceAddress, rssi: i8, adv_data: &[u8]) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if self.state != ConnectionState::Scanning {
            trace!("Late scan result from {} ignored", address);
            return false;
        }

        let name = advertisement::parse_name(adv_data);
        if !self.filter.matches(name.as_deref()) {
            return false;
        }

        info!(
            "Found target device: {} address: {} rssi: {}",
            self.filter.target(),
            address,
            rssi
        );
        session.discovered.push(DiscoveredDevice {
            address,
            name,
            rssi,
        });
        true
    }

    fn on_connected(
        &mut self,
        conn_handle: u16,
        address: DeviceAddress,
    ) -> Result<bool, TransitionError> {
        // Address type is ignored, some stacks report a resolved address
        let awaited = self.outstanding.contains(&address.address);
        let current = self
            .requested
            .is_some_and(|requested| requested.address == address.address);

        match self.state {
            ConnectionState::Connected
                if self.peer.is_some_and(|peer| peer.conn_handle == conn_handle) =>
            {
                return Ok(false);
            }
            ConnectionState::Connecting if !awaited => {
                // requested is always set while connecting
                let expected = self.requested.unwrap_or(address);
                return Err(TransitionError::UnexpectedPeer {
                    expected,
                    got: address,
                });
            }
            ConnectionState::Scanning if awaited => {
                info!("Late connect completion for {} during scan", address);
                self.outstanding.retain(|a| *a != address.address);
                self.peer = Some(PeerLink {
                    conn_handle,
                    address,
                });
                return Ok(true);
            }
            ConnectionState::Connecting if !current => {
                info!("Adopting link to {} from an earlier request", address);
            }
            ConnectionState::Connecting => {}
            ConnectionState::Idle | ConnectionState::ScanDone | ConnectionState::Disconnected
                if awaited =>
            {
                debug!("Absorbing late connect completion for {}", address);
            }
            state => {
                return Err(TransitionError::UnsolicitedConnect { address, state });
            }
        }

        info!("Connected to device: {} (handle {})", address, conn_handle);
        self.outstanding.retain(|a| *a != address.address);
        self.state = ConnectionState::Connected;
        self.peer = Some(PeerLink {
            conn_handle,
            address,
        });
        Ok(true)
    }

    fn on_disconnected(
        &mut self,
        conn_handle: u16,
        address: DeviceAddress,
    ) -> Result<bool, TransitionError> {
        let holds_handle = self.peer.is_some_and(|peer| peer.conn_handle == conn_handle);

        match self.state {
            ConnectionState::Connected => {
                if !holds_handle {
                    return Err(TransitionError::UnknownHandle { conn_handle });
                }
                info!("Device disconnected: {}", address);
                self.peer = None;
                self.state = ConnectionState::Disconnected;
                Ok(true)
            }
            ConnectionState::Connecting => {
                if !self
                    .requested
                    .is_some_and(|requested| requested.address == address.address)
                {
                    return Err(TransitionError::UnknownHandle { conn_handle });
                }
                info!("Device {} dropped the link while connecting", address);
                self.outstanding.retain(|a| *a != address.address);
                self.state = ConnectionState::Disconnected;
                Ok(true)
            }
            ConnectionState::Scanning if holds_handle => {
                info!("Device disconnected during scan: {}", address);
                self.peer = None;
                Ok(true)
            }
            _ => {
                trace!("Disconnect for {} ignored while {}", address, self.state);
                Ok(false)
            }
        }
    }
}
