//! Radio Subsystem Boundary
//!
//! The firmware radio driver as seen by the controller: scan and connect
//! requests going out, events coming back through a [`RadioEventBus`].

use crate::domain::models::DeviceAddress;
use crate::infrastructure::radio::event_bus::RadioEventBus;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Parameters for a single scan request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub window: Duration,
    pub interval: Duration,
    pub duration: Duration,
}

/// Call forms a firmware variant may expose for connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectForm {
    /// `gap_connect(addr_type, addr)`
    Gap,
    /// Older firmware `connect(addr_type, addr)`
    Legacy,
}

impl ConnectForm {
    /// Forms in the order they should be tried
    pub const PREFERENCE: [ConnectForm; 2] = [ConnectForm::Gap, ConnectForm::Legacy];
}

impl fmt::Display for ConnectForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gap => f.write_str("gap_connect"),
            Self::Legacy => f.write_str("connect"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("{0} is not supported by this radio")]
    Unsupported(String),

    #[error("Radio rejected request: {0}")]
    Rejected(String),

    #[error("Radio is not active")]
    NotActive,
}

/// Driver for the short-range radio
///
/// Implementations deliver events from their own execution context by
/// calling [`RadioEventBus::dispatch`] on the bus handed to `register_events`.
pub trait RadioSubsystem: Send + Sync {
    fn register_events(&self, bus: RadioEventBus);

    fn start_scan(&self, params: ScanParams) -> Result<(), RadioError>;

    /// Whether this firmware exposes the given connect call form
    fn supports(&self, form: ConnectForm) -> bool;

    fn connect(&self, form: ConnectForm, address: DeviceAddress) -> Result<(), RadioError>;
}

/// Probe the radio once and keep the usable connect forms in preference order
pub fn probe_connect_forms(radio: &dyn RadioSubsystem) -> Vec<ConnectForm> {
    let forms: Vec<ConnectForm> = ConnectForm::PREFERENCE
        .into_iter()
        .filter(|form| radio.supports(*form))
        .collect();

    match forms.first() {
        Some(ConnectForm::Gap) => info!("Radio connect capability: {}", ConnectForm::Gap),
        Some(form) => info!("Radio connect capability: falling back to {}", form),
        None => warn!("Radio exposes no connect method, connections unavailable"),
    }
    forms
}
