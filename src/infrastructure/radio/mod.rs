//! Radio Module
//!
//! Discovers and connects to the target BLE peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  ConnectionController                    │
//! │   scan_for_target() / connect_to()  (await + timeout)    │
//! └──────────────┬─────────────────────────────▲────────────┘
//!                │ requests                    │ watch
//!                ▼                             │
//! ┌──────────────────────┐   events   ┌────────┴─────────────┐
//! │    RadioSubsystem    │ ─────────▶ │    RadioEventBus     │
//! │  (driver context)    │            │  LinkStateMachine    │
//! └──────────────────────┘            └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`subsystem`] - Driver boundary, scan parameters and connect call forms
//! - [`event_bus`] - Event delivery into the link state machine
//! - [`controller`] - Blocking-with-timeout scan and connect operations

pub mod controller;
pub mod event_bus;
pub mod subsystem;

pub use controller::{ConnectionController, ControllerError};
pub use event_bus::RadioEventBus;
pub use subsystem::{ConnectForm, RadioError, RadioSubsystem, ScanParams};
