//! Connection Controller
//!
//! Blocking-with-timeout scan and connect operations on top of the link
//! state machine. Only one operation is outstanding at a time; starting a
//! second one while the first is in flight is refused.

use crate::domain::filter::DeviceFilter;
use crate::domain::link::{LinkSnapshot, LinkStateMachine, TransitionError, Trigger};
use crate::domain::models::{ConnectOutcome, ConnectionState, DeviceAddress};
use crate::domain::settings::BleSettings;
use crate::infrastructure::radio::event_bus::RadioEventBus;
use crate::infrastructure::radio::subsystem::{
    probe_connect_forms, ConnectForm, RadioError, RadioSubsystem, ScanParams,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Conditions that are not ordinary scan/connect outcomes
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Failed to start scan: {0}")]
    ScanStart(RadioError),

    #[error("Radio event bus closed")]
    EventBusClosed,
}

pub struct ConnectionController {
    radio: Arc<dyn RadioSubsystem>,
    bus: RadioEventBus,
    connect_forms: Vec<ConnectForm>,
    scan_window: Duration,
    scan_interval: Duration,
    connect_timeout: Duration,
}

impl ConnectionController {
    /// Attach to the radio and probe which connect call forms it offers
    pub fn new(radio: Arc<dyn RadioSubsystem>, settings: &BleSettings) -> Self {
        let filter = DeviceFilter::new(settings.target_name.clone());
        let bus = RadioEventBus::new(LinkStateMachine::new(filter));
        radio.register_events(bus.clone());
        let connect_forms = probe_connect_forms(radio.as_ref());

        Self {
            radio,
            bus,
            connect_forms,
            scan_window: settings.scan_window(),
            scan_interval: settings.scan_interval(),
            connect_timeout: settings.connect_timeout(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.bus.state()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.bus.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Scan for the configured target and return the first match
    ///
    /// Runs until the radio reports the scan done or `duration` elapses,
    /// even when a match arrives early. `Ok(None)` means nothing matched.
    pub async fn scan_for_target(
        &self,
        duration: Duration,
    ) -> Result<Option<DeviceAddress>, ControllerError> {
        let deadline = Instant::now() + duration;
        self.bus.apply(Trigger::ScanStarted { deadline })?;

        let params = ScanParams {
            window: self.scan_window,
            interval: self.scan_interval,
            duration,
        };
        if let Err(e) = self.radio.start_scan(params) {
            self.bus.apply(Trigger::RequestFailed)?;
            return Err(ControllerError::ScanStart(e));
        }
        debug!("Scan started for {:?}", duration);

        let mut rx = self.bus.subscribe();
        let finished = timeout_at(deadline, async {
            rx.wait_for(|machine| machine.state() != ConnectionState::Scanning)
                .await
                .map(|_| ())
        })
        .await;

        match finished {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(ControllerError::EventBusClosed),
            Err(_) => {
                // The radio does not always report completion
                self.bus.apply(Trigger::ScanDeadline)?;
            }
        }

        let Some(session) = self.bus.snapshot().session else {
            return Ok(None);
        };
        let found = session.first_match().map(|device| {
            debug!(
                "Selected {} ({}, rssi {}) out of {} match(es)",
                device.address,
                device.name.as_deref().unwrap_or_default(),
                device.rssi,
                session.discovered.len()
            );
            device.address
        });
        Ok(found)
    }

    /// Connect to `address`, waiting up to the configured connect timeout
    pub async fn connect_to(
        &self,
        address: DeviceAddress,
    ) -> Result<ConnectOutcome, ControllerError> {
        let deadline = Instant::now() + self.connect_timeout;
        self.bus.apply(Trigger::ConnectRequested(address))?;

        if !self.issue_connect(address) {
            self.bus.apply(Trigger::RequestFailed)?;
            return Ok(ConnectOutcome::Unavailable);
        }

        let mut rx = self.bus.subscribe();
        let finished = timeout_at(deadline, async {
            rx.wait_for(|machine| machine.state() != ConnectionState::Connecting)
                .await
                .map(|_| ())
        })
        .await;

        let timed_out = match finished {
            Ok(Ok(())) => false,
            Ok(Err(_)) => return Err(ControllerError::EventBusClosed),
            Err(_) => {
                self.bus.apply(Trigger::ConnectTimeout)?;
                true
            }
        };

        // A completion racing the deadline still counts
        let link = self.snapshot();
        let outcome = match link.state {
            ConnectionState::Connected => {
                let foreign = link
                    .peer
                    .filter(|peer| peer.address.address != address.address);
                if let Some(peer) = foreign {
                    warn!("Linked to {} instead of {}", peer.address, address);
                }
                ConnectOutcome::Connected
            }
            _ if timed_out => ConnectOutcome::TimedOut,
            _ => ConnectOutcome::Dropped,
        };
        if outcome == ConnectOutcome::TimedOut {
            info!(
                "No connect event from {} within {:?}",
                address, self.connect_timeout
            );
        }
        Ok(outcome)
    }

    /// Send the connect request, falling back through the probed call forms
    fn issue_connect(&self, address: DeviceAddress) -> bool {
        for form in &self.connect_forms {
            match self.radio.connect(*form, address) {
                Ok(()) => {
                    debug!(
                        "Connect request for {} (addr_type {}) sent via {}",
                        address,
                        address.address_type.code(),
                        form
                    );
                    return true;
                }
                Err(RadioError::Unsupported(what)) => {
                    warn!("{} unsupported, trying next connect form", what);
                }
                Err(e) => {
                    warn!("Connect request for {} failed: {}", address, e);
                    return false;
                }
            }
        }

        warn!("Connect method unavailable");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::advertisement::{self, AD_TYPE_COMPLETE_NAME};
    use crate::domain::models::{BdAddr, RadioEvent};
    use std::sync::Mutex;

    const TARGET: &str = "Device-X";

    /// Radio double that records requests and lets the test drive events
    #[derive(Default)]
    struct ScriptedRadio {
        bus: Mutex<Option<RadioEventBus>>,
        forms: Vec<ConnectForm>,
        unsupported_at_call: Vec<ConnectForm>,
        reject_connect: bool,
        reject_scan: bool,
        scans: Mutex<Vec<ScanParams>>,
        connects: Mutex<Vec<(ConnectForm, DeviceAddress)>>,
    }

    impl ScriptedRadio {
        fn with_forms(forms: Vec<ConnectForm>) -> Self {
            Self {
                forms,
                ..Default::default()
            }
        }

        fn bus(&self) -> RadioEventBus {
            self.bus.lock().unwrap().clone().unwrap()
        }
    }

    impl RadioSubsystem for ScriptedRadio {
        fn register_events(&self, bus: RadioEventBus) {
            *self.bus.lock().unwrap() = Some(bus);
        }

        fn start_scan(&self, params: ScanParams) -> Result<(), RadioError> {
            if self.reject_scan {
                return Err(RadioError::NotActive);
            }
            self.scans.lock().unwrap().push(params);
            Ok(())
        }

        fn supports(&self, form: ConnectForm) -> bool {
            self.forms.contains(&form)
        }

        fn connect(&self, form: ConnectForm, address: DeviceAddress) -> Result<(), RadioError> {
            self.connects.lock().unwrap().push((form, address));
            if self.unsupported_at_call.contains(&form) {
                return Err(RadioError::Unsupported(form.to_string()));
            }
            if self.reject_connect {
                return Err(RadioError::Rejected("busy".to_string()));
            }
            Ok(())
        }
    }

    fn target_address() -> DeviceAddress {
        DeviceAddress::public(BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
    }

    fn other_address(last: u8) -> DeviceAddress {
        DeviceAddress::public(BdAddr([0x10, 0x20, 0x30, 0x40, 0x50, last]))
    }

    fn settings() -> BleSettings {
        BleSettings {
            target_name: TARGET.to_string(),
            ..Default::default()
        }
    }

    fn controller(radio: &Arc<ScriptedRadio>) -> ConnectionController {
        ConnectionController::new(radio.clone(), &settings())
    }

    fn device_x_adv() -> Vec<u8> {
        let mut adv = vec![0x09, AD_TYPE_COMPLETE_NAME];
        adv.extend_from_slice(b"Device-X");
        adv
    }

    /// Dispatch `event` on the radio bus after `delay` of virtual time
    fn emit_after(bus: RadioEventBus, delay: Duration, event: RadioEvent) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.dispatch(event);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_finds_target_address() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);
        let bus = radio.bus();

        emit_after(
            bus.clone(),
            Duration::from_millis(300),
            RadioEvent::ScanResult {
                address: target_address(),
                rssi: -42,
                adv_data: device_x_adv(),
            },
        );
        emit_after(bus, Duration::from_secs(2), RadioEvent::ScanDone);

        let started = Instant::now();
        let found = controller
            .scan_for_target(Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(
            found.map(|a| a.to_string()).as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        // runs to SCAN_DONE rather than stopping at the match
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(controller.state(), ConnectionState::ScanDone);

        let scans = radio.scans.lock().unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].duration, Duration::from_secs(10));
        assert_eq!(scans[0].window, Duration::from_millis(30));
        assert_eq!(scans[0].interval, Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_first_match_wins() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);
        let bus = radio.bus();

        for (ms, address) in [(100, other_address(1)), (200, target_address())] {
            emit_after(
                bus.clone(),
                Duration::from_millis(ms),
                RadioEvent::ScanResult {
                    address,
                    rssi: -70,
                    adv_data: advertisement::encode_name(TARGET),
                },
            );
        }
        emit_after(bus, Duration::from_millis(500), RadioEvent::ScanDone);

        let found = controller
            .scan_for_target(Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(found, Some(other_address(1)));
        let session = controller.snapshot().session.unwrap();
        assert_eq!(session.discovered.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_without_match_returns_none() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);
        let bus = radio.bus();

        emit_after(
            bus.clone(),
            Duration::from_millis(100),
            RadioEvent::ScanResult {
                address: other_address(1),
                rssi: -70,
                adv_data: advertisement::encode_name("Device-Y"),
            },
        );
        emit_after(bus, Duration::from_millis(400), RadioEvent::ScanDone);

        let found = controller
            .scan_for_target(Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_deadline_without_scan_done() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);

        emit_after(
            radio.bus(),
            Duration::from_secs(1),
            RadioEvent::ScanResult {
                address: target_address(),
                rssi: -42,
                adv_data: device_x_adv(),
            },
        );

        let started = Instant::now();
        let found = controller
            .scan_for_target(Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(found, Some(target_address()));
        assert_eq!(controller.state(), ConnectionState::ScanDone);

        // a late SCAN_DONE is absorbed without effect
        radio.bus().dispatch(RadioEvent::ScanDone);
        assert_eq!(controller.state(), ConnectionState::ScanDone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_start_rejected() {
        let radio = Arc::new(ScriptedRadio {
            reject_scan: true,
            ..ScriptedRadio::with_forms(vec![ConnectForm::Gap])
        });
        let controller = controller(&radio);

        let err = controller
            .scan_for_target(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::ScanStart(RadioError::NotActive)));
        assert_eq!(controller.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_on_event() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);

        emit_after(
            radio.bus(),
            Duration::from_millis(800),
            RadioEvent::PeripheralConnected {
                conn_handle: 64,
                address: target_address(),
            },
        );

        let started = Instant::now();
        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
        assert_eq!(started.elapsed(), Duration::from_millis(800));
        assert!(controller.is_connected());
        assert_eq!(
            radio.connects.lock().unwrap().as_slice(),
            &[(ConnectForm::Gap, target_address())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_at_five_seconds() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);

        let started = Instant::now();
        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        // not stuck in CONNECTING: a second attempt goes out to the radio
        emit_after(
            radio.bus(),
            Duration::from_millis(100),
            RadioEvent::PeripheralConnected {
                conn_handle: 1,
                address: target_address(),
            },
        );
        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
        assert_eq!(radio.connects.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_connect_is_visible_to_next_query() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);

        emit_after(
            radio.bus(),
            Duration::from_secs(6),
            RadioEvent::PeripheralConnected {
                conn_handle: 2,
                address: target_address(),
            },
        );

        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::TimedOut);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(controller.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_observed_outside_calls() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);
        let bus = radio.bus();

        emit_after(
            bus.clone(),
            Duration::from_millis(10),
            RadioEvent::PeripheralConnected {
                conn_handle: 5,
                address: target_address(),
            },
        );
        controller.connect_to(target_address()).await.unwrap();
        assert!(controller.is_connected());

        bus.dispatch(RadioEvent::PeripheralDisconnected {
            conn_handle: 5,
            address: target_address(),
        });
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(controller.snapshot().peer, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_dropped_before_established() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);

        emit_after(
            radio.bus(),
            Duration::from_secs(1),
            RadioEvent::PeripheralDisconnected {
                conn_handle: 0,
                address: target_address(),
            },
        );
        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_falls_back_to_legacy_form() {
        let radio = Arc::new(ScriptedRadio {
            unsupported_at_call: vec![ConnectForm::Gap],
            ..ScriptedRadio::with_forms(vec![ConnectForm::Gap, ConnectForm::Legacy])
        });
        let controller = controller(&radio);

        emit_after(
            radio.bus(),
            Duration::from_millis(50),
            RadioEvent::PeripheralConnected {
                conn_handle: 1,
                address: target_address(),
            },
        );
        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);

        let forms: Vec<ConnectForm> = radio
            .connects
            .lock()
            .unwrap()
            .iter()
            .map(|(form, _)| *form)
            .collect();
        assert_eq!(forms, vec![ConnectForm::Gap, ConnectForm::Legacy]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_unavailable_without_forms() {
        let radio = Arc::new(ScriptedRadio::with_forms(Vec::new()));
        let controller = controller(&radio);

        let started = Instant::now();
        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Unavailable);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(controller.state(), ConnectionState::Idle);
        assert!(radio.connects.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rejected_is_unavailable() {
        let radio = Arc::new(ScriptedRadio {
            reject_connect: true,
            ..ScriptedRadio::with_forms(vec![ConnectForm::Gap, ConnectForm::Legacy])
        });
        let controller = controller(&radio);

        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Unavailable);
        assert_eq!(controller.state(), ConnectionState::Idle);
        // rejection is final, no fallback attempt
        assert_eq!(radio.connects.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_operations_refused() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = Arc::new(controller(&radio));

        let scanning = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.scan_for_target(Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.state(), ConnectionState::Scanning);

        let err = controller.connect_to(target_address()).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Transition(TransitionError::Busy { .. })
        ));

        assert_eq!(scanning.await.unwrap().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_connect_during_next_scan() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);

        let outcome = controller.connect_to(target_address()).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::TimedOut);

        emit_after(
            radio.bus(),
            Duration::from_secs(1),
            RadioEvent::PeripheralConnected {
                conn_handle: 3,
                address: target_address(),
            },
        );
        let found = controller
            .scan_for_target(Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(found, None);
        assert!(controller.is_connected());
        assert_eq!(controller.snapshot().peer.map(|p| p.conn_handle), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_done_of_expired_scan_is_absorbed() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);
        let bus = radio.bus();

        // the radio never reports completion for the first scan in time
        let found = controller
            .scan_for_target(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(found, None);

        emit_after(bus.clone(), Duration::from_millis(100), RadioEvent::ScanDone);
        emit_after(
            bus.clone(),
            Duration::from_millis(600),
            RadioEvent::ScanResult {
                address: target_address(),
                rssi: -42,
                adv_data: device_x_adv(),
            },
        );
        emit_after(bus, Duration::from_millis(1500), RadioEvent::ScanDone);

        let started = Instant::now();
        let found = controller
            .scan_for_target(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        assert_eq!(found, Some(target_address()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_request_answering_during_new_connect() {
        let radio = Arc::new(ScriptedRadio::with_forms(vec![ConnectForm::Gap]));
        let controller = controller(&radio);

        let outcome = controller.connect_to(other_address(1)).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::TimedOut);

        emit_after(
            radio.bus(),
            Duration::from_secs(1),
            RadioEvent::PeripheralConnected {
                conn_handle: 9,
                address: other_address(1),
            },
        );
        let started = Instant::now();
        let outcome = controller.connect_to(target_address()).await.unwrap();

        // the radio holds a link, so the controller reports it
        assert_eq!(outcome, ConnectOutcome::Connected);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(
            controller.snapshot().peer.map(|p| p.address),
            Some(other_address(1))
        );
    }
}
