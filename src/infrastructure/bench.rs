//! Bench Backends
//!
//! Stand-ins for the radio, WLAN interface and modem UART so the controller
//! runs on a development host. The bench radio delivers its events from a
//! dedicated thread, the same way the firmware raises them from interrupt
//! context.

use crate::domain::advertisement;
use crate::domain::models::{AddressType, DeviceAddress, NetworkConfig, RadioEvent};
use crate::domain::settings::AccessPointConfig;
use crate::infrastructure::access_point::WlanInterface;
use crate::infrastructure::cellular::{ModemSerial, REGISTRATION_QUERY};
use crate::infrastructure::radio::{
    ConnectForm, RadioError, RadioEventBus, RadioSubsystem, ScanParams,
};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// A peripheral advertising within range of the bench radio
#[derive(Debug, Clone)]
pub struct BenchPeripheral {
    pub name: Option<String>,
    pub address: DeviceAddress,
    pub rssi: i8,
    pub connectable: bool,
}

impl BenchPeripheral {
    fn adv_data(&self) -> Vec<u8> {
        match &self.name {
            Some(name) => advertisement::encode_name(name),
            // flags only
            None => vec![0x02, advertisement::AD_TYPE_FLAGS, 0x06],
        }
    }
}

/// Simulated radio that answers `gap_connect` only
pub struct BenchRadio {
    bus: Mutex<Option<RadioEventBus>>,
    peripherals: Arc<Vec<BenchPeripheral>>,
    next_handle: AtomicU16,
    connect_latency: Duration,
}

impl BenchRadio {
    pub fn new(peripherals: Vec<BenchPeripheral>) -> Self {
        Self {
            bus: Mutex::new(None),
            peripherals: Arc::new(peripherals),
            next_handle: AtomicU16::new(1),
            connect_latency: Duration::from_millis(400),
        }
    }

    /// The target peripheral plus some unrelated traffic
    pub fn neighbourhood(target_name: &str) -> anyhow::Result<Vec<BenchPeripheral>> {
        // (addr_type wire code, address, name, rssi, connectable)
        let table = [
            (1, "C4:1A:7E:02:11:9B", Some("Mi Band 7"), -81, false),
            (1, "5D:02:E3:44:80:1C", None, -90, false),
            (0, "E8:9F:6D:31:42:70", Some(target_name), -58, true),
        ];

        table
            .into_iter()
            .map(
                |(code, address, name, rssi, connectable)| -> anyhow::Result<BenchPeripheral> {
                    let address_type = AddressType::from_code(code)
                        .ok_or_else(|| anyhow::anyhow!("Unknown address type {}", code))?;
                    Ok(BenchPeripheral {
                        name: name.map(str::to_string),
                        address: DeviceAddress::new(address_type, address.parse()?),
                        rssi,
                        connectable,
                    })
                },
            )
            .collect()
    }

    fn bus(&self) -> Result<RadioEventBus, RadioError> {
        self.bus
            .lock()
            .map_err(|_| RadioError::Rejected("bench radio lock poisoned".to_string()))?
            .clone()
            .ok_or(RadioError::NotActive)
    }
}

impl RadioSubsystem for BenchRadio {
    fn register_events(&self, bus: RadioEventBus) {
        if let Ok(mut slot) = self.bus.lock() {
            *slot = Some(bus);
        }
    }

    fn start_scan(&self, params: ScanParams) -> Result<(), RadioError> {
        let bus = self.bus()?;
        let peripherals = self.peripherals.clone();
        let spacing = params.duration / (peripherals.len() as u32 + 1);

        info!(
            "Bench radio scanning: window {:?}, interval {:?}, duration {:?}",
            params.window, params.interval, params.duration
        );
        thread::spawn(move || {
            for peripheral in peripherals.iter() {
                thread::sleep(spacing);
                bus.dispatch(RadioEvent::ScanResult {
                    address: peripheral.address,
                    rssi: peripheral.rssi,
                    adv_data: peripheral.adv_data(),
                });
            }
            thread::sleep(spacing);
            bus.dispatch(RadioEvent::ScanDone);
        });
        Ok(())
    }

    fn supports(&self, form: ConnectForm) -> bool {
        form == ConnectForm::Gap
    }

    fn connect(&self, form: ConnectForm, address: DeviceAddress) -> Result<(), RadioError> {
        if !self.supports(form) {
            return Err(RadioError::Unsupported(form.to_string()));
        }
        let bus = self.bus()?;
        let peripheral = self
            .peripherals
            .iter()
            .find(|p| p.address.address == address.address)
            .cloned();
        let conn_handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let latency = self.connect_latency;

        thread::spawn(move || {
            thread::sleep(latency);
            match peripheral {
                Some(p) if p.connectable => bus.dispatch(RadioEvent::PeripheralConnected {
                    conn_handle,
                    address: p.address,
                }),
                // Unreachable peripherals never answer
                _ => debug!("Bench peripheral {} did not answer", address),
            }
        });
        Ok(())
    }
}

/// Simulated WLAN interface handing out the usual AP addresses
#[derive(Default)]
pub struct BenchWlan {
    active: bool,
    config: Option<AccessPointConfig>,
}

impl BenchWlan {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WlanInterface for BenchWlan {
    fn set_active(&mut self, active: bool) -> anyhow::Result<()> {
        self.active = active;
        if !active {
            self.config = None;
        }
        Ok(())
    }

    fn configure(&mut self, config: &AccessPointConfig) -> anyhow::Result<()> {
        if !self.active {
            anyhow::bail!("WLAN interface is not active");
        }
        if config.password.len() < 8 {
            anyhow::bail!("Password must be at least 8 characters");
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn ifconfig(&self) -> anyhow::Result<NetworkConfig> {
        if self.config.is_none() {
            anyhow::bail!("Access point is not configured");
        }
        let ap = Ipv4Addr::new(192, 168, 4, 1);
        Ok(NetworkConfig {
            ip: ap,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: ap,
            dns: ap,
        })
    }
}

/// Simulated modem that answers the registration query
pub struct BenchModem {
    pending: Vec<u8>,
    registered: bool,
}

impl BenchModem {
    pub fn open(uart_id: u8, baud_rate: u32) -> Self {
        info!("Bench modem on UART{} at {} baud", uart_id, baud_rate);
        Self {
            pending: Vec::new(),
            registered: true,
        }
    }
}

impl ModemSerial for BenchModem {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data == REGISTRATION_QUERY {
            let stat = if self.registered { 1 } else { 2 };
            self.pending
                .extend_from_slice(format!("\r\n+CREG: 0,{}\r\n\r\nOK\r\n", stat).as_bytes());
        } else {
            self.pending.extend_from_slice(b"\r\nERROR\r\n");
        }
        Ok(data.len())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.pending.len())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.pending))
    }
}
