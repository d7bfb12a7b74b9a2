use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// The type of an LE device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    Public,
    Random,
}

impl AddressType {
    /// Wire code reported by the radio (0 = public, 1 = random)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Public),
            0x01 => Some(Self::Random),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Public => 0x00,
            Self::Random => 0x01,
        }
    }
}

/// A 6-byte Bluetooth device address, stored in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BdAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(anyhow::anyhow!("Invalid device address: {}", s));
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(anyhow::anyhow!("Invalid device address: {}", s));
            }
            *slot = u8::from_str_radix(part, 16)?;
        }
        Ok(Self(bytes))
    }
}

/// An LE address together with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub address_type: AddressType,
    pub address: BdAddr,
}

impl DeviceAddress {
    pub fn new(address_type: AddressType, address: BdAddr) -> Self {
        Self {
            address_type,
            address,
        }
    }

    pub fn public(address: BdAddr) -> Self {
        Self::new(AddressType::Public, address)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.address, f)
    }
}

/// A peripheral that passed the name filter during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub rssi: i8,
}

/// Link state of the peripheral controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    ScanDone,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::ScanDone => "scan done",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Events raised by the radio subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    ScanResult {
        address: DeviceAddress,
        rssi: i8,
        adv_data: Vec<u8>,
    },
    ScanDone,
    PeripheralConnected {
        conn_handle: u16,
        address: DeviceAddress,
    },
    PeripheralDisconnected {
        conn_handle: u16,
        address: DeviceAddress,
    },
}

/// Result of a `connect_to` call that did not hit an unexpected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// No connect event arrived before the connect timeout
    TimedOut,
    /// The peripheral dropped the link before it was established
    Dropped,
    /// Neither connect call form accepted the request
    Unavailable,
}

/// WLAN authentication mode for the access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "OPEN",
            Self::Wep => "WEP",
            Self::WpaPsk => "WPA-PSK",
            Self::Wpa2Psk => "WPA2-PSK",
            Self::WpaWpa2Psk => "WPA/WPA2-PSK",
        };
        f.write_str(label)
    }
}

/// Network configuration assigned to the access point interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
}
