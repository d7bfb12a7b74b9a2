//! Cellular Registration Check
//!
//! Asks the modem for its network registration status over the serial link.

use crate::domain::settings::CellularSettings;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Registration status query
pub const REGISTRATION_QUERY: &[u8] = b"AT+CREG?\r\n";

/// Byte-level access to the modem UART
pub trait ModemSerial: Send {
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Number of bytes waiting to be read
    fn bytes_available(&mut self) -> io::Result<usize>;

    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

pub struct CellularLinkMonitor<S: ModemSerial> {
    serial: S,
    response_wait: Duration,
    registered_marker: Vec<u8>,
}

impl<S: ModemSerial> CellularLinkMonitor<S> {
    pub fn new(serial: S, settings: &CellularSettings) -> Self {
        Self {
            serial,
            response_wait: Duration::from_millis(settings.response_wait_ms),
            registered_marker: settings.registered_marker.as_bytes().to_vec(),
        }
    }

    /// True when the modem reports it is registered on its home network
    ///
    /// Serial errors count as not registered.
    pub async fn is_registered(&mut self) -> bool {
        match self.query_registration().await {
            Ok(registered) => registered,
            Err(e) => {
                warn!("4G connection check failed: {}", e);
                false
            }
        }
    }

    async fn query_registration(&mut self) -> io::Result<bool> {
        self.serial.write(REGISTRATION_QUERY)?;
        tokio::time::sleep(self.response_wait).await;

        if self.serial.bytes_available()? == 0 {
            debug!("Modem sent no response to registration query");
            return Ok(false);
        }

        let response = self.serial.read_available()?;
        debug!(
            "Modem response: {:?}",
            String::from_utf8_lossy(&response).trim()
        );
        Ok(contains(&response, &self.registered_marker))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
