use crate::domain::models::AuthMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Peripheral discovery and connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleSettings {
    /// Complete local name of the peripheral to connect to
    #[serde(default = "default_target_name")]
    pub target_name: String,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            target_name: default_target_name(),
            scan_timeout_ms: default_scan_timeout_ms(),
            scan_window_ms: default_scan_window_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl BleSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Parameters applied to the access point interface in one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointConfig {
    #[serde(default = "default_ssid")]
    pub ssid: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: default_ssid(),
            password: default_password(),
            channel: default_channel(),
            auth_mode: default_auth_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPointSettings {
    #[serde(default)]
    pub config: AccessPointConfig,
    /// Pause between disabling and re-enabling the interface
    #[serde(default = "default_ap_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Time given to the AP to come up before reading its addresses
    #[serde(default = "default_ap_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            config: AccessPointConfig::default(),
            restart_delay_ms: default_ap_restart_delay_ms(),
            settle_delay_ms: default_ap_settle_delay_ms(),
        }
    }
}

/// Modem serial link and registration check parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellularSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_uart_id")]
    pub uart_id: u8,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_response_wait_ms")]
    pub response_wait_ms: u64,
    #[serde(default = "default_registered_marker")]
    pub registered_marker: String,
}

impl Default for CellularSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            uart_id: default_uart_id(),
            baud_rate: default_baud_rate(),
            response_wait_ms: default_response_wait_ms(),
            registered_marker: default_registered_marker(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "boot_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_target_name() -> String {
    "RaceBox Micro 3242704435".to_string()
}
fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_scan_window_ms() -> u64 {
    30
}
fn default_scan_interval_ms() -> u64 {
    30
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_ssid() -> String {
    "wongcw".to_string()
}
fn default_password() -> String {
    "12345678".to_string()
}
fn default_channel() -> u8 {
    1
}
fn default_auth_mode() -> AuthMode {
    AuthMode::Wpa2Psk
}
fn default_ap_restart_delay_ms() -> u64 {
    1_000
}
fn default_ap_settle_delay_ms() -> u64 {
    2_000
}
fn default_uart_id() -> u8 {
    1
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_response_wait_ms() -> u64 {
    1_000
}
fn default_registered_marker() -> String {
    "+CREG: 0,1".to_string()
}
fn default_cycle_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub access_point: AccessPointSettings,
    #[serde(default)]
    pub cellular: CellularSettings,
    /// Pause between supervision cycles
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            ble: BleSettings::default(),
            access_point: AccessPointSettings::default(),
            cellular: CellularSettings::default(),
            cycle_interval_ms: default_cycle_interval_ms(),
        }
    }
}

impl Settings {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

/// Read-only view over the settings the controller was started with
pub struct SettingsService {
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsService {
    /// Load overrides from the config directory, falling back to the built-in constants
    pub fn load() -> Self {
        let settings_path = Self::get_settings_path();
        let settings = match settings_path.as_deref() {
            Some(path) if path.exists() => match Self::load_from_file(path) {
                Ok(settings) => {
                    info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    warn!("Ignoring unreadable settings file {}: {}", path.display(), e);
                    Settings::default()
                }
            },
            _ => Settings::default(),
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("boot-controller");
        path.push("settings.json");
        Some(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }

    pub fn into_inner(self) -> Settings {
        self.settings
    }
}
