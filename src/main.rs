mod boot;
mod domain;
mod infrastructure;

use boot::BootSequencer;
use domain::settings::SettingsService;
use infrastructure::access_point::AccessPointManager;
use infrastructure::bench::{BenchModem, BenchRadio, BenchWlan};
use infrastructure::cellular::CellularLinkMonitor;
use infrastructure::radio::ConnectionController;
use std::sync::Arc;
use tracing::info;

const BANNER: &str = "Boot sequence completed";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("{}", BANNER);

    let settings_service = SettingsService::load();

    // Keep the guard alive for the whole process or file logging stops
    let _log_guard = infrastructure::logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Initializing...");
    if let Some(path) = settings_service.settings_path() {
        info!("Settings file: {}", path.display());
    }
    let settings = settings_service.into_inner();

    let radio = Arc::new(BenchRadio::new(BenchRadio::neighbourhood(
        &settings.ble.target_name,
    )?));
    let controller = ConnectionController::new(radio, &settings.ble);
    let access_point = AccessPointManager::new(BenchWlan::new(), &settings.access_point);
    let cellular = CellularLinkMonitor::new(
        BenchModem::open(settings.cellular.uart_id, settings.cellular.baud_rate),
        &settings.cellular,
    );

    BootSequencer::new(settings, access_point, cellular, controller)
        .run()
        .await;

    Ok(())
}
