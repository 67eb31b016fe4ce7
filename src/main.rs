//! Application entry point for the Flowist narration player.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the narration service, audio fetcher, decoder and output backend
//!    from config.
//! 5. Create the [`SessionController`] on the runtime handle.
//! 6. Run [`eframe::run_native`]. It blocks the main thread until the window
//!    is closed; closing the window tears the session down.

use std::sync::Arc;

use eframe::egui;
use flowist_player::{
    app::MeditationApp,
    audio::{CpalBackend, HttpAudioFetcher, SymphoniaDecoder},
    config::AppConfig,
    session::SessionController,
    stream::ApiNarrationService,
};

// ---------------------------------------------------------------------------
// Native options builder
// ---------------------------------------------------------------------------

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let mut vp = egui::ViewportBuilder::default()
        .with_title("Flowist")
        .with_inner_size([460.0, 360.0])
        .with_min_inner_size([360.0, 280.0]);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }

    if let Some((x, y)) = config.ui.window_position {
        vp = vp.with_position(egui::pos2(x, y));
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Flowist starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    log::info!("Narration backend: {}", config.server.stream_url());

    // 3. Tokio runtime (2 worker threads for stream reading and fetch tasks)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    // 4. Collaborators
    let service = Arc::new(ApiNarrationService::from_config(&config.server));
    let fetcher = Arc::new(HttpAudioFetcher::from_config(&config.server));
    let decoder = Arc::new(SymphoniaDecoder::new());
    let backend = Arc::new(CpalBackend::new(config.playback.volume));

    // 5. Session controller
    let controller = SessionController::new(
        rt.handle().clone(),
        config.playback.clone(),
        service,
        fetcher,
        decoder,
        backend,
    );

    // 6. Window (blocks until closed)
    let app = MeditationApp::new(controller, config.clone());
    let options = native_options(&config);

    eframe::run_native("Flowist", options, Box::new(move |_cc| Ok(Box::new(app))))
        .map_err(|e| anyhow::anyhow!("window failed: {e}"))?;

    log::info!("Flowist shut down");
    Ok(())
}
