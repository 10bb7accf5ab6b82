//! platewatchd - plate watch daemon
//!
//! Serves the HTTP front end and runs one capture session per requested
//! camera until Ctrl-C.

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use plate_watch::{
    api::{ApiConfig, ApiServer, ApiState},
    ingest::chain_from_settings,
    DetectorRegistry, LocalAlertSink, Pipeline, SessionRegistry, SessionSettings, SoundPlayer,
    SqliteStore, TargetPlateStore, WatchConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = WatchConfig::load()?;
    let store = Arc::new(SqliteStore::open(&cfg.db_path)?);
    let seeded = store.seed(&cfg.seed_targets)?;
    if seeded > 0 {
        log::info!("seeded {} target plate(s)", seeded);
    }

    let mut detectors = DetectorRegistry::with_builtins(cfg.detector.script.clone());
    let factory = detectors.select(cfg.detector.backend.as_deref())?;
    let chain = chain_from_settings(&cfg.camera)?;
    let sink = Arc::new(LocalAlertSink::new(
        cfg.screenshot_dir.clone(),
        store.clone(),
        SoundPlayer::new(cfg.alert.sound_command.clone()),
    ));
    let pipeline = Pipeline::new(store.clone(), factory, sink);
    let sessions = SessionRegistry::new(chain.clone(), pipeline, SessionSettings::from_config(&cfg));

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
            screenshot_dir: cfg.screenshot_dir.clone(),
        },
        ApiState {
            sessions: sessions.clone(),
            targets: store.clone(),
            logs: store.clone(),
        },
    )
    .spawn()?;

    log::info!("platewatchd running. writing to {}", cfg.db_path);
    log::info!(
        "capture backends: {}, detector: {}, cooldown: {}s",
        chain.names().join(", "),
        detectors.default_name().unwrap_or("none"),
        cfg.alert.cooldown.as_secs()
    );
    log::info!("screenshots go to {}", cfg.screenshot_dir.display());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("platewatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping camera sessions...");
    sessions.shutdown();
    api_handle.stop()?;
    Ok(())
}
