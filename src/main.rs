//! Voiceloop binary
//!
//! Connects the default microphone and speaker to a realtime speech peer
//! and keeps conversation memory in a local SQLite database. Configured
//! entirely through VOICELOOP_* environment variables; Ctrl-C disconnects
//! cleanly.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use voiceloop::memory::RemoteMirror;
use voiceloop::{AppConfig, HttpMirror, MemoryStore, SessionManager, SessionPhase};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = AppConfig::from_env();
    if config.api_key.is_empty() {
        bail!("VOICELOOP_API_KEY is not set");
    }

    if config.enable_devices {
        for name in voiceloop::audio::device::list_input_devices() {
            info!("🎙️ Input device: {}", name);
        }
        for name in voiceloop::audio::device::list_output_devices() {
            info!("🔊 Output device: {}", name);
        }
    } else {
        warn!("Running headless, audio devices disabled");
    }

    let store = Arc::new(
        MemoryStore::open(config.db_path()).context("Failed to open memory database")?,
    );
    let mirror: Option<Arc<dyn RemoteMirror>> = config
        .mirror_url
        .clone()
        .map(|url| Arc::new(HttpMirror::new(url)) as Arc<dyn RemoteMirror>);
    if mirror.is_some() {
        info!("Remote memory mirror enabled");
    }

    info!("Starting session (model {}, voice {})", config.model, config.voice);
    let mut session = SessionManager::connect(config, store, mirror)?;
    let mut phases = session.phases();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutting down");
                session.disconnect().await;
                break;
            }
            changed = phases.changed() => {
                if changed.is_err() {
                    break;
                }
                let phase = phases.borrow_and_update().clone();
                info!("Session: {}", phase);
                match phase {
                    SessionPhase::Error(msg) => bail!("session failed: {}", msg),
                    SessionPhase::Disconnected => break,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
