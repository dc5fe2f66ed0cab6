// Runtime configuration for voiceloop
// Everything comes from the environment; the data dir falls back to the
// platform app-data location

use std::env;
use std::path::PathBuf;

/// Default live endpoint (Gemini Live bidirectional API)
const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
const DEFAULT_VOICE: &str = "Puck";

/// How many history entries go into the peer's context on connect
pub const HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// API key for the live endpoint; empty means unconfigured
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
    /// Remote mirror document URL; None disables mirroring
    pub mirror_url: Option<String>,
    pub data_dir: PathBuf,
    /// When false, capture/playback devices are never opened (headless mode)
    pub enable_devices: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("VOICELOOP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("voiceloop")
            });

        Self {
            api_key: env::var("VOICELOOP_API_KEY").unwrap_or_default(),
            model: env::var("VOICELOOP_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            voice: env::var("VOICELOOP_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string()),
            endpoint: env::var("VOICELOOP_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            mirror_url: env::var("VOICELOOP_MIRROR_URL").ok().filter(|s| !s.is_empty()),
            data_dir,
            enable_devices: env::var("VOICELOOP_HEADLESS").map(|v| v != "1").unwrap_or(true),
        }
    }

    /// Path of the local memory database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            mirror_url: None,
            data_dir: PathBuf::from("."),
            enable_devices: true,
        }
    }
}
