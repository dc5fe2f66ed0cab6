// Error types for voiceloop
// Typed errors at the codec/audio/session boundaries; anyhow everywhere above

use thiserror::Error;

/// Errors from the PCM wire codec
#[derive(Debug, Error)]
pub enum CodecError {
    /// Upsampling is not supported; capture always runs at or above the wire rate
    #[error("unsupported input rate {input} Hz (wire rate is {target} Hz, upsampling not supported)")]
    UnsupportedRate { input: u32, target: u32 },

    #[error("malformed PCM payload: {0}")]
    MalformedPayload(String),
}

/// Errors from the capture/playback device layer
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no {0} device available")]
    NoDevice(&'static str),

    #[error("device '{name}' has no usable stream config: {reason}")]
    UnsupportedConfig { name: String, reason: String },

    #[error("failed to build audio stream: {0}")]
    StreamBuild(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    StreamStart(#[from] cpal::PlayStreamError),

    #[error("audio worker thread died before the stream came up")]
    WorkerGone,
}

/// Errors from session establishment
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no API key configured")]
    MissingCredential,

    #[error("credential rejected by peer (HTTP {0})")]
    CredentialRejected(u16),

    #[error("connection failed: {0}")]
    ConnectFailed(String),
}
