// Session subsystem
// The state machine that keeps the live conversation alive across reconnects

pub mod context;
pub mod manager;
pub mod protocol;

pub use manager::SessionManager;
pub use protocol::GroundingSource;

/// Connection lifecycle phase, observable through the manager's watch channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Fatal condition; carries a short user-facing message
    Error(String),
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Connected => "connected",
            SessionPhase::Reconnecting => "reconnecting",
            SessionPhase::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Error(msg) => write!(f, "error: {}", msg),
            other => f.write_str(other.as_str()),
        }
    }
}
