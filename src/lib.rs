// Voiceloop - realtime bidirectional voice session manager
//
// Streams microphone audio to a realtime speech model, plays its audio
// replies gaplessly, and keeps a durable local memory (user profile +
// conversation history) that survives restarts and syncs to an optional
// remote mirror.

pub mod audio;
pub mod config;
pub mod error;
pub mod memory;
pub mod session;

pub use config::AppConfig;
pub use error::{AudioError, CodecError, SessionError};
pub use memory::{HttpMirror, MemoryStore, RemoteMirror};
pub use session::{SessionManager, SessionPhase};
