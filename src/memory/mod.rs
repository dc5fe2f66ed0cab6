// Memory subsystem
// Durable local profile + conversation history, with a best-effort remote mirror

pub mod migrations;
pub mod models;
pub mod remote;
pub mod store;

pub use models::{HistoryEntry, MemoryProfile, Role};
pub use remote::{HttpMirror, RemoteMirror};
pub use store::MemoryStore;
