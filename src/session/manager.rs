// Session manager
// One logical session per manager: a single async task drives the state
// machine (connect, stream, reconnect, teardown) and owns the capture
// handle, the player, the turn buffers, and the grounding ring. Audio
// worker threads only talk to it through channels and the shared queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::audio::{codec, AudioChunk, CaptureHandle, Player};
use crate::config::{AppConfig, HISTORY_WINDOW};
use crate::error::SessionError;
use crate::memory::{remote, MemoryStore, RemoteMirror, Role};
use crate::session::protocol::{self, GroundingSource, ServerEvent};
use crate::session::{context, SessionPhase};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fixed delay between reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Most-recent grounding sources kept for display
const GROUNDING_CAP: usize = 5;

enum CloseReason {
    Intentional,
    PeerClosed,
}

/// Handle to a running session. Dropping it tears the session down; use
/// `disconnect` to wait for a clean shutdown.
#[derive(Debug)]
pub struct SessionManager {
    phase_rx: watch::Receiver<SessionPhase>,
    intentional_close: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Validate the credential and spawn the session task
    pub fn connect(
        config: AppConfig,
        store: Arc<MemoryStore>,
        mirror: Option<Arc<dyn RemoteMirror>>,
    ) -> Result<Self, SessionError> {
        if config.api_key.is_empty() {
            return Err(SessionError::MissingCredential);
        }

        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Connecting);
        let intentional_close = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();

        let runtime = SessionRuntime {
            config,
            store,
            mirror,
            phase_tx,
            intentional_close: intentional_close.clone(),
            cancel: cancel.clone(),
            capture: None,
            chunk_tx,
            chunk_rx,
            player: Player::detached(),
            player_live: false,
            remote_pulled: false,
            grounding: VecDeque::new(),
            input_transcript: String::new(),
            output_transcript: String::new(),
        };

        let task = tokio::spawn(runtime.run());

        Ok(Self {
            phase_rx,
            intentional_close,
            cancel,
            task: Some(task),
        })
    }

    /// Observe phase transitions
    pub fn phases(&self) -> watch::Receiver<SessionPhase> {
        self.phase_rx.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase_rx.borrow().clone()
    }

    /// Intentional close: stop reconnecting, release devices, wait for the
    /// session task to finish
    pub async fn disconnect(&mut self) {
        info!("👋 Disconnect requested");
        self.intentional_close.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.intentional_close.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Mutable session state, owned by the spawned task
struct SessionRuntime {
    config: AppConfig,
    store: Arc<MemoryStore>,
    mirror: Option<Arc<dyn RemoteMirror>>,
    phase_tx: watch::Sender<SessionPhase>,
    intentional_close: Arc<AtomicBool>,
    cancel: CancellationToken,
    capture: Option<CaptureHandle>,
    chunk_tx: mpsc::UnboundedSender<AudioChunk>,
    chunk_rx: mpsc::UnboundedReceiver<AudioChunk>,
    player: Player,
    player_live: bool,
    remote_pulled: bool,
    grounding: VecDeque<GroundingSource>,
    input_transcript: String,
    output_transcript: String,
}

impl SessionRuntime {
    async fn run(mut self) {
        loop {
            if self.intentional_close.load(Ordering::SeqCst) {
                break;
            }
            self.set_phase(SessionPhase::Connecting);

            match self.connect_once().await {
                Ok(CloseReason::Intentional) => break,
                Ok(CloseReason::PeerClosed) => {
                    if self.intentional_close.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("Peer connection lost");
                }
                Err(e) => {
                    if is_fatal(&e) {
                        error!("❌ Fatal session error: {}", e);
                        self.teardown();
                        self.set_phase(SessionPhase::Error(e.to_string()));
                        return;
                    }
                    if self.intentional_close.load(Ordering::SeqCst) {
                        // Setup failed while we were closing on purpose
                        error!("Error during intentional close: {}", e);
                        self.teardown();
                        self.set_phase(SessionPhase::Error(e.to_string()));
                        return;
                    }
                    warn!("Connect attempt failed: {}", e);
                }
            }

            self.set_phase(SessionPhase::Reconnecting);
            info!("🔄 Reconnecting in {}s", RECONNECT_DELAY.as_secs());
            if !self.wait_reconnect_delay().await {
                break;
            }
        }

        self.teardown();
        self.set_phase(SessionPhase::Disconnected);
        info!("Session closed");
    }

    /// One full connection attempt: dial, sync memory, send setup, open
    /// devices, stream until the peer or the user ends it
    async fn connect_once(&mut self) -> Result<CloseReason, SessionError> {
        let url = format!("{}?key={}", self.config.endpoint, self.config.api_key);
        debug!("Dialing {}", self.config.endpoint);

        let connect = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(CloseReason::Intentional),
            result = connect_async(url.as_str()) => result,
        };
        let (ws, _) = connect.map_err(classify_connect_error)?;
        info!("✅ Peer connection established");

        // Remote memory merges in once per manager lifetime, never on reconnect
        if !self.remote_pulled {
            if let Some(mirror) = &self.mirror {
                remote::merge_remote_into_local(&self.store, mirror.as_ref()).await;
            }
            self.remote_pulled = true;
        }

        let profile = self.store.read_profile().unwrap_or_else(|e| {
            error!("Profile read failed: {:#}", e);
            Default::default()
        });
        let history = self.store.recent_history(HISTORY_WINDOW).unwrap_or_else(|e| {
            error!("History read failed: {:#}", e);
            Vec::new()
        });
        let instruction = context::build_system_instruction(&profile, &history);
        let setup = protocol::setup_message(&self.config.model, &self.config.voice, instruction);
        let setup_text = serde_json::to_string(&setup)
            .map_err(|e| SessionError::ConnectFailed(format!("setup encode: {}", e)))?;

        let (mut sink, mut read) = ws.split();
        sink.send(Message::Text(setup_text))
            .await
            .map_err(|e| SessionError::ConnectFailed(format!("setup send: {}", e)))?;

        self.ensure_devices()?;

        // Writer task keeps outbound order: messages are issued in sequence
        // and sent without the controller waiting on completion
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let writer: JoinHandle<()> = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.set_phase(SessionPhase::Connected);
        info!("🟢 Session connected");
        self.drop_stale_chunks();

        let reason = self.drive(&mut read, &out_tx).await;

        drop(out_tx);
        let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
        Ok(reason)
    }

    /// Main connected loop: capture chunks out, peer events in
    async fn drive(
        &mut self,
        read: &mut SplitStream<WsStream>,
        out_tx: &mpsc::UnboundedSender<Message>,
    ) -> CloseReason {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Intentional close requested");
                    let _ = out_tx.send(Message::Close(None));
                    return CloseReason::Intentional;
                }
                chunk = self.chunk_rx.recv() => {
                    if let Some(chunk) = chunk {
                        self.handle_chunk(chunk, out_tx);
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for event in protocol::parse_events(&text) {
                                self.handle_event(event, out_tx).await;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!("Peer closed the session: {:?}", frame);
                            return CloseReason::PeerClosed;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Peer read error: {}", e);
                            return CloseReason::PeerClosed;
                        }
                        None => {
                            warn!("Peer stream ended");
                            return CloseReason::PeerClosed;
                        }
                    }
                }
            }
        }
    }

    /// Encode and transmit one capture chunk. Only called while connected;
    /// chunks produced in any other state are dropped elsewhere.
    fn handle_chunk(&mut self, chunk: AudioChunk, out_tx: &mpsc::UnboundedSender<Message>) {
        match codec::encode_outbound(&chunk.samples, chunk.sample_rate) {
            Ok(data) => {
                let msg = protocol::audio_message(data);
                match serde_json::to_string(&msg) {
                    Ok(text) => {
                        let _ = out_tx.send(Message::Text(text));
                    }
                    Err(e) => warn!("Failed to encode audio message: {}", e),
                }
            }
            Err(e) => warn!("Dropping capture chunk: {}", e),
        }
    }

    async fn handle_event(&mut self, event: ServerEvent, out_tx: &mpsc::UnboundedSender<Message>) {
        match event {
            ServerEvent::SetupComplete => debug!("Peer setup complete"),
            ServerEvent::ToolCall { id, name, args } => {
                self.handle_tool_call(id, name, args, out_tx).await;
            }
            ServerEvent::InputTranscript(text) => self.input_transcript.push_str(&text),
            ServerEvent::OutputTranscript(text) => self.output_transcript.push_str(&text),
            ServerEvent::Audio { data, sample_rate } => {
                match codec::decode_media(&data, sample_rate, 1) {
                    Ok(buffer) => self.player.enqueue(buffer),
                    Err(e) => warn!("Dropping malformed audio fragment: {}", e),
                }
            }
            ServerEvent::Interrupted => {
                info!("⏹️ Barge-in, stopping playback");
                self.player.interrupt();
            }
            ServerEvent::TurnComplete => self.finish_turn(),
            ServerEvent::Grounding(sources) => self.push_grounding(sources),
        }
    }

    /// Apply a memory tool call: durable local write first, then the ack.
    /// The remote push runs detached and never delays the ack.
    async fn handle_tool_call(
        &mut self,
        id: String,
        name: String,
        args: Value,
        out_tx: &mpsc::UnboundedSender<Message>,
    ) {
        if name != protocol::TOOL_UPDATE_MEMORY {
            warn!("Ignoring unknown tool call '{}'", name);
            return;
        }

        let key = args.get("key").and_then(Value::as_str).unwrap_or_default();
        let Some(value) = args.get("value") else {
            warn!("Dropping tool call with missing value");
            return;
        };
        if key.is_empty() {
            warn!("Dropping tool call with missing key");
            return;
        }

        if let Err(e) = self.store.write_key(key, value) {
            error!("Memory write failed for '{}': {:#}", key, e);
            return;
        }
        debug!("💾 Memory updated: {}", key);

        if let Some(mirror) = &self.mirror {
            remote::push_detached(&self.store, mirror);
        }

        let ack_id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id
        };
        match serde_json::to_string(&protocol::tool_ack(ack_id)) {
            Ok(text) => {
                let _ = out_tx.send(Message::Text(text));
            }
            Err(e) => warn!("Failed to encode tool ack: {}", e),
        }
    }

    /// Persist the finished turn's transcript. Partial turns never reach
    /// the store; buffers clear either way.
    fn finish_turn(&mut self) {
        let input = self.input_transcript.trim().to_string();
        let output = self.output_transcript.trim().to_string();
        self.input_transcript.clear();
        self.output_transcript.clear();

        if !input.is_empty() {
            if let Err(e) = self.store.append_history(Role::User, &input) {
                error!("Failed to persist user transcript: {:#}", e);
            }
        }
        if !output.is_empty() {
            if let Err(e) = self.store.append_history(Role::Model, &output) {
                error!("Failed to persist model transcript: {:#}", e);
            }
        }
        if !input.is_empty() || !output.is_empty() {
            debug!(
                "Turn persisted ({} user chars, {} model chars)",
                input.len(),
                output.len()
            );
        }
    }

    fn push_grounding(&mut self, sources: Vec<GroundingSource>) {
        for source in sources.into_iter().rev() {
            info!("📚 Grounding: {} ({})", source.title, source.uri);
            self.grounding.push_front(source);
        }
        self.grounding.truncate(GROUNDING_CAP);
    }

    /// Open capture/playback on first connect; reconnects reuse live devices
    fn ensure_devices(&mut self) -> Result<(), SessionError> {
        if !self.config.enable_devices {
            return Ok(());
        }

        if !self.player_live {
            let player = Player::open()
                .map_err(|e| SessionError::ConnectFailed(format!("output device: {}", e)))?;
            self.player = player;
            self.player_live = true;
        }

        if self.capture.is_none() {
            let handle = CaptureHandle::start(self.chunk_tx.clone())
                .map_err(|e| SessionError::ConnectFailed(format!("microphone: {}", e)))?;
            self.capture = Some(handle);
        }

        Ok(())
    }

    /// Capture keeps running across reconnects; whatever it produced while
    /// we were away is stale and gets dropped, never queued
    fn drop_stale_chunks(&mut self) {
        let mut dropped = 0;
        while self.chunk_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} stale capture chunk(s)", dropped);
        }
    }

    /// Sleep out the fixed reconnect delay, still dropping stale chunks.
    /// Returns false when the delay was cancelled by an intentional close.
    async fn wait_reconnect_delay(&mut self) -> bool {
        let deadline = tokio::time::sleep(RECONNECT_DELAY);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut deadline => return true,
                chunk = self.chunk_rx.recv() => {
                    if chunk.is_none() {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return false,
                            _ = &mut deadline => return true,
                        }
                    }
                }
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.player.shutdown();
        self.player_live = false;
        debug!("Session resources released");
    }

    fn set_phase(&self, phase: SessionPhase) {
        if *self.phase_tx.borrow() != phase {
            debug!("Session phase: {}", phase);
            let _ = self.phase_tx.send(phase);
        }
    }
}

fn is_fatal(e: &SessionError) -> bool {
    matches!(
        e,
        SessionError::MissingCredential | SessionError::CredentialRejected(_)
    )
}

fn classify_connect_error(e: WsError) -> SessionError {
    if let WsError::Http(response) = &e {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return SessionError::CredentialRejected(status.as_u16());
        }
    }
    SessionError::ConnectFailed(e.to_string())
}
