use std::sync::Arc;
use std::time::Duration;

use flipdot_proto::frame::{self, hex};
use flipdot_proto::{
    ControlCommand, Decoded, DeviceFlags, Flag, Frame, Mode, Opcode, StatusSnapshot,
};
use metrics::counter;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, ConnectionState};
use crate::flags::FlagMirror;
use crate::grid::GridStore;
use crate::mode::{CredentialSource, ModeController, Reconciliation, StaticCredential, Transition};
use crate::persistence::{DisabledPatternStore, PatternPayload, PatternStore};
use crate::raster::{MonoRasterizer, Rasterizer};
use crate::transport::{Link, LinkEvent, WireMessage};

const EVENT_CAPACITY: usize = 256;

/// Something the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    SetPixel { x: usize, y: usize, on: bool },
    TogglePixel { x: usize, y: usize },
    Fill { on: bool },
    Text(String),
    SendPicture,
    SetFlag { flag: Flag, on: bool },
    RequestMode(Mode),
    RequestState,
    Save { name: String },
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSource {
    Operator,
    Device,
}

/// What the panel reports back to whoever drives the operator surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    ConnectionChanged(ConnectionState),
    SnapshotApplied { mode: Mode, flags: DeviceFlags },
    GridChanged { source: GridSource },
    PictureSuppressed,
    ModeRejected { error: String, requested: Mode },
    CredentialDeclined { target: Mode },
    Notice(String),
    /// An outbound message was dropped because the link was not open.
    MessageDropped { what: &'static str },
    SaveCompleted { name: String },
    /// `fallback_offered` tells the operator the pattern can still be
    /// exported locally.
    SaveFailed {
        name: String,
        error: String,
        fallback_offered: bool,
    },
    Preview(String),
}

/// Owns every component of the control link and maps link events and
/// operator commands onto them. Driven by exactly one task.
pub struct Panel {
    grid: GridStore,
    connection: ConnectionManager,
    mode: ModeController,
    flags: FlagMirror,
    credentials: Arc<dyn CredentialSource>,
    patterns: Arc<dyn PatternStore>,
    rasterizer: Arc<dyn Rasterizer>,
    events: broadcast::Sender<PanelEvent>,
}

impl Panel {
    pub fn new(retry_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            grid: GridStore::new(),
            connection: ConnectionManager::new(retry_delay),
            mode: ModeController::new(),
            flags: FlagMirror::new(),
            credentials: Arc::new(StaticCredential::declined()),
            patterns: Arc::new(DisabledPatternStore),
            rasterizer: Arc::new(MonoRasterizer::default()),
            events,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_pattern_store(mut self, patterns: Arc<dyn PatternStore>) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    pub fn grid(&self) -> &GridStore {
        &self.grid
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn mode(&self) -> &ModeController {
        &self.mode
    }

    pub fn flags(&self) -> &FlagMirror {
        &self.flags
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.connection.retry_at()
    }

    pub fn begin_connect(&mut self) {
        self.connection.begin_open();
        self.emit(PanelEvent::ConnectionChanged(self.connection.state()));
    }

    pub fn on_connected(&mut self, link: Link) {
        self.connection.on_opened(link);
        self.emit(PanelEvent::ConnectionChanged(self.connection.state()));
    }

    /// Remote close, transport error and failed connect all end up here.
    pub fn on_link_lost(&mut self, reason: &str, now: Instant) {
        self.connection.on_lost(reason, now);
        self.emit(PanelEvent::ConnectionChanged(self.connection.state()));
    }

    pub async fn next_link_event(&mut self) -> Option<LinkEvent> {
        self.connection.next_event().await
    }

    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Message(WireMessage::Text(text)) => self.on_status_text(&text),
            LinkEvent::Message(WireMessage::Binary(bytes)) => self.on_binary(&bytes),
            LinkEvent::Closed { reason } => {
                self.on_link_lost(reason.as_deref().unwrap_or("closed by device"), now)
            }
            LinkEvent::Error(err) => self.on_link_lost(&err, now),
        }
    }

    fn on_status_text(&mut self, text: &str) {
        let snapshot = match StatusSnapshot::parse(text) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(target = "flipdot.link", error = %err, "discarding malformed status message");
                return;
            }
        };

        self.flags.apply(&snapshot);
        counter!("flipdot_snapshots_applied_total", 1);

        if let Reconciliation::Rejected { error, requested } = self.mode.reconcile(&snapshot) {
            self.emit(PanelEvent::ModeRejected { error, requested });
            self.request_state();
        }

        self.emit(PanelEvent::SnapshotApplied {
            mode: self.mode.confirmed(),
            flags: self.flags.confirmed(),
        });
    }

    fn on_binary(&mut self, bytes: &[u8]) {
        match frame::decode(bytes) {
            Decoded::Picture(grid) if self.mode.suppresses_pictures() => {
                counter!("flipdot_pictures_suppressed_total", 1);
                debug!(
                    target = "flipdot.grid",
                    mode = %self.mode.confirmed(),
                    lit = grid.lit_count(),
                    "inbound picture suppressed"
                );
                self.emit(PanelEvent::PictureSuppressed);
            }
            Decoded::Picture(grid) => {
                self.grid.replace(grid);
                debug!(target = "flipdot.grid", lit = self.grid.lit_count(), "grid replaced by device");
                self.emit(PanelEvent::GridChanged {
                    source: GridSource::Device,
                });
            }
            Decoded::Unstructured(bytes) => {
                debug!(target = "flipdot.link", len = bytes.len(), bytes = %hex(&bytes), "unstructured device traffic");
            }
        }
    }

    pub async fn handle_command(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::SetPixel { x, y, on } => match self.grid.set(x, y, on) {
                Ok(()) => self.grid_edited(),
                Err(err) => self.notice(err.to_string()),
            },
            OperatorCommand::TogglePixel { x, y } => match self.grid.toggle(x, y) {
                Ok(_) => self.grid_edited(),
                Err(err) => self.notice(err.to_string()),
            },
            OperatorCommand::Fill { on } => {
                self.grid.fill(on);
                self.grid_edited();
            }
            OperatorCommand::Text(text) => {
                let rows = self.rasterizer.rasterize(&text);
                self.grid.blit(&rows);
                self.grid_edited();
            }
            OperatorCommand::SendPicture => self.send_picture(),
            OperatorCommand::SetFlag { flag, on } => self.set_flag(flag, on),
            OperatorCommand::RequestMode(target) => {
                if let Some(credentials) = self.begin_mode_request(target) {
                    let credential = credentials.credential(target).await;
                    self.finish_mode_request(target, credential);
                }
            }
            OperatorCommand::RequestState => self.request_state(),
            OperatorCommand::Save { name } => self.save(name).await,
            OperatorCommand::Show => {
                let preview = self.grid.render(self.flags.confirmed().invert);
                self.emit(PanelEvent::Preview(preview));
            }
        }
    }

    fn grid_edited(&mut self) {
        self.emit(PanelEvent::GridChanged {
            source: GridSource::Operator,
        });
    }

    fn send_picture(&mut self) {
        let bytes = match frame::encode(Opcode::Picture, &self.grid.encode()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target = "flipdot.grid", error = %err, "picture could not be framed");
                return;
            }
        };
        if !self.connection.send(WireMessage::Binary(bytes)) {
            self.emit(PanelEvent::MessageDropped { what: "picture" });
        }
    }

    fn set_flag(&mut self, flag: Flag, on: bool) {
        if !self.flags.is_synced() {
            self.notice(format!("{flag} is unavailable until the device reports its state"));
            return;
        }
        if self.connection.send_frame(&Frame::switch(flag, on)) {
            self.flags.request(flag, on);
        } else {
            self.emit(PanelEvent::MessageDropped { what: flag.key() });
        }
    }

    /// First half of a mode change: hands back the credential source to ask,
    /// or `None` when the link is down. The answer goes to
    /// [`Panel::finish_mode_request`], so the lookup can run off the event loop.
    pub fn begin_mode_request(&mut self, target: Mode) -> Option<Arc<dyn CredentialSource>> {
        if !self.connection.is_open() {
            self.notice(format!("cannot switch to {target} while the link is down"));
            return None;
        }
        Some(self.credentials.clone())
    }

    pub fn finish_mode_request(&mut self, target: Mode, credential: Option<String>) {
        // the link may have dropped while the operator was typing
        if !self.connection.is_open() {
            self.notice(format!("link went down, switch to {target} not sent"));
            return;
        }
        match self.mode.transition(target, credential) {
            Transition::Send(command) => {
                if !self.connection.send_command(&command) {
                    self.emit(PanelEvent::MessageDropped { what: "setMode" });
                }
            }
            Transition::Declined => {
                self.emit(PanelEvent::CredentialDeclined { target });
                self.request_state();
            }
        }
    }

    fn request_state(&mut self) {
        if !self.connection.send_command(&ControlCommand::GetState) {
            self.emit(PanelEvent::MessageDropped { what: "getState" });
        }
    }

    async fn save(&mut self, name: String) {
        let payload = PatternPayload {
            data: self.grid.encode(),
            backlight: self.flags.confirmed().backlight,
        };
        match self.patterns.save(&name, &payload).await {
            Ok(()) => self.emit(PanelEvent::SaveCompleted { name }),
            Err(err) => {
                warn!(target = "flipdot.persist", name = %name, error = %err, "save failed; offering local export");
                self.emit(PanelEvent::SaveFailed {
                    name,
                    error: err.to_string(),
                    fallback_offered: true,
                });
            }
        }
    }

    fn notice(&self, message: String) {
        info!(target = "flipdot.panel", "{message}");
        self.emit(PanelEvent::Notice(message));
    }

    fn emit(&self, event: PanelEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
