//! Polling synchronizer runtime.
//!
//! A single loop task owns the [`Session`] and multiplexes, via
//! `tokio::select!`, the poll timer, user commands and the reports of the
//! request chain currently in flight. Each tick that `Session::begin_tick`
//! allows spawns one chain task which issues its requests in order and
//! reports back over a channel; the loop applies reports only while the
//! chain's generation is still in flight, and aborts the chain's task as
//! soon as the session cancels it.
//!
//! The continue chain waits for the loop to install the frame before it
//! asks for the last move.
//!
//! Undo, override and reset also run as their own task and report back on
//! the same channel, so a slow service never stalls the loop. Only one of
//! them may be outstanding, and no tick starts until it has reported.

use anyhow::{Result, anyhow};
use shakmaty::uci::UciMove;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::fault::Phase;
use crate::frame::Frame;
use crate::session::{
    ILLEGAL_OVERRIDE_MSG, Outcome, Session, Snapshot, SyncMode, TickKind, TickTicket, Update,
};
use crate::vision::{
    HttpVisionService, LastMoveReply, OverrideReply, ResumeReply, ServiceError, ServiceResult,
    VisionService,
};

/// Construction parameters of a synchronizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub endpoint_base: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// IP-camera address passed to the service on resume and continue requests.
    pub webcam: String,
    /// When set, every installed frame is also written here as PNG.
    pub frame_dump_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint_base: "http://127.0.0.1:5000".to_string(),
            poll_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(10),
            webcam: String::new(),
            frame_dump_dir: None,
        }
    }
}

/// Requests from the user surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    EnableCapture,
    DisableCapture,
    ToggleCapture,
    SetWebcam(String),
    Undo,
    /// A move in UCI notation, forced onto the server's board.
    Override(String),
    Declare(Outcome),
    Reset,
    Acknowledge,
}

/// Things the user should hear about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    ModeChanged(SyncMode),
    MoveRecorded { ply: usize, san: String },
    MoveUndone(Option<String>),
    Concluded(Outcome),
    /// The pending error was set.
    Alert(String),
    Notice(String),
    /// A manual operation could not reach the service.
    CommandFailed(String),
    Reset,
}

impl SyncEvent {
    pub fn conclusion_message(outcome: Outcome) -> String {
        format!("Game has concluded. Result: {outcome}.")
    }
}

enum Report {
    Resume {
        generation: u64,
        reply: ServiceResult<ResumeReply>,
    },
    Frame {
        generation: u64,
        frame: ServiceResult<Frame>,
        applied: oneshot::Sender<()>,
    },
    LastMove {
        generation: u64,
        reply: ServiceResult<LastMoveReply>,
    },
    Done {
        generation: u64,
    },
    Manual(ManualReply),
}

enum ManualReply {
    Undo(ServiceResult<String>),
    Override(ServiceResult<OverrideReply>),
    Reset(ServiceResult<String>),
}

/// Handle to a running synchronizer.
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Synchronizer has stopped"))
    }

    pub fn enable_capture(&self) -> Result<()> {
        self.send(Command::EnableCapture)
    }

    pub fn disable_capture(&self) -> Result<()> {
        self.send(Command::DisableCapture)
    }

    pub fn toggle_capture(&self) -> Result<()> {
        self.send(Command::ToggleCapture)
    }

    pub fn set_webcam(&self, url: impl Into<String>) -> Result<()> {
        self.send(Command::SetWebcam(url.into()))
    }

    pub fn undo(&self) -> Result<()> {
        self.send(Command::Undo)
    }

    pub fn override_move(&self, uci: impl Into<String>) -> Result<()> {
        self.send(Command::Override(uci.into()))
    }

    pub fn declare(&self, outcome: Outcome) -> Result<()> {
        self.send(Command::Declare(outcome))
    }

    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn acknowledge(&self) -> Result<()> {
        self.send(Command::Acknowledge)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Stops polling, abandons any in-flight chain and waits for the loop to exit.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.commands);
        self.task
            .await
            .map_err(|e| anyhow!("Synchronizer task failed: {}", e))
    }
}

pub struct Synchronizer<S: VisionService> {
    service: Arc<S>,
    config: SyncConfig,
    session: Session,
    events: mpsc::UnboundedSender<SyncEvent>,
    snapshots: watch::Sender<Snapshot>,
    reports: mpsc::UnboundedSender<Report>,
    chain: Option<(u64, JoinHandle<()>)>,
    /// Undo, override or reset awaiting the service.
    manual: Option<JoinHandle<()>>,
    frames_dumped: u64,
}

impl Synchronizer<HttpVisionService> {
    /// Starts a synchronizer talking HTTP to `config.endpoint_base`.
    pub fn connect(config: SyncConfig) -> Result<(SyncHandle, mpsc::UnboundedReceiver<SyncEvent>)> {
        let service = HttpVisionService::new(&config.endpoint_base, config.request_timeout)?;
        Ok(Self::spawn(Arc::new(service), config))
    }
}

impl<S: VisionService> Synchronizer<S> {
    /// Spawns the loop task on the current tokio runtime.
    pub fn spawn(
        service: Arc<S>,
        config: SyncConfig,
    ) -> (SyncHandle, mpsc::UnboundedReceiver<SyncEvent>) {
        let session = Session::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let synchronizer = Self {
            service,
            config,
            session,
            events: event_tx,
            snapshots: snapshot_tx,
            reports: report_tx,
            chain: None,
            manual: None,
            frames_dumped: 0,
        };
        let task = tokio::spawn(synchronizer.run(command_rx, report_rx));

        let handle = SyncHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            task,
        };
        (handle, event_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<Report>,
    ) {
        info!(
            endpoint = %self.config.endpoint_base,
            interval = ?self.config.poll_interval,
            "synchronizer started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(report) = reports.recv() => self.on_report(report),
            }
            self.reap_chain();
            self.publish();
        }

        self.session.disable_capture();
        self.reap_chain();
        if let Some(handle) = self.manual.take() {
            handle.abort();
        }
        self.publish();
        info!("synchronizer stopped");
    }

    fn on_tick(&mut self) {
        if self.manual.is_some() {
            debug!("manual operation pending, skipping tick");
            return;
        }
        let Some(ticket) = self.session.begin_tick() else {
            return;
        };
        debug!(generation = ticket.generation, kind = ?ticket.kind, "tick");
        let handle = tokio::spawn(run_chain(
            Arc::clone(&self.service),
            self.config.webcam.clone(),
            ticket,
            self.reports.clone(),
        ));
        self.chain = Some((ticket.generation, handle));
    }

    fn on_report(&mut self, report: Report) {
        match report {
            Report::Resume { generation, reply } => {
                let update = self.session.apply_resume(generation, reply);
                self.emit_update(update);
            }
            Report::Frame {
                generation,
                frame,
                applied,
            } => {
                // Without the acknowledgement the chain stops before its last-move request.
                let update = self.session.apply_frame(generation, frame);
                if update == Update::FrameInstalled {
                    self.dump_frame();
                    let _ = applied.send(());
                }
                self.emit_update(update);
            }
            Report::LastMove { generation, reply } => {
                let update = self.session.apply_last_move(generation, reply);
                self.emit_update(update);
            }
            Report::Done { generation } => self.session.finish_tick(generation),
            Report::Manual(reply) => {
                self.manual = None;
                self.on_manual_reply(reply);
            }
        }
    }

    fn on_manual_reply(&mut self, reply: ManualReply) {
        match reply {
            ManualReply::Undo(Ok(fen)) => {
                let removed = self.session.apply_undo(fen);
                self.emit(SyncEvent::MoveUndone(removed));
            }
            ManualReply::Undo(Err(e)) => self.command_failed("Undo", e),
            ManualReply::Override(Ok(reply)) => {
                let update = self.session.apply_override(reply);
                self.emit_update(update);
            }
            ManualReply::Override(Err(e)) => self.command_failed("Override", e),
            ManualReply::Reset(Ok(fen)) => {
                self.session.reset(fen);
                self.config.webcam.clear();
                self.emit(SyncEvent::Reset);
            }
            // Nothing was reset; position, moves and webcam stay as they were.
            ManualReply::Reset(Err(e)) => self.command_failed("Reset", e),
        }
    }

    fn on_command(&mut self, command: Command) {
        debug!(?command, "command");
        match command {
            Command::EnableCapture => self.enable_capture(),
            Command::DisableCapture => self.session.disable_capture(),
            Command::ToggleCapture => {
                if self.session.mode() == SyncMode::Idle {
                    self.enable_capture();
                } else {
                    self.session.disable_capture();
                }
            }
            Command::SetWebcam(url) => {
                info!(webcam = %url, "webcam address set");
                self.config.webcam = url;
            }
            Command::Undo => {
                if self.manual_pending("Undo") {
                    return;
                }
                // Replies of the current chain predate the undo.
                self.session.interrupt();
                let service = Arc::clone(&self.service);
                self.start_manual(async move { ManualReply::Undo(service.undo_last_move().await) });
            }
            Command::Override(text) => {
                if self.manual_pending("Override") {
                    return;
                }
                self.session.begin_override();
                match text.trim().parse::<UciMove>() {
                    Err(e) => {
                        debug!(input = %text, error = %e, "override is not UCI");
                        let update = self.session.reject_override();
                        self.emit_update(update);
                    }
                    Ok(uci) => {
                        let service = Arc::clone(&self.service);
                        self.start_manual(async move {
                            ManualReply::Override(service.override_move(&uci).await)
                        });
                    }
                }
            }
            Command::Declare(outcome) => {
                if self.session.declare(outcome) {
                    self.emit(SyncEvent::Concluded(outcome));
                } else {
                    self.emit(SyncEvent::CommandFailed(format!(
                        "Result already recorded: {}",
                        self.session.outcome()
                    )));
                }
            }
            Command::Reset => {
                if self.manual_pending("Reset") {
                    return;
                }
                let service = Arc::clone(&self.service);
                self.start_manual(async move { ManualReply::Reset(service.reset().await) });
            }
            Command::Acknowledge => self.session.acknowledge(),
        }
    }

    /// Refuses `what` while another manual operation is outstanding.
    fn manual_pending(&self, what: &str) -> bool {
        if self.manual.is_none() {
            return false;
        }
        self.emit(SyncEvent::CommandFailed(format!(
            "{what} ignored: a previous request is still pending"
        )));
        true
    }

    fn start_manual<F>(&mut self, request: F)
    where
        F: Future<Output = ManualReply> + Send + 'static,
    {
        let reports = self.reports.clone();
        self.manual = Some(tokio::spawn(async move {
            let reply = request.await;
            let _ = reports.send(Report::Manual(reply));
        }));
    }

    fn enable_capture(&mut self) {
        if !self.session.enable_capture() {
            self.emit(SyncEvent::CommandFailed(format!(
                "Game has concluded ({}); reset to capture a new game",
                self.session.outcome()
            )));
        }
    }

    /// Aborts the chain task once the session no longer accepts its reports.
    fn reap_chain(&mut self) {
        let stale = matches!(&self.chain, Some((generation, _)) if self.session.in_flight() != Some(*generation));
        if stale {
            if let Some((generation, handle)) = self.chain.take() {
                if !handle.is_finished() {
                    debug!(generation, "aborting superseded chain");
                }
                handle.abort();
            }
        }
    }

    fn publish(&mut self) {
        let snapshot = self.session.snapshot();
        let previous_mode = self.snapshots.borrow().mode;
        if snapshot.mode != previous_mode {
            self.emit(SyncEvent::ModeChanged(snapshot.mode));
        }
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn emit(&self, event: SyncEvent) {
        // The receiver may be gone during shutdown; the session is still authoritative.
        let _ = self.events.send(event);
    }

    fn emit_update(&self, update: Update) {
        match update {
            Update::Stale => debug!("stale reply dropped"),
            Update::Retry | Update::FrameInstalled => {}
            Update::Resumed { exact } => {
                let note = if exact { "exact match" } else { "colours match" };
                self.emit(SyncEvent::Notice(format!("Live board aligned ({note}); tracking moves.")));
            }
            Update::ResumedDespite(fault) => {
                self.emit(SyncEvent::Notice(fault.describe(Phase::Resume)));
            }
            Update::Advanced { recorded } => self.emit_recorded(recorded),
            Update::Concluded { outcome, recorded } => {
                self.emit_recorded(recorded);
                self.emit(SyncEvent::Concluded(outcome));
            }
            Update::Aborted { message, .. } => self.emit(SyncEvent::Alert(message)),
            Update::OverrideAccepted { san } => self.emit_recorded(Some(san)),
            Update::OverrideRejected => self.emit(SyncEvent::Alert(ILLEGAL_OVERRIDE_MSG.to_string())),
        }
    }

    fn emit_recorded(&self, recorded: Option<String>) {
        if let Some(san) = recorded {
            self.emit(SyncEvent::MoveRecorded {
                ply: self.session.moves().len(),
                san,
            });
        }
    }

    fn command_failed(&self, what: &str, error: ServiceError) {
        warn!(%error, "{} failed", what);
        self.emit(SyncEvent::CommandFailed(format!("{what} failed: {error}")));
    }

    fn dump_frame(&mut self) {
        let (Some(dir), Some(frame)) = (
            self.config.frame_dump_dir.clone(),
            self.session.frames().current().cloned(),
        ) else {
            return;
        };
        self.frames_dumped += 1;
        let seq = self.frames_dumped;
        // Decoding and PNG encoding are blocking work.
        tokio::task::spawn_blocking(move || {
            if let Err(e) = frame.save_png(&dir, seq) {
                warn!(error = %e, "failed to dump frame");
            }
        });
    }
}

/// One tick's requests, in order. Reports are sent even for failures so the
/// loop can apply its retry rule; `Done` always closes the chain.
async fn run_chain<S: VisionService>(
    service: Arc<S>,
    webcam: String,
    ticket: TickTicket,
    reports: mpsc::UnboundedSender<Report>,
) {
    let generation = ticket.generation;
    match ticket.kind {
        TickKind::Resume => {
            let reply = service.resume(&webcam).await;
            let _ = reports.send(Report::Resume { generation, reply });
        }
        TickKind::Continue => {
            let frame = service.continue_frame(&webcam).await;
            let (applied_tx, applied_rx) = oneshot::channel();
            let sent = reports.send(Report::Frame {
                generation,
                frame,
                applied: applied_tx,
            });
            if sent.is_ok() && applied_rx.await.is_ok() {
                let reply = service.last_move().await;
                let _ = reports.send(Report::LastMove { generation, reply });
            }
        }
    }
    let _ = reports.send(Report::Done { generation });
}
