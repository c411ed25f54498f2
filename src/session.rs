//! Synchronization state machine.
//!
//! `Session` owns everything the poller mutates: sync mode, position, move
//! list, outcome, the live camera frame and the pending error. It performs
//! no I/O; the runtime in `synchronizer` feeds it service replies tagged
//! with the generation of the tick that produced them, and replies from a
//! chain that is no longer in flight are dropped.
//!
//! Mode transitions:
//!
//! ```text
//! Idle --enable--> Resuming --aligned/benign--> Continuing
//!   ^                 |                             |
//!   +---- fault / disable / conclude / override ----+
//! ```

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fault::{Fault, Phase, Verdict};
use crate::frame::{Frame, FrameSlot};
use crate::vision::{LastMoveReply, OverrideReply, ResumeReply, ServiceResult};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

pub const ILLEGAL_OVERRIDE_MSG: &str = "Illegal move entered.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Capture disabled: ticks issue no requests.
    #[default]
    Idle,
    /// Probing whether the live board matches before trusting deltas.
    Resuming,
    /// Tracking the game ply by ply.
    Continuing,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Idle => write!(f, "idle"),
            SyncMode::Resuming => write!(f, "resuming"),
            SyncMode::Continuing => write!(f, "continuing"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    InProgress,
    WhiteWin,
    BlackWin,
    Draw,
}

impl Outcome {
    /// PGN result token.
    pub fn token(self) -> &'static str {
        match self {
            Outcome::InProgress => "*",
            Outcome::WhiteWin => "1-0",
            Outcome::BlackWin => "0-1",
            Outcome::Draw => "1/2-1/2",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Outcome::InProgress
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown game result '{0}'")]
pub struct ParseOutcomeError(String);

impl FromStr for Outcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "*" => Ok(Outcome::InProgress),
            "1-0" => Ok(Outcome::WhiteWin),
            "0-1" => Ok(Outcome::BlackWin),
            "1/2-1/2" => Ok(Outcome::Draw),
            other => Err(ParseOutcomeError(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickKind {
    Resume,
    Continue,
}

/// Permission to run one request chain, valid while its generation is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickTicket {
    pub generation: u64,
    pub kind: TickKind,
}

/// What applying a reply did to the session.
#[derive(Debug, PartialEq, Eq)]
pub enum Update {
    /// The reply belonged to a cancelled or superseded chain and was ignored.
    Stale,
    /// Transport failure; nothing changed, the next tick tries again.
    Retry,
    FrameInstalled,
    Resumed { exact: bool },
    /// Resume reported a benign fault and capture carried on anyway.
    ResumedDespite(Fault),
    Advanced { recorded: Option<String> },
    Concluded { outcome: Outcome, recorded: Option<String> },
    Aborted { fault: Fault, message: String },
    OverrideAccepted { san: String },
    OverrideRejected,
}

/// A copy of the user-visible state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub fen: String,
    pub moves: Vec<String>,
    pub mode: SyncMode,
    pub outcome: Outcome,
    pub pending_error: Option<String>,
    pub frame_len: Option<usize>,
}

#[derive(Debug)]
pub struct Session {
    fen: String,
    moves: Vec<String>,
    mode: SyncMode,
    outcome: Outcome,
    frames: FrameSlot,
    pending_error: Option<String>,
    generation: u64,
    in_flight: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_fen(STARTING_FEN.to_string())
    }

    pub fn with_fen(fen: String) -> Self {
        Self {
            fen,
            moves: Vec::new(),
            mode: SyncMode::Idle,
            outcome: Outcome::InProgress,
            frames: FrameSlot::new(),
            pending_error: None,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn fen(&self) -> &str {
        &self.fen
    }

    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn pending_error(&self) -> Option<&str> {
        self.pending_error.as_deref()
    }

    pub fn frames(&self) -> &FrameSlot {
        &self.frames
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation of the chain currently allowed to report, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            fen: self.fen.clone(),
            moves: self.moves.clone(),
            mode: self.mode,
            outcome: self.outcome,
            pending_error: self.pending_error.clone(),
            frame_len: self.frames.current().map(Frame::len),
        }
    }

    // *************** Capture control ***************

    /// Starts capture from `Idle`. Refused once the game is over.
    pub fn enable_capture(&mut self) -> bool {
        if self.outcome.is_terminal() {
            warn!(outcome = %self.outcome, "game is over; reset before capturing again");
            return false;
        }
        if self.mode == SyncMode::Idle {
            self.mode = SyncMode::Resuming;
            info!("capture enabled, resuming");
        }
        true
    }

    /// Stops capture. Position and moves are left as they are.
    pub fn disable_capture(&mut self) {
        if self.mode != SyncMode::Idle {
            info!(from = %self.mode, "capture disabled");
        }
        self.go_idle();
    }

    pub fn acknowledge(&mut self) {
        self.pending_error = None;
    }

    /// Discards the chain in flight without leaving the current mode.
    pub fn interrupt(&mut self) {
        self.cancel_in_flight();
    }

    fn go_idle(&mut self) {
        self.mode = SyncMode::Idle;
        self.cancel_in_flight();
        self.frames.release();
    }

    fn cancel_in_flight(&mut self) {
        if let Some(generation) = self.in_flight.take() {
            debug!(generation, "in-flight chain cancelled");
        }
        self.generation += 1;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight == Some(generation)
    }

    // *************** Ticks ***************

    /// Claims the next tick. `None` while idle or while the previous chain is
    /// still outstanding.
    pub fn begin_tick(&mut self) -> Option<TickTicket> {
        let kind = match self.mode {
            SyncMode::Idle => return None,
            SyncMode::Resuming => TickKind::Resume,
            SyncMode::Continuing => TickKind::Continue,
        };
        if let Some(generation) = self.in_flight {
            debug!(generation, "previous tick still in flight, skipping");
            return None;
        }
        self.generation += 1;
        self.in_flight = Some(self.generation);
        Some(TickTicket {
            generation: self.generation,
            kind,
        })
    }

    /// Marks the chain as settled so the next tick may start.
    pub fn finish_tick(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.in_flight = None;
        }
    }

    pub fn apply_resume(&mut self, generation: u64, reply: ServiceResult<ResumeReply>) -> Update {
        if !self.is_current(generation) || self.mode != SyncMode::Resuming {
            return Update::Stale;
        }
        match reply {
            Err(e) => {
                debug!(error = %e, "resume probe failed, retrying next tick");
                Update::Retry
            }
            Ok(ResumeReply::Aligned { exact }) => {
                info!(exact, "board aligned, continuing");
                self.mode = SyncMode::Continuing;
                self.pending_error = None;
                Update::Resumed { exact }
            }
            Ok(ResumeReply::Fault(fault)) => match fault.verdict(Phase::Resume) {
                Verdict::Proceed => {
                    info!(%fault, note = %fault.describe(Phase::Resume), "benign resume fault, continuing");
                    self.mode = SyncMode::Continuing;
                    self.pending_error = None;
                    Update::ResumedDespite(fault)
                }
                Verdict::Abort(message) => self.abort(fault, message),
            },
        }
    }

    pub fn apply_frame(&mut self, generation: u64, frame: ServiceResult<Frame>) -> Update {
        if !self.is_current(generation) || self.mode != SyncMode::Continuing {
            return Update::Stale;
        }
        match frame {
            Err(e) => {
                debug!(error = %e, "frame request failed, retrying next tick");
                Update::Retry
            }
            Ok(frame) => {
                self.frames.install(frame);
                Update::FrameInstalled
            }
        }
    }

    pub fn apply_last_move(
        &mut self,
        generation: u64,
        reply: ServiceResult<LastMoveReply>,
    ) -> Update {
        if !self.is_current(generation) || self.mode != SyncMode::Continuing {
            return Update::Stale;
        }
        match reply {
            Err(e) => {
                debug!(error = %e, "last-move request failed, retrying next tick");
                Update::Retry
            }
            Ok(LastMoveReply::Fault(fault)) => match fault.verdict(Phase::Continue) {
                // No continue-phase fault is benign; keep the arm total anyway.
                Verdict::Proceed => Update::Advanced { recorded: None },
                Verdict::Abort(message) => self.abort(fault, message),
            },
            Ok(LastMoveReply::Settled { fen, san, outcome }) => {
                self.fen = fen;
                self.pending_error = None;
                let recorded = san.filter(|m| self.moves.last() != Some(m));
                if let Some(m) = &recorded {
                    info!(ply = self.moves.len() + 1, san = %m, "move recorded");
                    self.moves.push(m.clone());
                }
                if outcome.is_terminal() && !self.outcome.is_terminal() {
                    self.outcome = outcome;
                    self.go_idle();
                    info!(%outcome, "game concluded");
                    return Update::Concluded { outcome, recorded };
                }
                Update::Advanced { recorded }
            }
        }
    }

    fn abort(&mut self, fault: Fault, message: String) -> Update {
        warn!(%fault, mode = %self.mode, "vision fault, stopping capture");
        self.go_idle();
        self.pending_error = Some(message.clone());
        Update::Aborted { fault, message }
    }

    // *************** Manual operations ***************

    /// Adopts the position after a server-side undo and drops the last ply.
    /// Works in any mode; replies still in flight predate the undo and are discarded.
    pub fn apply_undo(&mut self, fen: String) -> Option<String> {
        self.cancel_in_flight();
        self.fen = fen;
        let removed = self.moves.pop();
        info!(removed = ?removed, "last move undone");
        removed
    }

    /// Capture stops as soon as the user starts an override.
    pub fn begin_override(&mut self) {
        self.go_idle();
    }

    /// A move that does not even parse never reaches the service.
    pub fn reject_override(&mut self) -> Update {
        self.go_idle();
        self.pending_error = Some(ILLEGAL_OVERRIDE_MSG.to_string());
        Update::OverrideRejected
    }

    pub fn apply_override(&mut self, reply: OverrideReply) -> Update {
        match reply {
            OverrideReply::Accepted { fen, san } => {
                info!(%san, "override accepted");
                self.fen = fen;
                self.moves.push(san.clone());
                self.pending_error = None;
                Update::OverrideAccepted { san }
            }
            OverrideReply::Rejected => self.reject_override(),
        }
    }

    /// Records a resignation or agreed draw. The first terminal outcome wins.
    pub fn declare(&mut self, outcome: Outcome) -> bool {
        if !outcome.is_terminal() || self.outcome.is_terminal() {
            return false;
        }
        self.outcome = outcome;
        self.go_idle();
        info!(%outcome, "outcome declared");
        true
    }

    /// Returns to the initial lifecycle state around the server's fresh position.
    pub fn reset(&mut self, fen: String) {
        let generation = self.generation + 1;
        *self = Session::with_fen(fen);
        self.generation = generation;
        info!("session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::ServiceError;

    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
    const AFTER_E5: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2";

    fn transport_error() -> ServiceError {
        ServiceError::Decode {
            path: "/lastmove".into(),
            details: "connection reset".into(),
        }
    }

    fn settled(fen: &str, san: Option<&str>, outcome: Outcome) -> ServiceResult<LastMoveReply> {
        Ok(LastMoveReply::Settled {
            fen: fen.into(),
            san: san.map(str::to_string),
            outcome,
        })
    }

    /// Brings a fresh session to `Continuing` through a clean resume.
    fn continuing() -> Session {
        let mut s = Session::new();
        s.enable_capture();
        let t = s.begin_tick().unwrap();
        s.apply_resume(t.generation, Ok(ResumeReply::Aligned { exact: true }));
        s.finish_tick(t.generation);
        assert_eq!(s.mode(), SyncMode::Continuing);
        s
    }

    /// Runs one continue tick with the given reply.
    fn continue_tick(s: &mut Session, reply: ServiceResult<LastMoveReply>) -> Update {
        let t = s.begin_tick().unwrap();
        assert_eq!(t.kind, TickKind::Continue);
        s.apply_frame(t.generation, Ok(Frame::new(vec![0u8; 4], None)));
        let update = s.apply_last_move(t.generation, reply);
        s.finish_tick(t.generation);
        update
    }

    #[test]
    fn test_initial_state() {
        let s = Session::new();
        assert_eq!(s.fen(), STARTING_FEN);
        assert!(s.moves().is_empty());
        assert_eq!(s.mode(), SyncMode::Idle);
        assert_eq!(s.outcome(), Outcome::InProgress);
        assert!(s.frames().current().is_none());
        assert!(s.pending_error().is_none());
    }

    #[test]
    fn test_idle_tick_issues_nothing() {
        let mut s = Session::new();
        assert!(s.begin_tick().is_none());
    }

    #[test]
    fn test_enable_capture_always_resumes_first() {
        let mut s = continuing();
        s.disable_capture();
        assert!(s.enable_capture());
        assert_eq!(s.mode(), SyncMode::Resuming);
        assert_eq!(s.begin_tick().unwrap().kind, TickKind::Resume);
    }

    #[test]
    fn test_resume_aligned_moves_to_continuing() {
        let mut s = Session::new();
        s.enable_capture();
        let t = s.begin_tick().unwrap();
        let update = s.apply_resume(t.generation, Ok(ResumeReply::Aligned { exact: false }));
        assert_eq!(update, Update::Resumed { exact: false });
        assert_eq!(s.mode(), SyncMode::Continuing);
    }

    #[test]
    fn test_possible_move_made_is_promoted() {
        let mut s = Session::new();
        s.enable_capture();
        let t = s.begin_tick().unwrap();
        let update = s.apply_resume(t.generation, Ok(ResumeReply::Fault(Fault::PossibleMoveMade)));
        assert_eq!(update, Update::ResumedDespite(Fault::PossibleMoveMade));
        assert_eq!(s.mode(), SyncMode::Continuing);
        assert!(s.pending_error().is_none());
    }

    #[test]
    fn test_resume_fault_aborts_and_keeps_position() {
        let mut s = continuing();
        continue_tick(&mut s, settled(AFTER_E4, Some("e4"), Outcome::InProgress));
        s.disable_capture();
        s.enable_capture();

        let t = s.begin_tick().unwrap();
        let update = s.apply_resume(t.generation, Ok(ResumeReply::Fault(Fault::NoCapture)));
        assert!(matches!(update, Update::Aborted { fault: Fault::NoCapture, .. }));
        assert_eq!(s.mode(), SyncMode::Idle);
        assert_eq!(s.fen(), AFTER_E4);
        assert_eq!(s.moves(), ["e4"]);
        assert!(s.pending_error().unwrap().contains("IP Camera"));
    }

    #[test]
    fn test_resume_transport_failure_retries_silently() {
        let mut s = Session::new();
        s.enable_capture();
        let t = s.begin_tick().unwrap();
        let update = s.apply_resume(t.generation, Err(transport_error()));
        assert_eq!(update, Update::Retry);
        s.finish_tick(t.generation);

        assert_eq!(s.mode(), SyncMode::Resuming);
        assert!(s.pending_error().is_none());
        assert_eq!(s.begin_tick().unwrap().kind, TickKind::Resume);
    }

    #[test]
    fn test_settled_move_replaces_position_and_appends() {
        let mut s = continuing();
        let update = continue_tick(&mut s, settled(AFTER_E4, Some("e4"), Outcome::InProgress));
        assert_eq!(update, Update::Advanced { recorded: Some("e4".into()) });
        assert_eq!(s.fen(), AFTER_E4);
        assert_eq!(s.moves(), ["e4"]);
        assert_eq!(s.mode(), SyncMode::Continuing);
    }

    #[test]
    fn test_duplicate_move_is_suppressed() {
        let mut s = continuing();
        continue_tick(&mut s, settled(AFTER_E4, Some("e4"), Outcome::InProgress));
        let update = continue_tick(&mut s, settled(AFTER_E4, Some("e4"), Outcome::InProgress));
        assert_eq!(update, Update::Advanced { recorded: None });
        assert_eq!(s.moves(), ["e4"]);

        continue_tick(&mut s, settled(AFTER_E5, Some("e5"), Outcome::InProgress));
        assert_eq!(s.moves(), ["e4", "e5"]);
    }

    #[test]
    fn test_null_move_updates_position_only() {
        let mut s = continuing();
        let update = continue_tick(&mut s, settled(STARTING_FEN, None, Outcome::InProgress));
        assert_eq!(update, Update::Advanced { recorded: None });
        assert!(s.moves().is_empty());
    }

    #[test]
    fn test_terminal_status_concludes_and_idles() {
        let mut s = continuing();
        let update = continue_tick(&mut s, settled(AFTER_E4, Some("Qxf7#"), Outcome::WhiteWin));
        assert_eq!(
            update,
            Update::Concluded { outcome: Outcome::WhiteWin, recorded: Some("Qxf7#".into()) }
        );
        assert_eq!(s.outcome(), Outcome::WhiteWin);
        assert_eq!(s.mode(), SyncMode::Idle);
        assert_eq!(s.frames().live(), 0);
    }

    #[test]
    fn test_outcome_is_monotonic() {
        let mut s = continuing();
        let t = s.begin_tick().unwrap();
        s.apply_last_move(t.generation, settled(AFTER_E4, Some("e4"), Outcome::Draw));
        assert_eq!(s.mode(), SyncMode::Idle);

        // A late reply for the same chain no longer applies.
        let late = s.apply_last_move(t.generation, settled(AFTER_E5, Some("e5"), Outcome::BlackWin));
        assert_eq!(late, Update::Stale);
        assert_eq!(s.outcome(), Outcome::Draw);

        // Capture cannot restart and declarations are ignored.
        assert!(!s.enable_capture());
        assert_eq!(s.mode(), SyncMode::Idle);
        assert!(!s.declare(Outcome::WhiteWin));
        assert_eq!(s.outcome(), Outcome::Draw);
    }

    #[test]
    fn test_continue_fault_aborts() {
        let mut s = continuing();
        let update = continue_tick(
            &mut s,
            Ok(LastMoveReply::Fault(Fault::MoveIllegal("Illegal move made: e2e5".into()))),
        );
        assert!(matches!(update, Update::Aborted { .. }));
        assert_eq!(s.mode(), SyncMode::Idle);
        assert_eq!(s.fen(), STARTING_FEN);
        assert_eq!(
            s.pending_error(),
            Some("Illegal move made: e2e5\nPlease restore the live board to match MemoChess.")
        );
        assert_eq!(s.frames().live(), 0);
    }

    #[test]
    fn test_pending_error_replaced_then_cleared_by_success() {
        let mut s = Session::new();
        s.enable_capture();
        let t = s.begin_tick().unwrap();
        s.apply_resume(t.generation, Ok(ResumeReply::Fault(Fault::ImageConversion)));
        let first = s.pending_error().unwrap().to_string();

        s.enable_capture();
        let t = s.begin_tick().unwrap();
        s.apply_resume(t.generation, Ok(ResumeReply::Fault(Fault::Unknown("boom".into()))));
        assert_ne!(s.pending_error().unwrap(), first);
        assert_eq!(s.pending_error(), Some("Unknown error occurred: boom"));

        s.enable_capture();
        let t = s.begin_tick().unwrap();
        s.apply_resume(t.generation, Ok(ResumeReply::Aligned { exact: true }));
        assert!(s.pending_error().is_none());
    }

    #[test]
    fn test_acknowledge_clears_error() {
        let mut s = Session::new();
        s.reject_override();
        assert_eq!(s.pending_error(), Some(ILLEGAL_OVERRIDE_MSG));
        s.acknowledge();
        assert!(s.pending_error().is_none());
    }

    #[test]
    fn test_single_flight() {
        let mut s = Session::new();
        s.enable_capture();
        let t = s.begin_tick().unwrap();
        assert!(s.begin_tick().is_none());
        s.finish_tick(t.generation);
        assert!(s.begin_tick().is_some());
    }

    #[test]
    fn test_replies_after_disable_are_dropped() {
        let mut s = continuing();
        let t = s.begin_tick().unwrap();
        s.disable_capture();

        let frame = s.apply_frame(t.generation, Ok(Frame::new(vec![1, 2, 3], None)));
        let reply = s.apply_last_move(t.generation, settled(AFTER_E4, Some("e4"), Outcome::InProgress));
        assert_eq!(frame, Update::Stale);
        assert_eq!(reply, Update::Stale);
        assert_eq!(s.fen(), STARTING_FEN);
        assert!(s.moves().is_empty());
        assert_eq!(s.frames().live(), 0);
    }

    #[test]
    fn test_superseded_generation_is_dropped_after_restart() {
        let mut s = continuing();
        let old = s.begin_tick().unwrap();
        s.disable_capture();
        s.enable_capture();
        let new = s.begin_tick().unwrap();
        assert!(new.generation > old.generation);

        let update = s.apply_resume(old.generation, Ok(ResumeReply::Aligned { exact: true }));
        assert_eq!(update, Update::Stale);
        assert_eq!(s.mode(), SyncMode::Resuming);
    }

    #[test]
    fn test_frame_slot_holds_one_frame() {
        let mut s = continuing();
        for _ in 0..5 {
            continue_tick(&mut s, settled(STARTING_FEN, None, Outcome::InProgress));
            assert_eq!(s.frames().live(), 1);
        }
        assert_eq!(s.frames().installed(), 5);
        assert_eq!(s.frames().released(), 4);
        s.disable_capture();
        assert_eq!(s.frames().live(), 0);
    }

    #[test]
    fn test_undo_removes_last_ply_in_any_mode() {
        let mut s = continuing();
        continue_tick(&mut s, settled(AFTER_E4, Some("e4"), Outcome::InProgress));
        continue_tick(&mut s, settled(AFTER_E5, Some("e5"), Outcome::InProgress));

        let removed = s.apply_undo(AFTER_E4.into());
        assert_eq!(removed.as_deref(), Some("e5"));
        assert_eq!(s.moves(), ["e4"]);
        assert_eq!(s.fen(), AFTER_E4);
        assert_eq!(s.mode(), SyncMode::Continuing);

        s.disable_capture();
        s.apply_undo(STARTING_FEN.into());
        assert!(s.moves().is_empty());
        assert_eq!(s.fen(), STARTING_FEN);
        assert_eq!(s.mode(), SyncMode::Idle);

        assert_eq!(s.apply_undo(STARTING_FEN.into()), None);
    }

    #[test]
    fn test_undo_discards_in_flight_chain() {
        let mut s = continuing();
        let t = s.begin_tick().unwrap();
        s.apply_undo(STARTING_FEN.into());
        let late = s.apply_last_move(t.generation, settled(AFTER_E4, Some("e4"), Outcome::InProgress));
        assert_eq!(late, Update::Stale);
        assert!(s.begin_tick().is_some());
    }

    #[test]
    fn test_interrupt_keeps_mode() {
        let mut s = continuing();
        let t = s.begin_tick().unwrap();
        s.interrupt();
        assert_eq!(s.mode(), SyncMode::Continuing);
        assert_eq!(s.in_flight(), None);
        assert_eq!(s.apply_frame(t.generation, Ok(Frame::new(vec![1], None))), Update::Stale);
        assert_eq!(s.frames().live(), 0);
    }

    #[test]
    fn test_override_flow() {
        let mut s = continuing();
        s.begin_override();
        assert_eq!(s.mode(), SyncMode::Idle);

        let update = s.apply_override(OverrideReply::Accepted {
            fen: AFTER_E4.into(),
            san: "e4".into(),
        });
        assert_eq!(update, Update::OverrideAccepted { san: "e4".into() });
        assert_eq!(s.moves(), ["e4"]);
        assert_eq!(s.fen(), AFTER_E4);

        let update = s.apply_override(OverrideReply::Rejected);
        assert_eq!(update, Update::OverrideRejected);
        assert_eq!(s.moves(), ["e4"]);
        assert_eq!(s.pending_error(), Some(ILLEGAL_OVERRIDE_MSG));
    }

    #[test]
    fn test_declare_outcome() {
        let mut s = continuing();
        assert!(!s.declare(Outcome::InProgress));
        assert!(s.declare(Outcome::BlackWin));
        assert_eq!(s.outcome(), Outcome::BlackWin);
        assert_eq!(s.mode(), SyncMode::Idle);
        assert!(!s.declare(Outcome::Draw));
        assert_eq!(s.outcome(), Outcome::BlackWin);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut s = continuing();
        continue_tick(&mut s, settled(AFTER_E4, Some("e4"), Outcome::WhiteWin));
        let before = s.generation();

        s.reset(STARTING_FEN.into());
        assert_eq!(s.snapshot(), Session::new().snapshot());
        assert!(s.generation() > before);
        assert!(s.enable_capture());
    }

    #[test]
    fn test_outcome_tokens_parse() {
        for outcome in [Outcome::InProgress, Outcome::WhiteWin, Outcome::BlackWin, Outcome::Draw] {
            assert_eq!(outcome.token().parse::<Outcome>().unwrap(), outcome);
        }
        assert!("1-1".parse::<Outcome>().is_err());
    }
}
