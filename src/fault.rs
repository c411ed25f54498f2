//! Fault classification.
//! Maps the error tags reported by the vision service onto a closed set of
//! faults, and decides per sync phase whether a fault aborts capture or is a
//! benign false positive. Pure: nothing here touches session state.

use std::fmt;

const CORNERS_MSG: &str =
    "The model could not detect all board corners. Please adjust the board or lighting.";
const RESTORE_MSG: &str = "Please restore the live board to match MemoChess.";
const MISMATCH_MSG: &str = "The live board position does not match Memochess.";

/// The request that produced a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Position probe issued while resuming.
    Resume,
    /// Last-move request issued while continuing.
    Continue,
}

/// A failure reported by the vision service inside an otherwise valid reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Board corners were not detected.
    ImageConversion,
    /// A single piece moved to a square it cannot legally reach.
    MoveIllegal(String),
    /// The observed change matches no legal move.
    MoveImpossible(String),
    /// The live board differs from the digital one; a move may have been made before capture.
    PossibleMoveMade,
    /// The upstream camera could not be reached.
    NoCapture,
    /// Any tag this client does not know.
    Unknown(String),
}

/// What the synchronizer should do with a fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Benign: carry on as if the request succeeded.
    Proceed,
    /// Stop capturing and show the message.
    Abort(String),
}

impl Fault {
    /// Decodes a raw tag plus optional detail.
    ///
    /// `move-illegal` is matched by prefix because the resume probe may
    /// append the offending move to the tag itself.
    pub fn from_tag(tag: &str, detail: Option<&str>) -> Self {
        let tag = tag.trim();
        let detail = detail.map(str::trim).filter(|d| !d.is_empty());
        match tag {
            "image-conversion" => Fault::ImageConversion,
            "move-impossible" => Fault::MoveImpossible(detail.unwrap_or_default().to_string()),
            "possible-move-made" => Fault::PossibleMoveMade,
            "no-capture" => Fault::NoCapture,
            t if t.starts_with("move-illegal") => {
                let inline = t["move-illegal".len()..].trim_start_matches([':', ' ']);
                let detail = detail.unwrap_or(inline);
                Fault::MoveIllegal(detail.to_string())
            }
            other => Fault::Unknown(other.to_string()),
        }
    }

    /// The wire tag this fault was decoded from.
    pub fn tag(&self) -> &str {
        match self {
            Fault::ImageConversion => "image-conversion",
            Fault::MoveIllegal(_) => "move-illegal",
            Fault::MoveImpossible(_) => "move-impossible",
            Fault::PossibleMoveMade => "possible-move-made",
            Fault::NoCapture => "no-capture",
            Fault::Unknown(tag) => tag,
        }
    }

    /// Benign faults during resume are false positives of the alignment check.
    pub fn is_benign(&self, phase: Phase) -> bool {
        matches!(
            (phase, self),
            (
                Phase::Resume,
                Fault::PossibleMoveMade | Fault::MoveIllegal(_) | Fault::MoveImpossible(_)
            )
        )
    }

    pub fn verdict(&self, phase: Phase) -> Verdict {
        if self.is_benign(phase) {
            Verdict::Proceed
        } else {
            Verdict::Abort(self.describe(phase))
        }
    }

    /// User-facing text for this fault in the given phase.
    pub fn describe(&self, phase: Phase) -> String {
        match (phase, self) {
            (_, Fault::ImageConversion) => CORNERS_MSG.to_string(),
            (Phase::Resume, Fault::PossibleMoveMade) => {
                format!("{MISMATCH_MSG} Did you already make a move?")
            }
            (Phase::Resume, Fault::MoveIllegal(_) | Fault::MoveImpossible(_)) => {
                format!("{MISMATCH_MSG} Please restore the live board before starting capture.")
            }
            (Phase::Resume, Fault::NoCapture) => {
                "No live board capture could be found. Is the IP Camera server started?".to_string()
            }
            (Phase::Continue, Fault::MoveIllegal(detail)) => format!("{detail}\n{RESTORE_MSG}"),
            (Phase::Continue, Fault::MoveImpossible(detail)) => {
                format!("An impossible move was made.\n{detail}\n{RESTORE_MSG}")
            }
            (_, other) => format!("Unknown error occurred: {}", other.tag()),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::MoveIllegal(d) | Fault::MoveImpossible(d) if !d.is_empty() => {
                write!(f, "{} ({})", self.tag(), d)
            }
            _ => f.write_str(self.tag()),
        }
    }
}
