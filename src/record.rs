//! Move-record formatting.
//! Turns the flat ply list into numbered (white, black) rows for display,
//! and into PGN text for export. Stateless.

use std::fmt;

use crate::session::Outcome;

/// One numbered row of the move list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveRow {
    pub number: usize,
    pub white: String,
    /// Empty when white has moved and black has not replied yet.
    pub black: String,
}

impl fmt::Display for MoveRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.black.is_empty() {
            write!(f, "{}. {}", self.number, self.white)
        } else {
            write!(f, "{}. {} {}", self.number, self.white, self.black)
        }
    }
}

/// Tag pair values written above the movetext.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PgnHeaders {
    pub event: String,
    pub white: String,
    pub black: String,
}

/// Pairs plies into rows: `ceil(n / 2)` rows numbered from 1.
pub fn pair_moves(moves: &[String]) -> Vec<MoveRow> {
    moves
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| MoveRow {
            number: i + 1,
            white: pair[0].clone(),
            black: pair.get(1).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Renders the movetext: rows joined by spaces, then the result token
/// unless the game is still in progress.
pub fn movetext(moves: &[String], outcome: Outcome) -> String {
    let mut parts: Vec<String> = pair_moves(moves).iter().map(ToString::to_string).collect();
    if outcome.is_terminal() {
        parts.push(outcome.token().to_string());
    }
    parts.join(" ")
}

/// Composes a complete PGN document.
pub fn compose_pgn(headers: &PgnHeaders, moves: &[String], outcome: Outcome) -> String {
    format!(
        "[Event \"{}\"]\n[White \"{}\"]\n[Black \"{}\"]\n[Result \"{}\"]\n\n{}\n",
        escape_tag(&headers.event),
        escape_tag(&headers.white),
        escape_tag(&headers.black),
        outcome.token(),
        movetext(moves, outcome),
    )
}

// PGN tag values are quoted strings; backslash and quote must be escaped.
fn escape_tag(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
