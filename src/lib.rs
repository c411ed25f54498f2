//! MemoChess sync client.
//! Mirrors a physical chessboard into a digital game record by polling a
//! remote vision service, and formats the record for display and PGN export.

pub mod config;
pub mod fault;
pub mod frame;
pub mod record;
pub mod session;
pub mod synchronizer;
pub mod vision;
