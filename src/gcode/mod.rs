//! G-code front end: tokenizer, modal executor, and arc expansion.

pub mod arc;
pub mod executor;
pub mod parser;

pub use executor::{execute_block, CoordMode, ExecContext, FeedMode, ModalState, MotionMode};
pub use parser::{parse_line, GcodeBlock};

/// Parse/execute error for one G-code line.
///
/// Serialized with serde's adjacently-tagged representation:
/// `{ "kind": "<variant>", "message": "<human-readable text>" }`
/// so a host can pattern-match on a stable `kind` string. The numeric
/// wire code sent over serial comes from [`crate::error::wire_code`].
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum GcodeError {
    /// Malformed numeric literal or out-of-range value (e.g. `F0`).
    #[error("{0}")]
    InvalidParam(String),

    /// A required word is absent (e.g. `G01` before any feedrate).
    #[error("{0}")]
    MissingParam(String),

    /// M-code outside the supported set.
    #[error("unknown command {0}")]
    UnknownCmd(String),

    /// G-code outside the supported set.
    #[error("unsupported command {0}")]
    UnsupportedCmd(String),

    /// Geometrically impossible arc (degenerate radius, chord longer than
    /// the diameter).
    #[error("{0}")]
    InvalidTarget(String),

    /// The planner ring had no room for a motion segment.
    #[error("planner queue full")]
    PlannerFull,

    /// Line submitted while the machine state does not accept lines
    /// (alarm, homing, hold, …).
    #[error("machine state does not accept lines")]
    WrongState,
}
