use thiserror::Error;

/// The pure Match Engine never errors in the I/O sense; a refused command
/// produces one of these and leaves the match untouched (spec §4.4, §7).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("command not valid from the match's current state")]
    InvalidTransition,
    #[error("actor is not authorized to issue this command")]
    Unauthorized,
    #[error("participant id is not on this match")]
    UnknownParticipant,
    #[error("command did not match the expected shape")]
    MalformedCommand,
    #[error("match is in a terminal state")]
    MatchTerminal,
}

impl Rejection {
    /// The `ERROR.data.kind` string sent back to the originating connection.
    pub fn frame_kind(&self) -> &'static str {
        match self {
            Rejection::InvalidTransition => "InvalidTransition",
            Rejection::Unauthorized => "Unauthorized",
            Rejection::UnknownParticipant => "UnknownParticipant",
            Rejection::MalformedCommand => "MalformedCommand",
            Rejection::MatchTerminal => "MatchTerminal",
        }
    }
}
