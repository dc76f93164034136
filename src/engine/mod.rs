pub mod command;
pub mod rejection;
pub mod state_machine;

pub use command::{Command, ScoreKind};
pub use rejection::Rejection;
pub use state_machine::{apply, ApplyOutcome};
