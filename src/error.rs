//! Error taxonomy for the harness.
//!
//! Every failure a scenario can hit maps to exactly one variant, so a test
//! report can tell apart "the program under test misbehaved"
//! ([`Error::Timeout`], [`Error::Eof`], [`Error::UnexpectedDeath`],
//! [`Error::Hang`]), "the instrumentation supervisor flagged the run"
//! ([`Error::SupervisorVerdict`]) and "the harness was used incorrectly"
//! ([`Error::StillAlive`]).

use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// PTY allocation or process creation failed.
    #[error("failed to spawn `{command}`: {cause:#}")]
    Spawn {
        command: String,
        cause: anyhow::Error,
    },

    /// The expected pattern never showed up before the deadline.
    #[error("timed out after {elapsed:?} waiting for {pattern}")]
    Timeout { pattern: String, elapsed: Duration },

    /// The output stream closed before the pattern matched. Unlike a
    /// timeout this means the process exited, not that it was slow.
    #[error("output stream closed before {pattern} matched")]
    Eof { pattern: String },

    /// The process was gone right after a step that should have left it
    /// running.
    #[error("process is no longer alive")]
    UnexpectedDeath,

    /// The process outlived the bounded post-quit polling window.
    #[error("process still alive after {polls} liveness polls at {interval:?} intervals")]
    Hang { polls: u32, interval: Duration },

    /// The instrumentation supervisor exited non-zero, i.e. it detected a
    /// leak or an invalid access in the wrapped run.
    #[error("supervisor exited with status {status}, expected 0")]
    SupervisorVerdict { status: u32 },

    /// A non-forced close was attempted on a live process.
    #[error("refusing to close a session whose process is still alive without force")]
    StillAlive,

    /// A scenario step failed; carries the command that was sent.
    #[error("step `{command}` failed: {source}")]
    Step {
        command: String,
        #[source]
        source: Box<Error>,
    },

    #[error("pty i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pattern: {0}")]
    BadPattern(#[from] regex::Error),
}

impl Error {
    /// Wrap this error with the scenario command that triggered it.
    pub(crate) fn in_step(self, command: &str) -> Error {
        Error::Step {
            command: command.to_string(),
            source: Box::new(self),
        }
    }
}
