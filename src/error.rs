use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Why a probe invocation produced no usable snapshot.
///
/// These never leave the probe adapter; they are logged, counted and
/// replaced by an empty snapshot.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to launch probe `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("probe did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("probe exited with {status}: {stderr}")]
    NonZeroExit { status: ExitStatus, stderr: String },

    #[error("probe output is not a valid snapshot: {0}")]
    MalformedOutput(#[from] serde_json::Error),

    #[error("I/O error while reading probe output: {0}")]
    Io(#[from] io::Error),
}

impl ProbeError {
    /// Stable label used in logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Launch { .. } => "launch",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::NonZeroExit { .. } => "non_zero_exit",
            ProbeError::MalformedOutput(_) => "malformed_output",
            ProbeError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let malformed = serde_json::from_str::<u32>("nope").unwrap_err();
        let errors = [
            ProbeError::Timeout(Duration::from_millis(10)),
            ProbeError::MalformedOutput(malformed),
            ProbeError::Io(io::Error::other("closed")),
        ];
        let kinds: Vec<&str> = errors.iter().map(ProbeError::kind).collect();
        assert_eq!(kinds, vec!["timeout", "malformed_output", "io"]);
    }

    #[test]
    fn timeout_message_mentions_bound() {
        let err = ProbeError::Timeout(Duration::from_millis(2500));
        assert_eq!(err.to_string(), "probe did not finish within 2500ms");
    }
}
