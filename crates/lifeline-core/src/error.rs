//! Harness-level error taxonomy.
//!
//! Infrastructure errors (the bridge or the symbolizer failing) are kept
//! apart from [`HarnessError::Crash`], the assertion failure the suite exists
//! to catch. Neither kind is retried or downgraded.

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::crash::CrashKind;
use crate::symbolicate::SymbolicationError;

/// A failure signature found in the device log.
#[derive(Debug, Clone)]
pub struct CrashFailure {
    /// What was detected.
    pub kind: CrashKind,
    /// The saved raw log.
    pub log_path: PathBuf,
    /// The symbolicated backtrace, for native crashes.
    pub backtrace_path: Option<PathBuf>,
    /// First log line carrying the marker, with its 1-based line number.
    pub evidence: Option<(usize, String)>,
}

impl std::fmt::Display for CrashFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} detected in test (log: {})", self.kind, self.log_path.display())?;
        if let Some(backtrace) = &self.backtrace_path {
            write!(f, " (backtrace: {})", backtrace.display())?;
        }
        if let Some((line, text)) = &self.evidence {
            write!(f, "\n  line {}: {}", line, text)?;
        }
        Ok(())
    }
}

/// Errors surfaced by sessions and scenarios.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A bridge command failed.
    #[error("bridge command failed: {0}")]
    Channel(#[from] ChannelError),

    /// The symbolizer could not produce a backtrace.
    #[error("symbolication failed: {0}")]
    Symbolication(#[from] SymbolicationError),

    /// A crash, uncaught exception, or ANR was found in the device log.
    #[error("{0}")]
    Crash(CrashFailure),

    /// The clean starting state could not be established.
    #[error("session setup failed: {0}")]
    Setup(#[source] Box<HarnessError>),

    /// Writing an artifact or echoing evidence failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// `true` for failures of the harness itself rather than of the app.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, HarnessError::Crash(_))
    }

    /// The crash details, if this is an assertion failure.
    pub fn crash(&self) -> Option<&CrashFailure> {
        match self {
            HarnessError::Crash(failure) => Some(failure),
            _ => None,
        }
    }
}
