//! Failure signature detection in device logs.
//!
//! Classification is a plain substring search for three platform markers,
//! checked in a fixed priority order: a native crash backtrace beats an
//! uncaught Java exception, which beats an ANR. A log may contain several
//! markers; only the highest-priority one is reported. Line position does
//! not matter.
//!
//! ```
//! use lifeline_core::crash::{classify, CrashKind};
//!
//! let log = "E AndroidRuntime: FATAL EXCEPTION: main\n";
//! assert_eq!(classify(log), CrashKind::JavaException);
//! assert_eq!(classify("I ActivityManager: Displayed\n"), CrashKind::None);
//! ```

use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channel::CommandChannel;
use crate::error::{CrashFailure, HarnessError};
use crate::logcat::LogCapture;
use crate::symbolicate::Symbolicator;

/// Marker printed by debuggerd at the start of a native backtrace section.
pub const NATIVE_CRASH_MARKER: &str = "backtrace:";

/// Marker printed by `AndroidRuntime` for an uncaught top-level exception.
pub const JAVA_EXCEPTION_MARKER: &str = "FATAL EXCEPTION";

/// Marker printed by the window manager for an unresponsive app.
pub const ANR_MARKER: &str = "WindowManager: ANR";

/// The kind of failure found in a log, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrashKind {
    NativeCrash,
    JavaException,
    ApplicationNotResponding,
    None,
}

impl CrashKind {
    /// Failure kinds in the order they are checked.
    pub const PRIORITY: [CrashKind; 3] = [
        CrashKind::NativeCrash,
        CrashKind::JavaException,
        CrashKind::ApplicationNotResponding,
    ];

    /// The log marker that identifies this kind, if any.
    pub fn marker(self) -> Option<&'static str> {
        match self {
            CrashKind::NativeCrash => Some(NATIVE_CRASH_MARKER),
            CrashKind::JavaException => Some(JAVA_EXCEPTION_MARKER),
            CrashKind::ApplicationNotResponding => Some(ANR_MARKER),
            CrashKind::None => None,
        }
    }

    pub fn is_failure(self) -> bool {
        self != CrashKind::None
    }
}

impl fmt::Display for CrashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrashKind::NativeCrash => "Native crash backtrace",
            CrashKind::JavaException => "Java exception",
            CrashKind::ApplicationNotResponding => "ANR",
            CrashKind::None => "No failure",
        };
        f.write_str(s)
    }
}

/// Classifies a log by the highest-priority marker it contains.
pub fn classify(text: &str) -> CrashKind {
    CrashKind::PRIORITY
        .into_iter()
        .find(|kind| kind.marker().is_some_and(|m| text.contains(m)))
        .unwrap_or(CrashKind::None)
}

/// Finds the first line carrying the marker for `kind`.
///
/// Returns the 1-based line number and the trimmed line.
pub fn find_evidence(text: &str, kind: CrashKind) -> Option<(usize, String)> {
    let marker = kind.marker()?;
    text.lines()
        .enumerate()
        .find(|(_, line)| line.contains(marker))
        .map(|(i, line)| (i + 1, line.trim_end().to_string()))
}

/// Checks a session's log for failures and gathers evidence.
pub struct CrashDetector<'a> {
    symbolicator: &'a dyn Symbolicator,
    symbol_dir: &'a Path,
}

impl<'a> CrashDetector<'a> {
    pub fn new(symbolicator: &'a dyn Symbolicator, symbol_dir: &'a Path) -> Self {
        Self {
            symbolicator,
            symbol_dir,
        }
    }

    /// Grabs the log, classifies it, and fails on any detected signature.
    ///
    /// For a native crash the symbolizer runs first, so `crashes.txt` exists
    /// by the time the failure is returned. The log (and any backtrace) is
    /// always echoed to `out` before failing.
    ///
    /// # Returns
    ///
    /// The classification, which is always [`CrashKind::None`] on `Ok`.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Crash`] when a failure signature is present
    /// - [`HarnessError::Symbolication`] if the backtrace cannot be produced
    /// - [`HarnessError::Channel`] / [`HarnessError::Io`] from capturing the log
    pub fn check(
        &self,
        channel: &dyn CommandChannel,
        log: &mut LogCapture,
        out: &mut dyn Write,
    ) -> Result<CrashKind, HarnessError> {
        let snapshot = log.grab(channel)?;
        let kind = classify(snapshot.text());
        if !kind.is_failure() {
            info!("no failure signatures in log");
            return Ok(kind);
        }

        let evidence = find_evidence(snapshot.text(), kind);
        let log_path = snapshot.path().to_path_buf();
        warn!(%kind, log = %log_path.display(), "failure signature detected");

        let backtrace_path = if kind == CrashKind::NativeCrash {
            Some(self.symbolicator.symbolicate(&log_path, self.symbol_dir)?)
        } else {
            None
        };

        log.dump(channel, out)?;

        if let Some(path) = &backtrace_path {
            let backtrace = std::fs::read_to_string(path)?;
            writeln!(out, "*** Crash Backtrace(s):")?;
            writeln!(out, "{}", backtrace)?;
            writeln!(out, "*** Crash backtrace in {}", path.display())?;
            out.flush()?;
        }

        Err(HarnessError::Crash(CrashFailure {
            kind,
            log_path,
            backtrace_path,
            evidence,
        }))
    }
}
