//! Device log capture.
//!
//! [`LogCapture`] pulls the full logcat buffer on demand, persists it next to
//! the other per-test artifacts, and caches it for the rest of the session.
//! The first grab wins: later calls return the same snapshot without going
//! back to the device, so every check within a session sees the same bytes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::channel::{ChannelError, CommandChannel};
use crate::error::HarnessError;

/// File name of the raw log capture inside the scratch directory.
pub const LOGCAT_FILENAME: &str = "logcat.txt";

/// An immutable capture of the device log.
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    text: Arc<str>,
    path: PathBuf,
    captured_at: DateTime<Utc>,
}

impl LogSnapshot {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Where the snapshot was written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Writes the full snapshot text to `path`, verbatim.
pub fn save(snapshot: &LogSnapshot, path: &Path) -> io::Result<()> {
    fs::write(path, snapshot.text.as_bytes())
}

/// Per-session log buffer.
#[derive(Debug)]
pub struct LogCapture {
    path: PathBuf,
    snapshot: Option<LogSnapshot>,
    echoed: bool,
}

impl LogCapture {
    /// Creates a capture that will persist to `logcat.txt` under `scratch_dir`.
    pub fn new(scratch_dir: &Path) -> Self {
        Self {
            path: scratch_dir.join(LOGCAT_FILENAME),
            snapshot: None,
            echoed: false,
        }
    }

    /// Path the log is (or will be) written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the log has been grabbed this session.
    pub fn is_grabbed(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Whether the log has already been echoed this session.
    pub fn is_echoed(&self) -> bool {
        self.echoed
    }

    /// Clears the device log buffer (`adb logcat -c`).
    pub fn clear(&self, channel: &dyn CommandChannel) -> Result<(), ChannelError> {
        channel.run("logcat", &["-c"])?;
        Ok(())
    }

    /// Returns the session's log snapshot, reading it from the device
    /// (`adb logcat -d`) and saving it on first use.
    pub fn grab(&mut self, channel: &dyn CommandChannel) -> Result<&LogSnapshot, HarnessError> {
        let snapshot = match self.snapshot.take() {
            Some(cached) => cached,
            None => {
                let text = channel.run("logcat", &["-d"])?;
                let snapshot = LogSnapshot {
                    text: Arc::from(text),
                    path: self.path.clone(),
                    captured_at: Utc::now(),
                };
                save(&snapshot, &self.path)?;
                info!(path = %self.path.display(), bytes = snapshot.text.len(), "logcat saved");
                snapshot
            }
        };
        Ok(&*self.snapshot.insert(snapshot))
    }

    /// Echoes the log to `out` once per session, grabbing it first if needed.
    pub fn dump(
        &mut self,
        channel: &dyn CommandChannel,
        out: &mut dyn Write,
    ) -> Result<(), HarnessError> {
        if self.echoed {
            return Ok(());
        }
        let snapshot = self.grab(channel)?;
        writeln!(out, "*** Logcat:")?;
        writeln!(out, "{}", snapshot.text())?;
        out.flush()?;
        self.echoed = true;
        Ok(())
    }
}
