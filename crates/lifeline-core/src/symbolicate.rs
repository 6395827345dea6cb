//! Native crash symbolication with `ndk-stack`.
//!
//! `ndk-stack` reads a raw logcat capture, finds the tombstone backtraces
//! in it, and resolves each frame against the unstripped libraries in a
//! symbol directory. Its output is written to `crashes.txt` next to the raw
//! log.
//!
//! A failing symbolizer is a tooling failure: it means the harness cannot
//! produce the diagnostics a crash report needs, which is a different thing
//! from the app having crashed.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::render_command;

/// File name of the symbolicated backtrace, next to the raw log.
pub const CRASHES_FILENAME: &str = "crashes.txt";

/// Errors from running the symbolizer.
#[derive(Error, Debug)]
pub enum SymbolicationError {
    /// The symbolizer executable does not exist.
    #[error("symbolizer not found at {0}")]
    NotFound(PathBuf),

    /// The symbolizer exited unsuccessfully.
    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// An I/O error occurred creating the output file or spawning the tool.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Returns the sibling `crashes.txt` path for a raw log.
pub fn backtrace_path_for(raw_log: &Path) -> PathBuf {
    raw_log.with_file_name(CRASHES_FILENAME)
}

/// Maps raw crash addresses in a log to symbols.
pub trait Symbolicator: Send + Sync {
    /// Symbolicates `raw_log` against `symbol_dir` and returns the path of
    /// the produced backtrace file.
    fn symbolicate(&self, raw_log: &Path, symbol_dir: &Path) -> Result<PathBuf, SymbolicationError>;
}

/// [`Symbolicator`] backed by the NDK's `ndk-stack` tool.
#[derive(Debug, Clone)]
pub struct NdkStack {
    tool: PathBuf,
}

impl NdkStack {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Locates `ndk-stack` inside an SDK's side-by-side NDK install.
    pub fn from_sdk(sdk_root: &Path, ndk_version: &str) -> Self {
        Self::new(sdk_root.join("ndk").join(ndk_version).join("ndk-stack"))
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }
}

impl NdkStack {
    fn run(
        &self,
        args: &[&str],
        rendered: &str,
        output_path: &Path,
    ) -> Result<(), SymbolicationError> {
        let stdout = File::create(output_path)?;
        let output = Command::new(&self.tool)
            .args(args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    SymbolicationError::NotFound(self.tool.clone())
                } else {
                    SymbolicationError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(SymbolicationError::Failed {
                command: rendered.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Symbolicator for NdkStack {
    fn symbolicate(
        &self,
        raw_log: &Path,
        symbol_dir: &Path,
    ) -> Result<PathBuf, SymbolicationError> {
        let output_path = backtrace_path_for(raw_log);
        let sym = symbol_dir.to_string_lossy();
        let input = raw_log.to_string_lossy();
        let args = ["-sym", sym.as_ref(), "-i", input.as_ref()];
        let rendered = render_command(&self.tool.to_string_lossy(), &args);
        debug!(command = %rendered, output = %output_path.display(), "ndk-stack");

        // A crashes.txt only ever holds a complete symbolicated backtrace.
        if let Err(e) = self.run(&args, &rendered, &output_path) {
            if let Err(remove) = std::fs::remove_file(&output_path) {
                if remove.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %output_path.display(),
                        error = %remove,
                        "cannot remove partial backtrace"
                    );
                }
            }
            return Err(e);
        }

        info!(path = %output_path.display(), "backtrace symbolicated");
        Ok(output_path)
    }
}
