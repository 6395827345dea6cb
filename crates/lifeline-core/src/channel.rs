//! Interface to the Android debug bridge (`adb`).
//!
//! Every device interaction in this crate goes through a [`CommandChannel`].
//! The production implementation, [`AdbChannel`], spawns `adb` as a child
//! process and captures its output. Tests substitute a recording fake.
//!
//! The channel never retries. A non-zero exit is reported as
//! [`ChannelError::Exit`] carrying the rendered command line and the exit
//! status; deciding whether that matters is up to the caller.
//!
//! # Example
//!
//! ```no_run
//! use lifeline_core::channel::{AdbChannel, CommandChannel};
//!
//! let adb = AdbChannel::new(None);
//! let state = adb.run("get-state", &[]).unwrap();
//! println!("device is {}", state.trim());
//!
//! adb.shell(&["input", "keyevent", "KEYCODE_HOME"]).unwrap();
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when running a bridge command.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The command ran and exited unsuccessfully.
    #[error("`{command}` exited with status {status}: {stderr}")]
    Exit {
        /// The full command line that was run.
        command: String,
        /// The process exit status (`-1` if terminated by a signal).
        status: i32,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// The `adb` executable could not be found.
    #[error("adb not found at {0} (set LIFELINE_ADB_PATH or ANDROID_SDK_ROOT)")]
    NotFound(PathBuf),

    /// An I/O error occurred while spawning the command.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Serial number of an attached device, as printed by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A channel that runs bridge commands against exactly one device.
pub trait CommandChannel: Send + Sync {
    /// The device this channel targets, or `None` for the single implicitly
    /// attached device.
    fn device(&self) -> Option<&DeviceId>;

    /// Runs `adb <command> <args..>` and returns its standard output.
    fn run(&self, command: &str, args: &[&str]) -> Result<String, ChannelError>;

    /// Runs `adb shell <args..>`.
    fn shell(&self, args: &[&str]) -> Result<String, ChannelError> {
        self.run("shell", args)
    }
}

/// Resolves the `adb` executable.
///
/// Checks `LIFELINE_ADB_PATH`, then `platform-tools/adb` under `ANDROID_SDK_ROOT`
/// or `ANDROID_HOME`, and finally falls back to `adb` on `PATH`.
pub fn adb_path() -> PathBuf {
    if let Ok(path) = std::env::var("LIFELINE_ADB_PATH") {
        return PathBuf::from(path);
    }
    if let Ok(sdk_root) =
        std::env::var("ANDROID_SDK_ROOT").or_else(|_| std::env::var("ANDROID_HOME"))
    {
        let candidate = PathBuf::from(sdk_root).join("platform-tools").join("adb");
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from("adb")
}

/// Renders a command line for logging and error messages.
pub(crate) fn render_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// [`CommandChannel`] backed by the `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbChannel {
    adb: PathBuf,
    serial: Option<DeviceId>,
}

impl AdbChannel {
    /// Creates a channel using the `adb` found by [`adb_path`].
    pub fn new(serial: Option<DeviceId>) -> Self {
        Self::with_adb(adb_path(), serial)
    }

    /// Creates a channel using an explicit `adb` executable.
    pub fn with_adb(adb: impl Into<PathBuf>, serial: Option<DeviceId>) -> Self {
        Self {
            adb: adb.into(),
            serial,
        }
    }

    /// Full argument list passed to `adb`, including the `-s` selector.
    fn full_args<'a>(&'a self, command: &'a str, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 3);
        if let Some(serial) = &self.serial {
            full.push("-s");
            full.push(serial.as_str());
        }
        full.push(command);
        full.extend_from_slice(args);
        full
    }
}

impl CommandChannel for AdbChannel {
    fn device(&self) -> Option<&DeviceId> {
        self.serial.as_ref()
    }

    fn run(&self, command: &str, args: &[&str]) -> Result<String, ChannelError> {
        let full = self.full_args(command, args);
        let rendered = render_command(&self.adb.to_string_lossy(), &full);
        debug!(command = %rendered, "adb");

        let output = Command::new(&self.adb).args(&full).output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ChannelError::NotFound(self.adb.clone())
            } else {
                ChannelError::Io(e)
            }
        })?;

        if !output.status.success() {
            return Err(ChannelError::Exit {
                command: rendered,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_args_without_serial() {
        let adb = AdbChannel::with_adb("adb", None);
        assert_eq!(adb.full_args("logcat", &["-d"]), vec!["logcat", "-d"]);
    }

    #[test]
    fn full_args_with_serial() {
        let adb = AdbChannel::with_adb("adb", Some(DeviceId::new("emulator-5554")));
        assert_eq!(
            adb.full_args("shell", &["pm", "clear", "com.example"]),
            vec!["-s", "emulator-5554", "shell", "pm", "clear", "com.example"]
        );
        assert_eq!(adb.device().map(DeviceId::as_str), Some("emulator-5554"));
    }

    #[test]
    fn render_command_joins_with_spaces() {
        assert_eq!(
            render_command("adb", &["shell", "am", "force-stop", "com.example"]),
            "adb shell am force-stop com.example"
        );
    }

    #[test]
    fn missing_executable_is_not_found() {
        let adb = AdbChannel::with_adb("/nonexistent/lifeline/adb", None);
        match adb.run("get-state", &[]) {
            Err(ChannelError::NotFound(path)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/lifeline/adb"));
            }
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported_with_command_and_status() {
        // `false` ignores its arguments and exits 1.
        let adb = AdbChannel::with_adb("false", None);
        match adb.run("logcat", &["-c"]) {
            Err(ChannelError::Exit { command, status, .. }) => {
                assert_eq!(command, "false logcat -c");
                assert_eq!(status, 1);
            }
            other => panic!("Expected Exit, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn stdout_is_returned_on_success() {
        let adb = AdbChannel::with_adb("echo", None);
        let out = adb.shell(&["hello"]).unwrap();
        assert_eq!(out.trim(), "shell hello");
    }

    #[test]
    fn channel_error_display() {
        let err = ChannelError::Exit {
            command: "adb shell pm clear x".to_string(),
            status: 255,
            stderr: "Failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`adb shell pm clear x` exited with status 255: Failed"
        );
    }

    #[test]
    fn device_id_serializes_as_string() {
        let json = serde_json::to_string(&DeviceId::new("R5CT")).unwrap();
        assert_eq!(json, "\"R5CT\"");
    }
}
