//! Per-test sessions with guaranteed setup and teardown.
//!
//! A [`Harness`] holds what every test shares: the bridge channel, the
//! symbolizer, the package registry, and the run's artifact directory. Each
//! test opens a [`Session`] from it.
//!
//! # Lifecycle
//!
//! ```text
//! Entry ──> Running ──> ExitingNormally ──┐
//!                  └──> ExitingViaFailure ┴──> Cleaned
//! ```
//!
//! - **Entry**: every registered package is force-stopped and cleared, then
//!   the log buffer is cleared. Any failure aborts the test before its body
//!   runs and no session is returned.
//! - **Running**: the test body drives the device through the session.
//! - **Exit**: runs exactly once, however the body ended (returned, failed,
//!   or panicked): the log is dumped if it has not been yet, then every
//!   package is cleaned up again. Teardown problems are logged and collected
//!   in a [`TeardownReport`]; they never stop the remaining teardown steps.
//!
//! # Example
//!
//! ```no_run
//! use lifeline_core::config::HarnessConfig;
//! use lifeline_core::session::{run_session, Harness};
//!
//! let config = HarnessConfig::load();
//! let harness = Harness::from_config(&config);
//! let outcome = run_session(&harness, "launch_and_back", |s| {
//!     s.start_activity(&config.activity_a)?;
//!     s.wait_secs(2);
//!     s.send_key("KEYCODE_BACK")?;
//!     s.wait_secs(5);
//!     s.check_for_crash()
//! });
//! assert!(outcome.result.is_ok());
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::channel::{AdbChannel, CommandChannel};
use crate::config::HarnessConfig;
use crate::crash::CrashDetector;
use crate::error::HarnessError;
use crate::lifecycle::{
    self, ActivityId, LifecycleController, PackageId, PackageRegistry, SettlePolicy,
};
use crate::logcat::{LogCapture, LogSnapshot};
use crate::symbolicate::Symbolicator;

/// Where evidence (log text, backtraces) is echoed. Stdout by default so it
/// lands in CI output.
pub type EchoSink = Arc<Mutex<dyn Write + Send>>;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Shared state for all sessions of one run.
pub struct Harness {
    channel: Arc<dyn CommandChannel>,
    symbolicator: Arc<dyn Symbolicator>,
    packages: PackageRegistry,
    settle: SettlePolicy,
    symbol_dir: PathBuf,
    run_id: String,
    run_dir: PathBuf,
    started_at: DateTime<Utc>,
    echo: EchoSink,
}

impl Harness {
    /// Creates a harness over explicit collaborators.
    ///
    /// Artifacts go to `<artifacts_root>/<run id>/`, where the run id is a
    /// timestamp plus a short random suffix.
    pub fn new(
        config: &HarnessConfig,
        channel: Arc<dyn CommandChannel>,
        symbolicator: Arc<dyn Symbolicator>,
    ) -> Self {
        let started_at = Utc::now();
        let run_id = format!(
            "run_{}_{}",
            started_at.format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        Self {
            channel,
            symbolicator,
            packages: config.packages.clone(),
            settle: config.settle,
            symbol_dir: config.symbol_dir(),
            run_dir: config.artifacts_root.join(&run_id),
            run_id,
            started_at,
            echo: Arc::new(Mutex::new(io::stdout())),
        }
    }

    /// Creates a harness that talks to a real device through `adb` and
    /// symbolicates with the configured `ndk-stack`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let channel = match &config.adb {
            Some(adb) => AdbChannel::with_adb(adb, config.serial.clone()),
            None => AdbChannel::new(config.serial.clone()),
        };
        Self::new(config, Arc::new(channel), Arc::new(config.ndk_stack()))
    }

    /// Redirects evidence echoes away from stdout.
    pub fn with_echo(mut self, echo: EchoSink) -> Self {
        self.echo = echo;
        self
    }

    pub fn channel(&self) -> &dyn CommandChannel {
        self.channel.as_ref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Directory holding every session's scratch directory for this run.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn symbol_dir(&self) -> &Path {
        &self.symbol_dir
    }

    /// Creates a scratch directory for `name` that no other session of this
    /// run uses. Repeated names, and names that sanitize alike, get a numeric
    /// suffix: `launch`, `launch_2`, `launch_3`.
    fn claim_scratch_dir(&self, name: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.run_dir)?;
        let base = scratch_name(name);
        let mut attempt = 1u32;
        loop {
            let candidate = match attempt {
                1 => self.run_dir.join(&base),
                n => self.run_dir.join(format!("{base}_{n}")),
            };
            match std::fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    fn controller(&self) -> LifecycleController {
        LifecycleController::new(self.channel.clone(), self.packages.clone(), self.settle)
    }
}

/// Maps a test name to a safe directory name.
fn scratch_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Teardown reporting
// ---------------------------------------------------------------------------

/// A teardown step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TeardownIssue {
    /// The log could not be grabbed or echoed.
    LogDump { error: String },
    /// A package could not be stopped or cleared.
    Cleanup { package: PackageId, error: String },
}

/// What went wrong during teardown, if anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub issues: Vec<TeardownIssue>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Entry,
    Running,
    ExitingNormally,
    ExitingViaFailure,
    Cleaned,
}

/// One test's exclusive claim on the device and its log.
pub struct Session<'h> {
    harness: &'h Harness,
    name: String,
    scratch_dir: PathBuf,
    controller: LifecycleController,
    log: LogCapture,
    state: SessionState,
    failed: bool,
}

impl<'h> Session<'h> {
    /// Opens a session: creates its scratch directory and resets the device.
    ///
    /// # Errors
    ///
    /// [`HarnessError::Setup`] wrapping the underlying failure. No teardown
    /// runs in that case since the body never started.
    pub fn start(harness: &'h Harness, name: &str) -> Result<Self, HarnessError> {
        let scratch_dir = harness.claim_scratch_dir(name).map_err(|e| {
            error!(session = name, error = %e, "cannot create scratch directory");
            HarnessError::Setup(Box::new(e.into()))
        })?;
        Self::start_in(harness, name, scratch_dir)
    }

    /// Resets the device for a session whose scratch directory is claimed.
    fn start_in(
        harness: &'h Harness,
        name: &str,
        scratch_dir: PathBuf,
    ) -> Result<Self, HarnessError> {
        info!(session = name, dir = %scratch_dir.display(), "session entry");

        let setup =
            |controller: &LifecycleController, log: &LogCapture| -> Result<(), HarnessError> {
                controller.stop_and_clear_all()?;
                log.clear(controller.channel())?;
                Ok(())
            };

        let controller = harness.controller();
        let log = LogCapture::new(&scratch_dir);
        if let Err(e) = setup(&controller, &log) {
            error!(session = name, error = %e, "session setup failed");
            return Err(HarnessError::Setup(Box::new(e)));
        }

        Ok(Self {
            harness,
            name: name.to_string(),
            scratch_dir,
            controller,
            log,
            state: SessionState::Running,
            failed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Per-test artifact directory.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Where the raw log is saved.
    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Marks the session failed if `result` is an error.
    fn track<T>(&mut self, result: Result<T, HarnessError>) -> Result<T, HarnessError> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Launches an activity and waits for it to report started.
    pub fn start_activity(&mut self, activity: &ActivityId) -> Result<(), HarnessError> {
        let result = self.controller.start_activity(activity).map_err(HarnessError::from);
        self.track(result)
    }

    /// Injects a key event.
    pub fn send_key(&mut self, keycode: &str) -> Result<(), HarnessError> {
        let result = self.controller.send_key(keycode).map_err(HarnessError::from);
        self.track(result)
    }

    /// Injects a tap.
    pub fn send_tap(&mut self, x: u32, y: u32) -> Result<(), HarnessError> {
        let result = self.controller.send_tap(x, y).map_err(HarnessError::from);
        self.track(result)
    }

    /// Runs the UI exerciser monkey against a package.
    pub fn run_monkey(
        &mut self,
        package: &PackageId,
        events: u32,
        seed: u64,
    ) -> Result<(), HarnessError> {
        let result = self
            .controller
            .run_monkey(package, events, seed)
            .map_err(HarnessError::from);
        self.track(result)
    }

    /// Fixed delay between scenario steps.
    pub fn wait(&self, duration: Duration) {
        lifecycle::wait(duration);
    }

    pub fn wait_secs(&self, secs: u64) {
        self.wait(Duration::from_secs(secs));
    }

    /// Returns the session's log snapshot, grabbing it on first use.
    pub fn grab_log(&mut self) -> Result<LogSnapshot, HarnessError> {
        let result = self.log.grab(self.controller.channel()).map(LogSnapshot::clone);
        self.track(result)
    }

    /// Checks the log for crashes, exceptions, and ANRs.
    ///
    /// A clean log resets all packages, mirroring the teardown cleanup. Any
    /// detected failure is returned as [`HarnessError::Crash`] after the
    /// evidence has been echoed; the test should stop there.
    pub fn check_for_crash(&mut self) -> Result<(), HarnessError> {
        let result = {
            let detector =
                CrashDetector::new(self.harness.symbolicator.as_ref(), &self.harness.symbol_dir);
            let mut echo = self.harness.echo.lock().unwrap_or_else(|e| e.into_inner());
            detector.check(self.controller.channel(), &mut self.log, &mut *echo)
        };
        let result = result.and_then(|_| {
            self.controller
                .stop_and_clear_all()
                .map_err(HarnessError::from)
        });
        self.track(result)
    }

    /// Ends the session, running teardown now and returning its report.
    pub fn finish(mut self) -> TeardownReport {
        self.teardown()
    }

    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.state == SessionState::Cleaned {
            return report;
        }
        self.state = if self.failed || thread::panicking() {
            SessionState::ExitingViaFailure
        } else {
            SessionState::ExitingNormally
        };
        info!(session = %self.name, state = ?self.state, "session exit");

        {
            let mut echo = self.harness.echo.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = self.log.dump(self.controller.channel(), &mut *echo) {
                error!(session = %self.name, error = %e, "log dump failed during teardown");
                report.issues.push(TeardownIssue::LogDump { error: e.to_string() });
            }
        }

        for (package, e) in self.controller.stop_and_clear_all_best_effort() {
            error!(session = %self.name, %package, error = %e, "cleanup failed during teardown");
            report.issues.push(TeardownIssue::Cleanup {
                package,
                error: e.to_string(),
            });
        }

        self.state = SessionState::Cleaned;
        report
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Cleaned {
            self.teardown();
        }
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// Result of [`run_session`].
#[derive(Debug)]
pub struct SessionOutcome {
    /// The body's result, or the setup failure.
    pub result: Result<(), HarnessError>,
    /// Teardown problems. Empty if setup failed, since teardown never ran.
    pub teardown: TeardownReport,
    /// The session's artifact directory.
    pub scratch_dir: PathBuf,
}

/// Runs `body` inside a fresh session.
///
/// Setup runs first; if it fails, `body` is not called. Teardown runs after
/// `body` returns. If `body` panics, teardown still runs while unwinding and
/// the panic continues.
pub fn run_session<F>(harness: &Harness, name: &str, body: F) -> SessionOutcome
where
    F: FnOnce(&mut Session<'_>) -> Result<(), HarnessError>,
{
    let setup_failed = |result: Result<(), HarnessError>, scratch_dir: PathBuf| SessionOutcome {
        result,
        teardown: TeardownReport::default(),
        scratch_dir,
    };
    let scratch_dir = match harness.claim_scratch_dir(name) {
        Ok(dir) => dir,
        Err(e) => {
            error!(session = name, error = %e, "cannot create scratch directory");
            let unclaimed = harness.run_dir.join(scratch_name(name));
            return setup_failed(Err(HarnessError::Setup(Box::new(e.into()))), unclaimed);
        }
    };
    let mut session = match Session::start_in(harness, name, scratch_dir.clone()) {
        Ok(session) => session,
        Err(e) => return setup_failed(Err(e), scratch_dir),
    };

    let result = body(&mut session);
    if result.is_err() {
        session.failed = true;
    }
    let teardown = session.finish();

    SessionOutcome {
        result,
        teardown,
        scratch_dir,
    }
}
