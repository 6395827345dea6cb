//! App lifecycle control: launching activities, injecting input, and
//! resetting packages to a clean slate.
//!
//! All operations go through the [`CommandChannel`] and run strictly one at
//! a time. Input and launch commands are preceded by a settle step so they
//! do not race a device that is still transitioning from the previous
//! action.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lifeline_core::channel::AdbChannel;
//! use lifeline_core::lifecycle::{ActivityId, LifecycleController, PackageRegistry, SettlePolicy};
//!
//! let controller = LifecycleController::new(
//!     Arc::new(AdbChannel::new(None)),
//!     PackageRegistry::default(),
//!     SettlePolicy::default(),
//! );
//! controller.stop_and_clear_all().unwrap();
//! controller
//!     .start_activity(&ActivityId::new(
//!         "org.khronos.openxr.hello_xr.opengles/android.app.NativeActivity",
//!     ))
//!     .unwrap();
//! controller.send_key("KEYCODE_BACK").unwrap();
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, CommandChannel};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Name of an installed application package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub String);

impl PackageId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A launchable component, written `<package>/<class>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub String);

impl ActivityId {
    pub fn new(component: impl Into<String>) -> Self {
        Self(component.into())
    }

    /// Builds `<package>/<class>`.
    pub fn of(package: &PackageId, class: &str) -> Self {
        Self(format!("{}/{}", package, class))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package that owns this activity.
    pub fn package(&self) -> PackageId {
        let pkg = self.0.split_once('/').map_or(self.0.as_str(), |(p, _)| p);
        PackageId::new(pkg)
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Activity class used by NDK native apps.
pub const NATIVE_ACTIVITY: &str = "android.app.NativeActivity";

pub const HELLO_XR_GLES: &str = "org.khronos.openxr.hello_xr.opengles";
pub const HELLO_XR_VULKAN: &str = "org.khronos.openxr.hello_xr.vulkan";
pub const OPENXR_CTS: &str = "org.khronos.openxr.cts";
pub const RUNTIME_IN_PROCESS: &str = "org.freedesktop.monado.openxr_runtime.in_process";
pub const RUNTIME_OUT_OF_PROCESS: &str = "org.freedesktop.monado.openxr_runtime.out_of_process";

// ---------------------------------------------------------------------------
// Package registry
// ---------------------------------------------------------------------------

/// The packages reset before and after every test.
///
/// Holds the apps under test plus any runtime or service packages that can
/// carry state between tests. Order is preserved and duplicates are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRegistry {
    packages: Vec<PackageId>,
}

impl PackageRegistry {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self { packages: Vec::new() };
        for pkg in packages {
            registry.insert(PackageId::new(pkg));
        }
        registry
    }

    /// Adds a package if not already present. Returns `true` if added.
    pub fn insert(&mut self, package: PackageId) -> bool {
        if self.packages.contains(&package) {
            return false;
        }
        self.packages.push(package);
        true
    }

    pub fn contains(&self, package: &PackageId) -> bool {
        self.packages.contains(package)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageId> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new([
            HELLO_XR_GLES,
            HELLO_XR_VULKAN,
            OPENXR_CTS,
            RUNTIME_IN_PROCESS,
            RUNTIME_OUT_OF_PROCESS,
        ])
    }
}

// ---------------------------------------------------------------------------
// Settling
// ---------------------------------------------------------------------------

/// Substring of `dumpsys window` output when no app transition is running.
pub const IDLE_MARKER: &str = "APP_STATE_IDLE";

/// How to let the device settle before issuing a launch or input command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SettlePolicy {
    /// Sleep for a fixed duration.
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Poll `dumpsys window` until the app transition state is idle, giving
    /// up after `timeout`.
    UntilIdle {
        #[serde(with = "millis")]
        poll: Duration,
        #[serde(with = "millis")]
        timeout: Duration,
    },
}

impl SettlePolicy {
    pub fn fixed(delay: Duration) -> Self {
        SettlePolicy::Fixed { delay }
    }

    /// No settling at all.
    pub fn none() -> Self {
        SettlePolicy::Fixed { delay: Duration::ZERO }
    }
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::Fixed {
            delay: Duration::from_secs(1),
        }
    }
}

/// Serializes a [`Duration`] as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives activities, input, and package state on the device.
pub struct LifecycleController {
    channel: Arc<dyn CommandChannel>,
    packages: PackageRegistry,
    settle: SettlePolicy,
}

impl LifecycleController {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        packages: PackageRegistry,
        settle: SettlePolicy,
    ) -> Self {
        Self {
            channel,
            packages,
            settle,
        }
    }

    pub fn channel(&self) -> &dyn CommandChannel {
        self.channel.as_ref()
    }

    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    /// Lets the device settle according to the configured policy.
    pub fn settle(&self) {
        match self.settle {
            SettlePolicy::Fixed { delay } => wait(delay),
            SettlePolicy::UntilIdle { poll, timeout } => {
                if !self.wait_until_idle(poll, timeout) {
                    warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "device did not report idle; continuing"
                    );
                }
            }
        }
    }

    /// Polls the window manager until no app transition is running.
    ///
    /// Returns `false` if the device was not idle within `timeout`. A failing
    /// `dumpsys` counts as "not idle yet".
    pub fn wait_until_idle(&self, poll: Duration, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if let Ok(out) = self.channel.shell(&["dumpsys", "window"]) {
                if out.contains(IDLE_MARKER) {
                    debug!(elapsed_ms = start.elapsed().as_millis() as u64, "device idle");
                    return true;
                }
            }
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(poll);
        }
    }

    /// Launches an activity and blocks until the platform reports it started
    /// (`am start-activity -W`).
    pub fn start_activity(&self, activity: &ActivityId) -> Result<(), ChannelError> {
        self.settle();
        info!(%activity, "starting activity and waiting");
        self.channel
            .shell(&["am", "start-activity", "-W", activity.as_str()])?;
        Ok(())
    }

    /// Injects a key event, e.g. `KEYCODE_BACK`.
    pub fn send_key(&self, keycode: &str) -> Result<(), ChannelError> {
        self.settle();
        info!(keycode, "key event");
        self.channel.shell(&["input", "keyevent", keycode])?;
        Ok(())
    }

    /// Injects a touchscreen tap at screen coordinates.
    pub fn send_tap(&self, x: u32, y: u32) -> Result<(), ChannelError> {
        self.settle();
        info!(x, y, "tap");
        let (x, y) = (x.to_string(), y.to_string());
        self.channel
            .shell(&["input", "touchscreen", "tap", &x, &y])?;
        Ok(())
    }

    /// Sends `events` pseudo-random input events to `package` with the UI
    /// exerciser monkey. System keys are disabled so the monkey stays inside
    /// the app.
    pub fn run_monkey(
        &self,
        package: &PackageId,
        events: u32,
        seed: u64,
    ) -> Result<(), ChannelError> {
        info!(%package, events, seed, "running monkey");
        let (events, seed) = (events.to_string(), seed.to_string());
        self.channel.shell(&[
            "monkey",
            "-p",
            package.as_str(),
            "-v",
            &events,
            "-s",
            &seed,
            "--pct-syskeys",
            "0",
        ])?;
        Ok(())
    }

    fn stop_and_clear(&self, package: &PackageId) -> Result<(), ChannelError> {
        self.channel.shell(&["am", "force-stop", package.as_str()])?;
        self.channel.shell(&["pm", "clear", package.as_str()])?;
        Ok(())
    }

    /// Force-stops every registered package and clears its data, which also
    /// drops it from recents.
    ///
    /// # Errors
    ///
    /// Returns the first failing command. Packages after it are not touched.
    pub fn stop_and_clear_all(&self) -> Result<(), ChannelError> {
        info!(
            packages = self.packages.len(),
            "stopping all relevant packages and clearing their data"
        );
        for package in self.packages.iter() {
            self.stop_and_clear(package)?;
        }
        Ok(())
    }

    /// Like [`stop_and_clear_all`](Self::stop_and_clear_all) but attempts
    /// every package and returns all failures.
    pub fn stop_and_clear_all_best_effort(&self) -> Vec<(PackageId, ChannelError)> {
        info!(
            packages = self.packages.len(),
            "stopping all relevant packages and clearing their data"
        );
        let mut failures = Vec::new();
        for package in self.packages.iter() {
            if let Err(e) = self.stop_and_clear(package) {
                warn!(%package, error = %e, "cleanup failed");
                failures.push((package.clone(), e));
            }
        }
        failures
    }
}

/// Sleeps for `duration`, skipping zero-length waits.
pub fn wait(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
