//! Shared test helpers for lifeline-core integration tests.
//!
//! Provides a recording fake of the bridge channel, a fake symbolizer, and a
//! harness wired to both with evidence echoed into a buffer.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lifeline_core::channel::{ChannelError, CommandChannel, DeviceId};
use lifeline_core::config::HarnessConfig;
use lifeline_core::lifecycle::{PackageRegistry, SettlePolicy};
use lifeline_core::session::Harness;
use lifeline_core::symbolicate::{backtrace_path_for, SymbolicationError, Symbolicator};

pub const PKG_A: &str = "org.example.alpha";
pub const PKG_B: &str = "org.example.bravo";
pub const RUNTIME: &str = "org.example.runtime";

pub const NATIVE_CRASH_LOG: &str = "\
04-12 10:00:01.001  1234  1234 F DEBUG   : signal 11 (SIGSEGV), code 1 (SEGV_MAPERR)
04-12 10:00:01.002  1234  1234 F DEBUG   : backtrace:
04-12 10:00:01.003  1234  1234 F DEBUG   :       #00 pc 0000000000012345  /data/app/lib/arm64/libruntime.so
";

pub const JAVA_EXCEPTION_LOG: &str =
    "04-12 10:00:02.000  4321  4321 E AndroidRuntime: FATAL EXCEPTION: main\n";

pub const ANR_LOG: &str =
    "04-12 10:00:03.000   900   950 E WindowManager: ANR in org.example.alpha\n";

pub const CLEAN_LOG: &str =
    "04-12 10:00:00.000   900   950 I ActivityTaskManager: Displayed org.example.alpha/.Main: +512ms\n";

// ---------------------------------------------------------------------------
// Fake channel
// ---------------------------------------------------------------------------

/// A rule that fails any command whose rendered line contains `pattern`.
struct FailRule {
    pattern: String,
    remaining: Option<usize>,
}

/// Text appended to the device log when a matching command runs.
struct LogTrigger {
    pattern: String,
    text: String,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    log: String,
    fail_rules: Vec<FailRule>,
    triggers: Vec<LogTrigger>,
}

/// A scripted, recording stand-in for `adb`.
///
/// Every command is recorded as one space-joined line, e.g.
/// `"shell am force-stop org.example.alpha"`. `logcat -c` empties the fake
/// device log and `logcat -d` returns it.
#[derive(Default)]
pub struct FakeChannel {
    state: Mutex<FakeState>,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends text to the device log.
    pub fn append_log(&self, text: &str) {
        self.state.lock().unwrap().log.push_str(text);
    }

    /// Appends `text` to the log whenever a command containing `pattern` runs.
    pub fn on_command_log(&self, pattern: &str, text: &str) {
        self.state.lock().unwrap().triggers.push(LogTrigger {
            pattern: pattern.to_string(),
            text: text.to_string(),
        });
    }

    /// Fails every command containing `pattern`.
    pub fn fail_matching(&self, pattern: &str) {
        self.state.lock().unwrap().fail_rules.push(FailRule {
            pattern: pattern.to_string(),
            remaining: None,
        });
    }

    /// Fails the next `times` commands containing `pattern`.
    pub fn fail_matching_times(&self, pattern: &str, times: usize) {
        self.state.lock().unwrap().fail_rules.push(FailRule {
            pattern: pattern.to_string(),
            remaining: Some(times),
        });
    }

    /// All recorded command lines, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded commands exactly equal to `line`.
    pub fn count(&self, line: &str) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| *c == line).count()
    }

    /// Number of recorded commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn force_stops(&self, package: &str) -> usize {
        self.count(&format!("shell am force-stop {package}"))
    }

    pub fn clears(&self, package: &str) -> usize {
        self.count(&format!("shell pm clear {package}"))
    }
}

impl CommandChannel for FakeChannel {
    fn device(&self) -> Option<&DeviceId> {
        None
    }

    fn run(&self, command: &str, args: &[&str]) -> Result<String, ChannelError> {
        let line = std::iter::once(command)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let mut state = self.state.lock().unwrap();
        state.calls.push(line.clone());

        let mut failing = false;
        for rule in state.fail_rules.iter_mut() {
            if !line.contains(&rule.pattern) {
                continue;
            }
            match rule.remaining.as_mut() {
                None => failing = true,
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    failing = true;
                }
            }
        }
        if failing {
            return Err(ChannelError::Exit {
                command: format!("adb {line}"),
                status: 1,
                stderr: "fake failure".to_string(),
            });
        }

        let triggered: Vec<String> = state
            .triggers
            .iter()
            .filter(|t| line.contains(&t.pattern))
            .map(|t| t.text.clone())
            .collect();
        for text in triggered {
            state.log.push_str(&text);
        }

        let out = match line.as_str() {
            "logcat -c" => {
                state.log.clear();
                String::new()
            }
            "logcat -d" => state.log.clone(),
            "get-state" => "device\n".to_string(),
            "shell getprop ro.product.vendor.device" => "fakedevice\n".to_string(),
            "shell getprop ro.product.build.fingerprint" => {
                "fake/build:14/TEST/1:userdebug\n".to_string()
            }
            "shell dumpsys window" => "mAppTransitionState=APP_STATE_IDLE\n".to_string(),
            _ => String::new(),
        };
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Fake symbolizer
// ---------------------------------------------------------------------------

/// Records calls and writes a canned backtrace to `crashes.txt`.
#[derive(Default)]
pub struct FakeSymbolicator {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail: bool,
}

impl FakeSymbolicator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    /// `(raw_log, symbol_dir)` for every call.
    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Symbolicator for FakeSymbolicator {
    fn symbolicate(
        &self,
        raw_log: &Path,
        symbol_dir: &Path,
    ) -> Result<PathBuf, SymbolicationError> {
        self.calls
            .lock()
            .unwrap()
            .push((raw_log.to_path_buf(), symbol_dir.to_path_buf()));
        if self.fail {
            return Err(SymbolicationError::Failed {
                command: "ndk-stack".to_string(),
                status: 1,
                stderr: "no symbols".to_string(),
            });
        }
        let out = backtrace_path_for(raw_log);
        std::fs::write(
            &out,
            "********** Crash dump: **********\n#00 0x12345 libruntime.so (Runtime::frame()+16)\n",
        )?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Harness wiring
// ---------------------------------------------------------------------------

/// A harness over fakes plus handles for inspecting what happened.
pub struct TestRig {
    pub channel: Arc<FakeChannel>,
    pub symbolicator: Arc<FakeSymbolicator>,
    pub echo: Arc<Mutex<Vec<u8>>>,
    pub config: HarnessConfig,
    pub harness: Harness,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_symbolicator(FakeSymbolicator::new())
    }

    pub fn with_symbolicator(symbolicator: Arc<FakeSymbolicator>) -> Self {
        let channel = FakeChannel::new();
        let config = test_config();
        let echo = Arc::new(Mutex::new(Vec::new()));
        let harness = Harness::new(&config, channel.clone(), symbolicator.clone())
            .with_echo(echo.clone());
        Self {
            channel,
            symbolicator,
            echo,
            config,
            harness,
        }
    }

    /// Everything echoed so far.
    pub fn echoed(&self) -> String {
        String::from_utf8(self.echo.lock().unwrap().clone()).unwrap()
    }

    pub fn packages(&self) -> Vec<String> {
        self.config.packages.iter().map(|p| p.to_string()).collect()
    }
}

impl Drop for TestRig {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.config.artifacts_root);
    }
}

/// Config with a small registry, no settling, and a unique artifacts root.
pub fn test_config() -> HarnessConfig {
    HarnessConfig {
        packages: PackageRegistry::new([PKG_A, PKG_B, RUNTIME]),
        settle: SettlePolicy::none(),
        artifacts_root: std::env::temp_dir()
            .join(format!("lifeline_test_{}", uuid::Uuid::new_v4())),
        activity_a: lifeline_core::lifecycle::ActivityId::new(format!("{PKG_A}/.Main")),
        activity_b: lifeline_core::lifecycle::ActivityId::new(format!("{PKG_B}/.Main")),
        ..Default::default()
    }
}
