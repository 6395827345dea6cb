//! Scenario scripts: repeatable sequences of lifecycle actions.
//!
//! A [`Scenario`] is a named list of [`Step`]s run inside one session. Every
//! scenario ends with a crash check; [`Scenario::new`] appends one if the
//! steps do not already end that way.
//!
//! Scenarios serialize as JSON with a `type` tag per step, so custom ones
//! can be kept next to the built-ins:
//!
//! ```
//! use lifeline_core::scenario::{Scenario, Step};
//!
//! let json = r#"{
//!     "name": "launch_and_home",
//!     "steps": [
//!         {"type": "StartActivity", "activity": "org.example/.Main"},
//!         {"type": "Wait", "ms": 2000},
//!         {"type": "Key", "code": "KEYCODE_HOME"},
//!         {"type": "CheckForCrash"}
//!     ]
//! }"#;
//! let scenario: Scenario = serde_json::from_str(json).unwrap();
//! assert_eq!(scenario.steps.len(), 4);
//! assert!(matches!(scenario.steps[2], Step::Key { .. }));
//! ```

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use crate::config::ConfigError;
use crate::error::HarnessError;
use crate::lifecycle::{ActivityId, PackageId};
use crate::session::Session;

/// One action in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Step {
    /// Launch an activity and wait for it to start.
    StartActivity { activity: ActivityId },

    /// Inject a key event, e.g. `KEYCODE_BACK`.
    Key { code: String },

    /// Tap at screen coordinates.
    Tap { x: u32, y: u32 },

    /// Sleep between steps.
    Wait { ms: u64 },

    /// Send pseudo-random input events to a package.
    Monkey {
        package: PackageId,
        events: u32,
        seed: u64,
    },

    /// Grab the log and fail on any crash, exception, or ANR.
    CheckForCrash,
}

impl Step {
    /// Returns the step name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Step::StartActivity { .. } => "StartActivity",
            Step::Key { .. } => "Key",
            Step::Tap { .. } => "Tap",
            Step::Wait { .. } => "Wait",
            Step::Monkey { .. } => "Monkey",
            Step::CheckForCrash => "CheckForCrash",
        }
    }

    pub fn wait_secs(secs: u64) -> Self {
        Step::Wait { ms: secs * 1000 }
    }

    pub fn key(code: &str) -> Self {
        Step::Key {
            code: code.to_string(),
        }
    }

    pub fn start(activity: &ActivityId) -> Self {
        Step::StartActivity {
            activity: activity.clone(),
        }
    }

    /// Runs this step against a session.
    pub fn apply(&self, session: &mut Session<'_>) -> Result<(), HarnessError> {
        match self {
            Step::StartActivity { activity } => session.start_activity(activity),
            Step::Key { code } => session.send_key(code),
            Step::Tap { x, y } => session.send_tap(*x, *y),
            Step::Wait { ms } => {
                session.wait(Duration::from_millis(*ms));
                Ok(())
            }
            Step::Monkey {
                package,
                events,
                seed,
            } => session.run_monkey(package, *events, *seed),
            Step::CheckForCrash => session.check_for_crash(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::StartActivity { activity } => write!(f, "start {}", activity),
            Step::Key { code } => write!(f, "key {}", code),
            Step::Tap { x, y } => write!(f, "tap {} {}", x, y),
            Step::Wait { ms } => write!(f, "wait {}ms", ms),
            Step::Monkey {
                package,
                events,
                seed,
            } => write!(f, "monkey {} x{} (seed {})", package, events, seed),
            Step::CheckForCrash => f.write_str("check for crash"),
        }
    }
}

/// A named sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Builds a scenario, appending a final crash check if missing.
    pub fn new(name: impl Into<String>, description: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps,
        }
        .normalized()
    }

    /// Ensures the last step is [`Step::CheckForCrash`].
    pub fn normalized(mut self) -> Self {
        if self.steps.last() != Some(&Step::CheckForCrash) {
            self.steps.push(Step::CheckForCrash);
        }
        self
    }

    /// Runs every step in order, stopping at the first error.
    pub fn execute(&self, session: &mut Session<'_>) -> Result<(), HarnessError> {
        for (index, step) in self.steps.iter().enumerate() {
            let span = info_span!("step", scenario = %self.name, index, step = step.name());
            let _enter = span.enter();
            let start = Instant::now();
            let result = step.apply(session);
            debug!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                success = result.is_ok(),
                "{}",
                step
            );
            result?;
        }
        Ok(())
    }
}

/// A scenario file holds either one scenario or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScenarioFile {
    One(Scenario),
    Many(Vec<Scenario>),
}

/// Loads scenarios from a JSON file. Each is normalized to end with a crash
/// check.
pub fn load_file(path: &Path) -> Result<Vec<Scenario>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ScenarioFile = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let scenarios = match file {
        ScenarioFile::One(s) => vec![s],
        ScenarioFile::Many(list) => list,
    };
    Ok(scenarios.into_iter().map(Scenario::normalized).collect())
}

/// The built-in lifecycle scenarios, parameterized by two activities.
///
/// `a` is the primary app; `b` is a second app used to force app switches.
pub fn builtin(a: &ActivityId, b: &ActivityId) -> Vec<Scenario> {
    vec![
        Scenario::new(
            "just_launch",
            "Launch the activity and make sure it starts cleanly",
            vec![Step::start(a), Step::wait_secs(5)],
        ),
        Scenario::new(
            "launch_and_monkey",
            "Launch, then send 1000 random events (seed 100, no system keys)",
            vec![
                Step::start(a),
                Step::wait_secs(2),
                Step::Monkey {
                    package: a.package(),
                    events: 1000,
                    seed: 100,
                },
            ],
        ),
        Scenario::new(
            "launch_and_back",
            "Launch, then press Back",
            vec![Step::start(a), Step::wait_secs(2), Step::key("KEYCODE_BACK"), Step::wait_secs(5)],
        ),
        Scenario::new(
            "home_and_resume",
            "Launch, go Home, reopen from recents",
            vec![
                Step::start(a),
                Step::wait_secs(2),
                Step::key("KEYCODE_HOME"),
                Step::wait_secs(1),
                Step::key("KEYCODE_APP_SWITCH"),
                Step::wait_secs(1),
                Step::Tap { x: 400, y: 400 },
                Step::wait_secs(5),
            ],
        ),
        Scenario::new(
            "home_and_start",
            "Launch, go Home, launch again",
            vec![
                Step::start(a),
                Step::wait_secs(2),
                Step::key("KEYCODE_HOME"),
                Step::wait_secs(2),
                Step::start(a),
                Step::wait_secs(5),
            ],
        ),
        Scenario::new(
            "launch_second",
            "Launch A, then launch B on top",
            vec![Step::start(a), Step::wait_secs(2), Step::start(b), Step::wait_secs(5)],
        ),
        Scenario::new(
            "home_and_launch_second",
            "Launch A, go Home, launch B",
            vec![
                Step::start(a),
                Step::wait_secs(2),
                Step::key("KEYCODE_HOME"),
                Step::wait_secs(2),
                Step::start(b),
                Step::wait_secs(5),
            ],
        ),
        Scenario::new(
            "launch_a_b_a",
            "Launch A, then B, then A again",
            vec![
                Step::start(a),
                Step::wait_secs(2),
                Step::start(b),
                Step::wait_secs(2),
                Step::start(a),
                Step::wait_secs(5),
            ],
        ),
    ]
}

/// Looks up a built-in scenario by name.
pub fn find_builtin(name: &str, a: &ActivityId, b: &ActivityId) -> Option<Scenario> {
    builtin(a, b).into_iter().find(|s| s.name == name)
}
