//! Sequential scenario runner and run reports.
//!
//! [`Runner`] runs each scenario in its own [`Session`](crate::session::Session)
//! and records a [`ScenarioResult`] per scenario. The collected
//! [`RunReport`] carries the device identity so a report can be traced back
//! to the hardware and build it ran on.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::crash::CrashKind;
use crate::device::DeviceInfo;
use crate::error::HarnessError;
use crate::logcat::LOGCAT_FILENAME;
use crate::scenario::Scenario;
use crate::session::{run_session, Harness, TeardownIssue};

/// How a scenario ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// No failure signatures were found.
    Passed,
    /// The app crashed, threw, or stopped responding.
    Failed(CrashKind),
    /// The harness itself failed (bridge, symbolizer, setup).
    Error,
}

/// The record of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: Outcome,
    /// Failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    /// Saved raw log, if one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Symbolicated backtrace, for native crashes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown_issues: Vec<TeardownIssue>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    /// Scenarios that found an app failure.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
            .count()
    }

    /// Scenarios that hit a harness error.
    pub fn errors(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Error)
            .count()
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(ScenarioResult::passed)
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

/// Runs scenarios one after another against a harness.
pub struct Runner<'h> {
    harness: &'h Harness,
}

impl<'h> Runner<'h> {
    pub fn new(harness: &'h Harness) -> Self {
        Self { harness }
    }

    /// Runs a single scenario in a fresh session.
    pub fn run_one(&self, scenario: &Scenario) -> ScenarioResult {
        let span = info_span!("scenario", name = %scenario.name);
        let _enter = span.enter();
        let start = Instant::now();

        let outcome = run_session(self.harness, &scenario.name, |session| {
            scenario.execute(session)
        });
        let duration_ms = start.elapsed().as_millis() as u64;

        let log_path = Some(outcome.scratch_dir.join(LOGCAT_FILENAME)).filter(|p| p.is_file());
        let mut result = ScenarioResult {
            name: scenario.name.clone(),
            outcome: Outcome::Passed,
            message: None,
            duration_ms,
            log_path,
            backtrace_path: None,
            teardown_issues: outcome.teardown.issues,
        };

        match outcome.result {
            Ok(()) => info!(duration_ms, "scenario passed"),
            Err(HarnessError::Crash(failure)) => {
                warn!(kind = %failure.kind, "scenario failed");
                result.outcome = Outcome::Failed(failure.kind);
                result.message = Some(failure.to_string());
                result.backtrace_path = failure.backtrace_path;
            }
            Err(e) => {
                warn!(error = %e, "scenario errored");
                result.outcome = Outcome::Error;
                result.message = Some(e.to_string());
            }
        }
        result
    }

    /// Runs every scenario and collects a report.
    ///
    /// Device identity is queried once up front. A failed query is logged
    /// and leaves the report's device empty.
    pub fn run(&self, scenarios: &[Scenario]) -> RunReport {
        let device = match DeviceInfo::query(self.harness.channel()) {
            Ok(info) => {
                info!(device = %info.device, build = %info.build, "device under test");
                Some(info)
            }
            Err(e) => {
                warn!(error = %e, "could not read device properties");
                None
            }
        };

        let results = scenarios.iter().map(|s| self.run_one(s)).collect();

        RunReport {
            run_id: self.harness.run_id().to_string(),
            started_at: self.harness.started_at(),
            finished_at: Utc::now(),
            device,
            results,
        }
    }
}
