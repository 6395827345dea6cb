//! # lifeline-core
//!
//! Core library for Android app-lifecycle testing over `adb`.
//!
//! This crate drives lifecycle scenarios (launch, background, resume, app
//! switching) on an attached device, captures the device log, and fails
//! loudly on native crashes, uncaught Java exceptions, and ANRs. Native
//! crashes are symbolicated with `ndk-stack` before the failure is reported.
//!
//! ## Modules
//!
//! - [`channel`] - The single choke point for `adb` commands
//! - [`device`] - Device availability and identity queries
//! - [`logcat`] - Per-session log capture and caching
//! - [`crash`] - Failure signature classification
//! - [`symbolicate`] - Native backtrace symbolication
//! - [`lifecycle`] - Activity launch, input injection, and package reset
//! - [`session`] - Per-test sessions with guaranteed teardown
//! - [`scenario`] - Scenario scripts and the built-in lifecycle suite
//! - [`runner`] - Sequential scenario runner and JSON reports
//! - [`config`] - Persistent harness configuration
//! - [`error`] - Harness error taxonomy
//!
//! ## External Dependencies
//!
//! - **adb** (Android SDK platform-tools) - device control
//! - **ndk-stack** (Android NDK) - crash symbolication
//!
//! ## Example
//!
//! ```no_run
//! use lifeline_core::config::HarnessConfig;
//! use lifeline_core::runner::Runner;
//! use lifeline_core::scenario;
//! use lifeline_core::session::Harness;
//!
//! let config = HarnessConfig::load();
//! let harness = Harness::from_config(&config);
//! let suite = scenario::builtin(&config.activity_a, &config.activity_b);
//! let report = Runner::new(&harness).run(&suite);
//! println!("{} passed, {} failed", report.passed(), report.failed());
//! ```

pub mod channel;
pub mod config;
pub mod crash;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod logcat;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod symbolicate;

pub use error::{CrashFailure, HarnessError};
