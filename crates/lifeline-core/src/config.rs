//! Persistent configuration for lifeline.
//!
//! Stores harness settings in `~/.lifeline/config.json`: where the SDK and
//! NDK live, which build the symbols come from, the activities the built-in
//! scenarios launch, and the set of packages reset around every test.
//!
//! # Example
//!
//! ```no_run
//! use lifeline_core::config::HarnessConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = HarnessConfig::load();
//! println!("symbols: {}", config.symbol_dir().display());
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::DeviceId;
use crate::lifecycle::{
    ActivityId, PackageId, PackageRegistry, SettlePolicy, HELLO_XR_GLES, HELLO_XR_VULKAN,
    NATIVE_ACTIVITY,
};
use crate::symbolicate::NdkStack;

const CONFIG_FILENAME: &str = "config.json";

/// Returns the lifeline directory path (`~/.lifeline/`).
///
/// Creates the directory if it doesn't exist. Falls back to the system temp
/// directory when no home directory is known.
pub fn lifeline_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".lifeline");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Errors loading an explicitly requested config file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where the unstripped native libraries of the build under test live.
///
/// Gradle merges them into
/// `build/intermediates/merged_native_libs/<variant>/merge<Variant>NativeLibs/out/lib/<arch>`
/// under the app module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolLayout {
    /// The Android app module directory.
    pub project_dir: PathBuf,
    /// Gradle build variant, e.g. `outOfProcessDebug`.
    pub build_variant: String,
    /// ABI directory name, e.g. `arm64-v8a`.
    pub arch: String,
}

impl SymbolLayout {
    /// Resolves the symbol directory for this layout.
    pub fn symbol_dir(&self) -> PathBuf {
        self.project_dir
            .join("build")
            .join("intermediates")
            .join("merged_native_libs")
            .join(&self.build_variant)
            .join(format!("merge{}NativeLibs", capitalize(&self.build_variant)))
            .join("out")
            .join("lib")
            .join(&self.arch)
    }
}

impl Default for SymbolLayout {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("src/xrt/targets/openxr_android"),
            build_variant: "outOfProcessDebug".to_string(),
            arch: "arm64-v8a".to_string(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Persistent lifeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Explicit `adb` executable. Resolved from the environment when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adb: Option<PathBuf>,

    /// Device serial. The single attached device is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<DeviceId>,

    /// Android SDK root.
    pub sdk_root: PathBuf,

    /// Side-by-side NDK version providing `ndk-stack`.
    pub ndk_version: String,

    /// Location of the symbols for the build under test.
    pub symbols: SymbolLayout,

    /// Packages stopped and cleared around every test.
    pub packages: PackageRegistry,

    /// First activity launched by the built-in scenarios.
    pub activity_a: ActivityId,

    /// Second activity, for app-switch scenarios.
    pub activity_b: ActivityId,

    /// Settling before launch and input commands.
    pub settle: SettlePolicy,

    /// Root directory for per-test artifacts.
    pub artifacts_root: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            adb: None,
            serial: None,
            sdk_root: dirs::home_dir()
                .unwrap_or_default()
                .join("Android")
                .join("Sdk"),
            ndk_version: "26.3.11579264".to_string(),
            symbols: SymbolLayout::default(),
            packages: PackageRegistry::default(),
            activity_a: ActivityId::of(&PackageId::new(HELLO_XR_GLES), NATIVE_ACTIVITY),
            activity_b: ActivityId::of(&PackageId::new(HELLO_XR_VULKAN), NATIVE_ACTIVITY),
            settle: SettlePolicy::default(),
            artifacts_root: std::env::temp_dir().join("lifeline"),
        }
    }
}

impl HarnessConfig {
    /// Load config from `~/.lifeline/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        let path = lifeline_dir().join(CONFIG_FILENAME);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load config from an explicit path, failing if it is missing or invalid.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default config location, `~/.lifeline/config.json`.
    pub fn default_path() -> PathBuf {
        lifeline_dir().join(CONFIG_FILENAME)
    }

    /// Save config to `~/.lifeline/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config as pretty-printed JSON at `path`.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
    }

    /// The resolved symbol directory.
    pub fn symbol_dir(&self) -> PathBuf {
        self.symbols.symbol_dir()
    }

    /// The `ndk-stack` symbolizer from the configured NDK.
    pub fn ndk_stack(&self) -> NdkStack {
        NdkStack::from_sdk(&self.sdk_root, &self.ndk_version)
    }
}
