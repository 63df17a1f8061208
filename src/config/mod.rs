use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_MAX_CONCURRENT_RUNS: usize = 10;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

fn default_max_concurrent_runs() -> usize {
    DEFAULT_MAX_CONCURRENT_RUNS
}

fn default_run_timeout_secs() -> u64 {
    DEFAULT_RUN_TIMEOUT_SECS
}

// ─── Workspace entries ────────────────────────────────────────────────────────

/// A workspace the daemon serves (`[[workspace]]` in config.toml).
///
/// Automations and run records live under `<root>/.triggerd/`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceEntry {
    /// Stable workspace identifier referenced by automations and RPC calls.
    pub id: String,
    /// Workspace root path (`~` is not expanded; use absolute paths).
    pub root: PathBuf,
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// Raw `config.toml` shape. All fields optional — flags and env win.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    max_concurrent_runs: Option<usize>,
    default_timeout_seconds: Option<u64>,
    #[serde(default, rename = "workspace")]
    workspaces: Vec<WorkspaceEntry>,
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

/// Resolved daemon configuration: `config.toml` merged with CLI/env overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Data directory for the config file and daemon-level state.
    pub data_dir: PathBuf,
    /// Admission bound: maximum simultaneously active runs across all
    /// automations. Requests beyond this fail without creating a record.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Run budget applied when an automation's action config has no
    /// `timeout_seconds` of its own.
    #[serde(default = "default_run_timeout_secs")]
    pub default_timeout_seconds: u64,
    /// Workspaces served by this daemon.
    #[serde(default)]
    pub workspaces: Vec<WorkspaceEntry>,
}

impl DaemonConfig {
    /// Load `config.toml` from `data_dir` (missing file = all defaults), then
    /// apply overrides.
    pub fn load(
        data_dir: PathBuf,
        max_concurrent_runs: Option<usize>,
        default_timeout_seconds: Option<u64>,
    ) -> Self {
        let file = read_config_file(&data_dir.join("config.toml"));
        let config = Self {
            data_dir,
            max_concurrent_runs: max_concurrent_runs
                .or(file.max_concurrent_runs)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_RUNS),
            default_timeout_seconds: default_timeout_seconds
                .or(file.default_timeout_seconds)
                .unwrap_or(DEFAULT_RUN_TIMEOUT_SECS),
            workspaces: file.workspaces,
        };
        info!(
            max_concurrent_runs = config.max_concurrent_runs,
            default_timeout_seconds = config.default_timeout_seconds,
            workspaces = config.workspaces.len(),
            "config loaded"
        );
        config
    }
}

fn read_config_file(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), "failed to parse config.toml, using defaults: {e}");
                ConfigFile::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), "failed to read config.toml, using defaults: {e}");
            ConfigFile::default()
        }
    }
}
