//! Environment and on-disk configuration for the agent world core.
//!
//! Mirrors the teacher's config pattern (serde structs with `#[serde(default)]`,
//! a `toml`-backed `load_from`/`save_to` pair) but scoped to what SPEC_FULL.md
//! §6 "Environment" actually names: the event-persistence toggle, the storage
//! backend selector, and the LLM/tool bridge debug log switch.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Storage backend selected via `AGENT_WORLD_STORAGE_TYPE`.
///
/// Only `Memory` is functionally implemented by `agentworld-memory`; the
/// other two are real enum variants (not fabricated schemas) so the contract
/// stays honest about what's wired up. See DESIGN.md "Open Question
/// decisions".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl StorageBackend {
    pub fn from_env() -> Self {
        match env::var("AGENT_WORLD_STORAGE_TYPE") {
            Ok(v) if v.eq_ignore_ascii_case("file") => StorageBackend::File,
            Ok(v) if v.eq_ignore_ascii_case("sqlite") => StorageBackend::Sqlite,
            _ => StorageBackend::Memory,
        }
    }
}

/// Default world turn limit (spec.md §3 World.turnLimit default).
pub const DEFAULT_TURN_LIMIT: u32 = 5;

/// Default shell_cmd timeout (spec.md §5 "Timeouts").
pub const DEFAULT_SHELL_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldDefaults {
    pub turn_limit: u32,
    pub working_directory: String,
}

impl Default for WorldDefaults {
    fn default() -> Self {
        Self {
            turn_limit: DEFAULT_TURN_LIMIT,
            working_directory: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub timeout_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SHELL_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub world: WorldDefaults,
    pub shell: ShellConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn storage_backend(&self) -> StorageBackend {
        StorageBackend::from_env()
    }

    /// Re-reads `DISABLE_EVENT_PERSISTENCE` from the environment on every
    /// call rather than caching it at load time, so a persistence subscriber
    /// registered after an env var flip sees the current value.
    pub fn event_persistence_enabled(&self) -> bool {
        !env::var("DISABLE_EVENT_PERSISTENCE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn llm_tool_bridge_log_enabled(&self) -> bool {
        env::var("LOG_LLM_TOOL_BRIDGE")
            .map(|v| v == "1")
            .unwrap_or(false)
    }
}
