//! Typed process configuration and layered config-blob helpers.
//!
//! The process reads `.caw/config.json`, `CAW_*` environment variables, and
//! CLI flags into a typed [`CawConfig`]. Workflow- and workspace-level
//! policy lives in free-form JSON blobs merged with [`deep_merge`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire transport for the external tool surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stdio,
    Http,
}

impl Default for Transport {
    fn default() -> Self {
        Self::Stdio
    }
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stdio" => Some(Self::Stdio),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

/// Where the embedded store lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbMode {
    /// `~/.caw/workflows.db`, shared across repositories
    Global,
    /// `<repo>/.caw/workflows.db`
    PerRepo,
}

impl Default for DbMode {
    fn default() -> Self {
        Self::PerRepo
    }
}

impl DbMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::PerRepo => "per-repo",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "global" => Some(Self::Global),
            "per-repo" | "per_repo" => Some(Self::PerRepo),
            _ => None,
        }
    }
}

/// Policy for what happens once a workflow's tasks all complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    /// Drive the rebase/merge loop to completion unattended
    Auto,
    /// Stop at `awaiting_merge` for a human
    Hitl,
    /// Do nothing after completion
    Off,
}

impl Default for CycleMode {
    fn default() -> Self {
        Self::Hitl
    }
}

impl CycleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Hitl => "hitl",
            Self::Off => "off",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "hitl" => Some(Self::Hitl),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

/// Pull-request policy section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrConfig {
    /// What to do once a workflow's tasks complete
    #[serde(default)]
    pub cycle: CycleMode,
}

/// Agent runtime section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// External agent command the spawner invokes
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Whether to provision agent tooling on first run
    #[serde(default)]
    pub auto_setup: bool,
}

fn default_runtime() -> String {
    "claude".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            auto_setup: false,
        }
    }
}

/// Typed process configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CawConfig {
    #[serde(default)]
    pub transport: Transport,
    /// TCP port when `transport = http`
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub db_mode: DbMode,
    /// Repository the process works against
    #[serde(default)]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub pr: PrConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Keys recognized at the top level of `.caw/config.json`. Anything else is
/// ignored with a warning.
pub const KNOWN_CONFIG_KEYS: &[&str] =
    &["transport", "port", "dbMode", "db_mode", "repoPath", "repo_path", "pr", "agent"];

/// Deep-merge `patch` into `base`: object keys merge recursively, everything
/// else (including arrays and null) replaces.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut base = json!({"pr": {"cycle": "hitl"}, "keep": 1});
        deep_merge(&mut base, &json!({"pr": {"cycle": "auto"}, "extra": true}));
        assert_eq!(base, json!({"pr": {"cycle": "auto"}, "keep": 1, "extra": true}));
    }

    #[test]
    fn test_deep_merge_replaces_scalars_and_arrays() {
        let mut base = json!({"list": [1, 2], "n": 3});
        deep_merge(&mut base, &json!({"list": [9], "n": null}));
        assert_eq!(base, json!({"list": [9], "n": null}));
    }

    #[test]
    fn test_deep_merge_preserves_untouched_keys() {
        let mut base = json!({"a": {"x": 1, "y": 2}});
        deep_merge(&mut base, &json!({"a": {"y": 3}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}}));
    }

    #[test]
    fn test_default_config() {
        let cfg = CawConfig::default();
        assert_eq!(cfg.transport, Transport::Stdio);
        assert_eq!(cfg.db_mode, DbMode::PerRepo);
        assert_eq!(cfg.pr.cycle, CycleMode::Hitl);
        assert_eq!(cfg.agent.runtime, "claude");
    }

    #[test]
    fn test_cycle_mode_round_trip() {
        for mode in [CycleMode::Auto, CycleMode::Hitl, CycleMode::Off] {
            assert_eq!(CycleMode::from_str(mode.as_str()), Some(mode));
        }
    }
}
