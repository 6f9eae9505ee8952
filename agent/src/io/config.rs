//! Agent configuration (TOML).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::STEP_CEILING;
use crate::core::guards::GuardPolicy;

/// Agent configuration.
///
/// Intended to be edited by humans. Missing fields take their defaults, so an
/// empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Name recorded in trajectories.
    pub name: String,

    /// Step budget per run; clamped to the hard ceiling at run time.
    pub max_steps: u32,

    /// Instructor text. Empty means no instructions unless the default is selected.
    pub instructions: String,

    /// Use the built-in instructor text when `instructions` is empty.
    pub use_default_instructor: bool,

    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub tools: ToolsConfig,
    pub guards: GuardPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "react-agent".to_string(),
            max_steps: STEP_CEILING,
            instructions: String::new(),
            use_default_instructor: false,
            model: ModelConfig::default(),
            sandbox: SandboxConfig::default(),
            tools: ToolsConfig::default(),
            guards: GuardPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// OpenAI-compatible chat completions over HTTP.
    Openai,
    /// External CLI reading the prompt on stdin.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: ModelBackend,
    pub name: String,
    pub endpoint: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Argv for the `command` backend (e.g. `["llm", "-m", "gpt-4o"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::Openai,
            name: "gpt-5-mini".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            command: vec!["llm".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub shell: String,
    /// Working directory for commands; relative paths resolve against the process cwd.
    pub workdir: PathBuf,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            workdir: PathBuf::from("."),
            timeout_secs: 3 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Register `add_instructions_and_backtrack`.
    pub backtrack: bool,
    /// Register the file inspection/edit/verification tools.
    pub optional: bool,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("name must be non-empty"));
        }
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must be non-empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        match self.model.backend {
            ModelBackend::Openai if self.model.endpoint.trim().is_empty() => {
                return Err(anyhow!("model.endpoint must be non-empty"));
            }
            ModelBackend::Command
                if self.model.command.is_empty() || self.model.command[0].trim().is_empty() =>
            {
                return Err(anyhow!("model.command must be a non-empty array"));
            }
            _ => {}
        }
        if self.sandbox.shell.trim().is_empty() {
            return Err(anyhow!("sandbox.shell must be non-empty"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        self.guards.validate()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
