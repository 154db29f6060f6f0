use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::generation::GenerationMode;

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// OpenAI-compatible endpoint URL
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Optional API key (sent as Bearer token)
    pub api_key: Option<String>,
    /// Seconds before a generation request is abandoned as a timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between typed characters. 0 inserts as fast as the document allows.
    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
    /// Mode used by `lask generate` when `--mode` is not given.
    #[serde(default)]
    pub mode: GenerationMode,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_typing_delay_ms() -> u64 {
    20
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            typing_delay_ms: default_typing_delay_ms(),
            mode: GenerationMode::default(),
            max_tokens: None,
            temperature: None,
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl ConfigFile {
    /// Load from the standard location, or defaults if nothing is there yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        write_starter(&path)?;
        Ok(path)
    }

    /// Resolve the active profile given an optional override name.
    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }

    /// Profile names, sorted, default first.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_by_key(|n| (*n != self.default_profile, *n));
        names
    }
}

fn write_starter(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
    pub timeout: Duration,
    pub typing_delay: Duration,
    pub mode: GenerationMode,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
        model_override: Option<&str>,
        api_key_override: Option<&str>,
    ) -> Self {
        let profile_name = profile_override
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(profile_override)
            .cloned()
            .unwrap_or_default();

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            model: model_override
                .map(str::to_string)
                .unwrap_or(base.model),
            api_key: api_key_override
                .map(str::to_string)
                .or(base.api_key),
            profile_name,
            timeout: Duration::from_secs(base.timeout_secs),
            typing_delay: Duration::from_millis(base.typing_delay_ms),
            mode: base.mode,
            max_tokens: base.max_tokens,
            temperature: base.temperature,
        }
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lask")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written by --init ─────────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# lask configuration
# Run `lask --init` to regenerate this file.

default_profile = "groq"

# ── Groq (default) ────────────────────────────────────────────────────────────
[profiles.groq]
endpoint        = "https://api.groq.com/openai"
model           = "llama-3.3-70b-versatile"
# api_key       = "gsk_..."      # or set LASK_API_KEY
timeout_secs    = 60
typing_delay_ms = 20

# ── Local Ollama ──────────────────────────────────────────────────────────────
# [profiles.local]
# endpoint        = "http://localhost:11434"
# model           = "qwen2.5-coder:7b"
# typing_delay_ms = 0            # insert as fast as possible

# ── OpenAI ───────────────────────────────────────────────────────────────────
# [profiles.openai]
# endpoint    = "https://api.openai.com"
# model       = "gpt-4o-mini"
# api_key     = "sk-..."
# max_tokens  = 1024
# temperature = 0.2

# ── Per-profile default mode: fix | generate | comment | chat ────────────────
# mode = "generate"
"#;

// ── Tests ─────────────────────────────────────────────────────────────────────
