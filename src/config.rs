// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_SETTINGS_PATH: &str = "QUOTES_SETTINGS_PATH";
pub const ENV_FETCH_TIMEOUT_MS: &str = "QUOTES_FETCH_TIMEOUT_MS";
pub const ENV_SHUTDOWN_GRACE_MS: &str = "QUOTES_SHUTDOWN_GRACE_MS";
pub const ENV_SHUFFLE: &str = "QUOTES_SHUFFLE";

/// Runtime knobs for a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Upper bound for one fetch+parse attempt.
    pub fetch_timeout: Duration,
    /// How long `Dispatch::shutdown` waits for spawned tasks before aborting them.
    pub shutdown_grace: Duration,
    /// Shuffle each fetcher's queue so items are not served in catalog order.
    pub shuffle_tasks: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
            shuffle_tasks: true,
        }
    }
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}
fn default_shutdown_grace_ms() -> u64 {
    2_000
}
fn default_shuffle() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default = "default_fetch_timeout_ms")]
    fetch_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    shutdown_grace_ms: u64,
    #[serde(default = "default_shuffle")]
    shuffle_tasks: bool,
}

impl From<RawSettings> for DispatchSettings {
    fn from(r: RawSettings) -> Self {
        Self {
            // A zero timeout would fail every attempt instantly.
            fetch_timeout: Duration::from_millis(r.fetch_timeout_ms.max(1)),
            shutdown_grace: Duration::from_millis(r.shutdown_grace_ms),
            shuffle_tasks: r.shuffle_tasks,
        }
    }
}

/// Load settings from an explicit path. Supports TOML or JSON formats.
pub fn load_settings_from(path: &Path) -> Result<DispatchSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading dispatch settings from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_settings(&content, ext.as_str())
}

/// Load settings using env var + fallbacks, then apply env overrides:
/// 1) $QUOTES_SETTINGS_PATH
/// 2) config/quotes.toml
/// 3) config/quotes.json
/// 4) built-in defaults
pub fn load_settings_default() -> Result<DispatchSettings> {
    let base = if let Ok(p) = std::env::var(ENV_SETTINGS_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_SETTINGS_PATH} points to non-existent path"));
        }
        load_settings_from(&pb)?
    } else {
        let toml_p = PathBuf::from("config/quotes.toml");
        let json_p = PathBuf::from("config/quotes.json");
        if toml_p.exists() {
            load_settings_from(&toml_p)?
        } else if json_p.exists() {
            load_settings_from(&json_p)?
        } else {
            DispatchSettings::default()
        }
    };
    apply_env_overrides(base)
}

fn apply_env_overrides(mut s: DispatchSettings) -> Result<DispatchSettings> {
    if let Some(ms) = env_u64(ENV_FETCH_TIMEOUT_MS)? {
        s.fetch_timeout = Duration::from_millis(ms.max(1));
    }
    if let Some(ms) = env_u64(ENV_SHUTDOWN_GRACE_MS)? {
        s.shutdown_grace = Duration::from_millis(ms);
    }
    if let Ok(v) = std::env::var(ENV_SHUFFLE) {
        s.shuffle_tasks = parse_bool(&v)
            .ok_or_else(|| anyhow!("{ENV_SHUFFLE}: expected a boolean, got {v:?}"))?;
    }
    Ok(s)
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive.
pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{name}: expected milliseconds, got {v:?}")),
        Err(_) => Ok(None),
    }
}

fn parse_settings(s: &str, hint_ext: &str) -> Result<DispatchSettings> {
    let raw: RawSettings = match hint_ext {
        "json" => serde_json::from_str(s).context("parsing JSON dispatch settings")?,
        "toml" => toml::from_str(s).context("parsing TOML dispatch settings")?,
        // No usable extension: JSON objects start with '{', anything else is tried as TOML.
        _ if s.trim_start().starts_with('{') => {
            serde_json::from_str(s).context("parsing JSON dispatch settings")?
        }
        _ => toml::from_str(s).context("parsing TOML dispatch settings")?,
    };
    Ok(raw.into())
}
