//! Sandbox session configuration (TOML).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Session configuration.
///
/// This file is intended to be edited by humans and must remain stable.
/// Missing fields default to values matching the hosted sandbox setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Security origin of the isolated execution host. Inbound messages
    /// from any other origin are dropped unprocessed.
    pub origin: String,

    /// Receiver page identifier on the host origin.
    pub page: String,

    /// Handshake ping interval while the host has not answered.
    pub ping_interval_ms: u64,

    /// Settle delay between an execute request and the instrumented
    /// dispatch; a content change within the window cancels it.
    pub execute_settle_ms: u64,

    /// Skip the base well-formedness rules.
    pub lax: bool,

    /// Execute the initial content once the host is ready (example
    /// pages that should run their script on load).
    pub execute_on_ready: bool,

    /// Oldest console entries are discarded beyond this count.
    pub max_console_entries: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            origin: "https://sandbox.example".to_string(),
            page: "render.html".to_string(),
            ping_interval_ms: 1000,
            execute_settle_ms: 1000,
            lax: false,
            execute_on_ready: false,
            max_console_entries: 500,
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<()> {
        if self.origin.trim().is_empty() {
            return Err(anyhow!("origin must be non-empty"));
        }
        if self.origin.ends_with('/') {
            return Err(anyhow!("origin must not end with '/'"));
        }
        if self.page.trim().is_empty() {
            return Err(anyhow!("page must be non-empty"));
        }
        if self.ping_interval_ms == 0 {
            return Err(anyhow!("ping_interval_ms must be > 0"));
        }
        if self.max_console_entries == 0 {
            return Err(anyhow!("max_console_entries must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SandboxConfig::default()`.
pub fn load_config(path: &Path) -> Result<SandboxConfig> {
    if !path.exists() {
        let cfg = SandboxConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SandboxConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SandboxConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SandboxConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("sandbox.toml");
        let cfg = SandboxConfig {
            lax: true,
            execute_settle_ms: 250,
            ..SandboxConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn rejects_trailing_slash_origin() {
        let cfg = SandboxConfig {
            origin: "https://sandbox.example/".to_string(),
            ..SandboxConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_ping_interval() {
        let cfg = SandboxConfig {
            ping_interval_ms: 0,
            ..SandboxConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
