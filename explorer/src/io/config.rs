//! Explorer configuration stored in `explorer.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "explorer.toml";

/// Explorer configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below,
/// and Appium connection fields can be overridden from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Capture/evaluate iterations before the run gives up.
    pub max_iterations: u32,

    /// Agent turns allowed within one capture iteration.
    pub max_capture_turns: u32,

    /// Wall-clock limit for a single agent invocation.
    pub agent_timeout_secs: u64,

    /// Optional wall-clock limit for the whole run. Unset means no deadline.
    pub run_timeout_secs: Option<u64>,

    /// Rendered prompts are shrunk to fit this many bytes.
    pub prompt_budget_bytes: usize,

    /// Truncate executor stdout/stderr logs beyond this many bytes.
    pub executor_output_limit_bytes: usize,

    /// Root directory for traces, screenshots, page sources and run logs.
    pub artifacts_dir: String,

    pub session_init_attempts: u32,
    pub session_retry_delay_ms: u64,

    pub agent: AgentConfig,
    pub appium: AppiumConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Passed to `codex exec` as `model_reasoning_effort`.
    pub reasoning_effort: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reasoning_effort: "medium".to_string(),
        }
    }
}

/// Connection and capability settings for the Appium server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppiumConfig {
    pub host: String,
    pub port: u16,
    pub platform_name: String,
    pub device_name: String,
    pub platform_version: String,
    pub automation_name: String,
    pub udid: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for AppiumConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4723,
            platform_name: "iOS".to_string(),
            device_name: "iPhone 16".to_string(),
            platform_version: "18.0".to_string(),
            automation_name: "XCUITest".to_string(),
            udid: None,
            request_timeout_secs: 60,
        }
    }
}

impl AppiumConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_capture_turns: 30,
            agent_timeout_secs: 10 * 60,
            run_timeout_secs: None,
            prompt_budget_bytes: 64_000,
            executor_output_limit_bytes: 100_000,
            artifacts_dir: "test_artifacts".to_string(),
            session_init_attempts: 3,
            session_retry_delay_ms: 1_000,
            agent: AgentConfig::default(),
            appium: AppiumConfig::default(),
        }
    }
}

impl ExplorerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_capture_turns == 0 {
            return Err(anyhow!("max_capture_turns must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(anyhow!("run_timeout_secs must be > 0 when set"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.executor_output_limit_bytes == 0 {
            return Err(anyhow!("executor_output_limit_bytes must be > 0"));
        }
        if self.artifacts_dir.trim().is_empty() {
            return Err(anyhow!("artifacts_dir must not be empty"));
        }
        if self.session_init_attempts == 0 {
            return Err(anyhow!("session_init_attempts must be > 0"));
        }
        if self.appium.host.trim().is_empty() {
            return Err(anyhow!("appium.host must not be empty"));
        }
        if self.appium.request_timeout_secs == 0 {
            return Err(anyhow!("appium.request_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Apply `APPIUM_*` / `IOS_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let appium = &mut self.appium;
        if let Some(host) = lookup("APPIUM_HOST") {
            appium.host = host;
        }
        if let Some(port) = lookup("APPIUM_PORT") {
            appium.port = port
                .trim()
                .parse()
                .with_context(|| format!("parse APPIUM_PORT {port:?}"))?;
        }
        for (key, field) in [
            ("IOS_PLATFORM_NAME", &mut appium.platform_name),
            ("IOS_DEVICE_NAME", &mut appium.device_name),
            ("IOS_PLATFORM_VERSION", &mut appium.platform_version),
            ("IOS_AUTOMATION_NAME", &mut appium.automation_name),
        ] {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }
        if let Some(udid) = lookup("IOS_UDID") {
            appium.udid = Some(udid).filter(|udid| !udid.trim().is_empty());
        }
        Ok(())
    }
}

/// Load config from a TOML file and apply environment overrides.
///
/// If the file is missing, starts from `ExplorerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ExplorerConfig> {
    let mut cfg = read_config_file(path)?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<ExplorerConfig> {
    if !path.exists() {
        return Ok(ExplorerConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ExplorerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn missing_file_yields_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = read_config_file(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ExplorerConfig::default());
    }

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("explorer.toml");
        let mut cfg = ExplorerConfig::default();
        cfg.run_timeout_secs = Some(900);
        cfg.appium.udid = Some("0000-1111".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = read_config_file(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("explorer.toml");
        fs::write(&path, "max_iterations = 5\n[appium]\nport = 4800\n").expect("write");
        let cfg = read_config_file(&path).expect("load");
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.appium.port, 4800);
        assert_eq!(cfg.appium.host, "127.0.0.1");
        assert_eq!(cfg.max_capture_turns, 30);
    }

    #[test]
    fn env_overrides_replace_appium_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("APPIUM_HOST", "10.0.0.2"),
            ("APPIUM_PORT", "4999"),
            ("IOS_DEVICE_NAME", "iPad Pro"),
            ("IOS_UDID", "abc-123"),
        ]);
        let mut cfg = ExplorerConfig::default();
        cfg.apply_env_overrides(|key| env.get(key).map(|value| value.to_string()))
            .expect("overrides");
        assert_eq!(cfg.appium.base_url(), "http://10.0.0.2:4999");
        assert_eq!(cfg.appium.device_name, "iPad Pro");
        assert_eq!(cfg.appium.udid.as_deref(), Some("abc-123"));
        assert_eq!(cfg.appium.platform_name, "iOS");
    }

    #[test]
    fn invalid_port_override_is_rejected() {
        let mut cfg = ExplorerConfig::default();
        let err = cfg
            .apply_env_overrides(|key| (key == "APPIUM_PORT").then(|| "nope".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("APPIUM_PORT"));
    }

    #[test]
    fn validate_rejects_zero_iterations() {
        let cfg = ExplorerConfig {
            max_iterations: 0,
            ..ExplorerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
