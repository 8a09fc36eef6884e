//! Resolver configuration loaded from `~/.config/playurl/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::js_engine::SandboxLimits;

/// Entry point every provider script must define.
pub const DEFAULT_ENTRY_POINT: &str = "GetRealPlayUrl";

const MAX_MEMORY_LIMIT_MB: usize = 4096;
const MAX_STACK_KB: usize = 64 * 1024;

/// Tunables for a [`Resolver`](crate::Resolver).
///
/// Every key is optional in the TOML file:
///
/// ```toml
/// max_iterations = 20
/// entry_point = "GetRealPlayUrl"
/// fetch_timeout_secs = 15
/// connect_timeout_secs = 10
/// script_timeout_ms = 5000
/// memory_limit_mb = 32
/// max_stack_kb = 1024
/// user_agent = "playurl/0.1"
/// max_redirects = 10
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Upper bound on script invocations per run.
    pub max_iterations: u32,
    /// Name of the global function called on every iteration.
    pub entry_point: String,
    pub fetch_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Wall-clock budget for loading the script and for each invocation.
    pub script_timeout_ms: u64,
    pub memory_limit_mb: usize,
    pub max_stack_kb: usize,
    /// User-Agent sent when the script does not set one.
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            fetch_timeout_secs: 15,
            connect_timeout_secs: 10,
            script_timeout_ms: 5_000,
            memory_limit_mb: 32,
            max_stack_kb: 1024,
            user_agent: concat!("playurl/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 10,
        }
    }
}

impl ResolverConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    /// Sandbox limits derived from this configuration.
    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_limit: self.memory_limit_mb.saturating_mul(1024 * 1024),
            max_stack_size: self.max_stack_kb.saturating_mul(1024),
            timeout: self.script_timeout(),
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid resolver config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Load from `~/.config/playurl/config.toml`.
    ///
    /// Returns the defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_iterations > 0, "max_iterations must be at least 1");
        anyhow::ensure!(!self.entry_point.trim().is_empty(), "entry_point must not be empty");
        anyhow::ensure!(self.script_timeout_ms > 0, "script_timeout_ms must be positive");
        anyhow::ensure!(self.fetch_timeout_secs > 0, "fetch_timeout_secs must be positive");
        anyhow::ensure!(
            (1..=MAX_MEMORY_LIMIT_MB).contains(&self.memory_limit_mb),
            "memory_limit_mb must be between 1 and {MAX_MEMORY_LIMIT_MB}"
        );
        anyhow::ensure!(
            (1..=MAX_STACK_KB).contains(&self.max_stack_kb),
            "max_stack_kb must be between 1 and {MAX_STACK_KB}"
        );
        Ok(())
    }
}

/// Return the path to the config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("playurl")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_empty_config() {
        let config = ResolverConfig::from_toml("").unwrap();
        assert_eq!(config, ResolverConfig::default());
        assert_eq!(config.entry_point, "GetRealPlayUrl");
        assert_eq!(config.max_iterations, 20);
    }

    #[test]
    fn parse_partial_config() {
        let config = ResolverConfig::from_toml(
            r#"
max_iterations = 4
script_timeout_ms = 250
entry_point = "Resolve"
"#,
        )
        .unwrap();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.script_timeout(), Duration::from_millis(250));
        assert_eq!(config.entry_point, "Resolve");
        assert_eq!(config.fetch_timeout_secs, 15);
    }

    #[test]
    fn rejects_zero_iterations() {
        let err = ResolverConfig::from_toml("max_iterations = 0").unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(ResolverConfig::from_toml("max_iteration = 3").is_err());
    }

    #[test]
    fn sandbox_limits_scale_units() {
        let config = ResolverConfig::default();
        let limits = config.sandbox_limits();
        assert_eq!(limits.memory_limit, 32 * 1024 * 1024);
        assert_eq!(limits.max_stack_size, 1024 * 1024);
        assert_eq!(limits.timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_out_of_range_sandbox_sizes() {
        let err = ResolverConfig::from_toml("memory_limit_mb = 9223372036854775807").unwrap_err();
        assert!(format!("{err:#}").contains("memory_limit_mb"));
        let err = ResolverConfig::from_toml("max_stack_kb = 0").unwrap_err();
        assert!(format!("{err:#}").contains("max_stack_kb"));
        assert!(ResolverConfig::from_toml("memory_limit_mb = 4096").is_ok());
    }

    #[test]
    fn sandbox_limits_saturate_instead_of_overflowing() {
        let config = ResolverConfig {
            memory_limit_mb: usize::MAX,
            max_stack_kb: usize::MAX,
            ..ResolverConfig::default()
        };
        let limits = config.sandbox_limits();
        assert_eq!(limits.memory_limit, usize::MAX);
        assert_eq!(limits.max_stack_size, usize::MAX);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fetch_timeout_secs = 3").unwrap();
        let config = ResolverConfig::load_from(file.path()).unwrap();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn load_from_missing_file_fails() {
        assert!(ResolverConfig::load_from(Path::new("/nonexistent/playurl.toml")).is_err());
    }
}
