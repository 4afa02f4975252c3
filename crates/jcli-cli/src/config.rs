//! Client configuration at `~/.jcli/config.toml`.
//!
//! Provides a default server URL, proxy, transport mode and keys, plus SSH,
//! HTTP and keepalive settings. CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Server root URL.
    #[serde(default)]
    pub url: Option<String>,

    /// HTTP proxy as `host:port`.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Transport preference: "auto", "remoting", "http" or "ssh".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Private key files offered for authentication.
    #[serde(default)]
    pub identity: Vec<String>,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            url: None,
            proxy: None,
            mode: default_mode(),
            identity: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Trust host keys missing from `known_hosts`.
    #[serde(default = "default_true")]
    pub accept_unknown_host_keys: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            accept_unknown_host_keys: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub no_certificate_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

fn default_mode() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    15
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// `~/.jcli/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".jcli")
            .join("config.toml")
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default.mode, "auto");
        assert!(cfg.default.url.is_none());
        assert!(cfg.ssh.accept_unknown_host_keys);
        assert!(!cfg.http.no_certificate_check);
        assert_eq!(cfg.keepalive.interval_secs, 15);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[default]
url = "https://ci.example.com/"
proxy = "proxy.local:3128"
mode = "http"
identity = ["~/.ssh/jenkins_rsa"]

[ssh]
accept_unknown_host_keys = false

[http]
no_certificate_check = true

[keepalive]
interval_secs = 30
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.default.url.as_deref(), Some("https://ci.example.com/"));
        assert_eq!(cfg.default.proxy.as_deref(), Some("proxy.local:3128"));
        assert_eq!(cfg.default.mode, "http");
        assert_eq!(cfg.default.identity, vec!["~/.ssh/jenkins_rsa".to_string()]);
        assert!(!cfg.ssh.accept_unknown_host_keys);
        assert!(cfg.http.no_certificate_check);
        assert_eq!(cfg.keepalive.interval_secs, 30);
    }

    #[test]
    fn parse_partial_toml_config() {
        let toml_str = r#"
[ssh]
accept_unknown_host_keys = false
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.default.mode, "auto"); // default
        assert_eq!(cfg.keepalive.interval_secs, 15); // default
        assert!(!cfg.ssh.accept_unknown_host_keys);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default.mode, "auto");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[default\nurl = ").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn home_expansion() {
        assert_eq!(expand_home("/abs/key"), PathBuf::from("/abs/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id_rsa"), home.join(".ssh/id_rsa"));
        }
    }
}
