//! Turns parsed flags plus the config file into a client run.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use jcli_client::keepalive::KeepaliveConfig;
use jcli_client::{CliClient, ConnectConfig, ProxyAddress, TransportMode};

use crate::config::{expand_home, Config};
use crate::Cli;

/// Run the command described by `cli`; returns the remote exit code.
pub async fn execute(cli: Cli) -> Result<i32> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let cfg = Config::load(&config_path)?;
    let connect = connect_config(&cli, &cfg, |name| std::env::var(name).ok())?;
    debug!(url = %connect.url, mode = %connect.mode, "resolved connection settings");

    let client = CliClient::new(connect).context("invalid connection settings")?;
    let code = client.run(cli.args).await?;
    Ok(code)
}

/// Merge flags over config values. `env` looks up environment variables.
pub fn connect_config(
    cli: &Cli,
    cfg: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConnectConfig> {
    let url = cli
        .url
        .clone()
        .or_else(|| env("HUDSON_URL"))
        .or_else(|| cfg.default.url.clone())
        .context("no server URL given; use -s or set JENKINS_URL")?;

    let mode = if cli.http {
        TransportMode::Http
    } else if cli.ssh {
        TransportMode::Ssh
    } else if cli.remoting {
        TransportMode::Remoting
    } else {
        cfg.default.mode.parse()?
    };

    let proxy = cli
        .proxy
        .as_deref()
        .or(cfg.default.proxy.as_deref())
        .map(str::parse::<ProxyAddress>)
        .transpose()?;

    let identity_files = if cli.identity.is_empty() {
        cfg.default.identity.iter().map(|p| expand_home(p)).collect()
    } else {
        cli.identity.clone()
    };

    if cfg.keepalive.interval_secs == 0 {
        anyhow::bail!("keepalive.interval_secs must be positive");
    }

    Ok(ConnectConfig {
        url,
        mode,
        proxy,
        auth: cli.auth.clone(),
        no_certificate_check: cli.no_certificate_check || cfg.http.no_certificate_check,
        keepalive: KeepaliveConfig::with_interval(Duration::from_secs(cfg.keepalive.interval_secs)),
        identity_files,
        no_key_auth: cli.no_key_auth,
        user: cli.user.clone(),
        accept_unknown_host_keys: cfg.ssh.accept_unknown_host_keys,
        ..ConnectConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("jcli").chain(args.iter().copied())).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn flags_override_config() {
        let mut cfg = Config::default();
        cfg.default.url = Some("http://from-config/".into());
        cfg.default.mode = "remoting".into();
        cfg.default.identity = vec!["/cfg/key".into()];

        let cli = parse(&["-s", "http://from-flag/", "--http", "-i", "/flag/key", "who-am-i"]);
        let connect = connect_config(&cli, &cfg, no_env).unwrap();
        assert_eq!(connect.url, "http://from-flag/");
        assert_eq!(connect.mode, TransportMode::Http);
        assert_eq!(connect.identity_files, vec![PathBuf::from("/flag/key")]);
        assert_eq!(cli.args, vec!["who-am-i".to_string()]);
    }

    #[test]
    fn config_fills_gaps() {
        let mut cfg = Config::default();
        cfg.default.url = Some("http://from-config/".into());
        cfg.default.mode = "ssh".into();
        cfg.default.proxy = Some("proxy.local:3128".into());
        cfg.keepalive.interval_secs = 20;

        let connect = connect_config(&parse(&[]), &cfg, no_env).unwrap();
        assert_eq!(connect.url, "http://from-config/");
        assert_eq!(connect.mode, TransportMode::Ssh);
        assert_eq!(connect.proxy.unwrap().to_string(), "proxy.local:3128");
        assert_eq!(connect.keepalive.interval, Duration::from_secs(20));
        assert_eq!(connect.keepalive.timeout, Duration::from_secs(15));
    }

    #[test]
    fn hudson_url_is_a_fallback() {
        let env = |name: &str| (name == "HUDSON_URL").then(|| "http://legacy/".to_string());
        let connect = connect_config(&parse(&[]), &Config::default(), env).unwrap();
        assert_eq!(connect.url, "http://legacy/");
    }

    #[test]
    fn url_is_required() {
        let err = connect_config(&parse(&[]), &Config::default(), no_env).unwrap_err();
        assert!(err.to_string().contains("JENKINS_URL"));
    }

    #[test]
    fn bad_config_mode_is_rejected() {
        let mut cfg = Config::default();
        cfg.default.url = Some("http://ci/".into());
        cfg.default.mode = "telnet".into();
        assert!(connect_config(&parse(&[]), &cfg, no_env).is_err());
    }

    #[test]
    fn mode_flags_conflict() {
        assert!(Cli::try_parse_from(["jcli", "--http", "--ssh"]).is_err());
        assert!(Cli::try_parse_from(["jcli", "--remoting", "--http"]).is_err());
    }

    #[test]
    fn command_args_keep_their_dashes() {
        let cli = parse(&["-s", "http://ci/", "build", "-s", "job"]);
        assert_eq!(cli.url.as_deref(), Some("http://ci/"));
        assert_eq!(cli.args, vec!["build", "-s", "job"]);
    }
}
