//! SSH mode: run the command through the server's SSH endpoint.
//!
//! The endpoint is advertised in `X-SSH-Endpoint` on the login page. The
//! system `ssh` client does the actual work with local stdio inherited.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use url::Url;

use jcli_core::{CliError, CliResult};

use crate::http::{self, HttpContext};

pub const SSH_ENDPOINT_HEADER: &str = "X-SSH-Endpoint";

/// Where the server's SSH daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
}

impl SshEndpoint {
    pub fn parse(description: &str) -> CliResult<Self> {
        let (host, port) = description
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| CliError::Discovery(format!("malformed SSH endpoint {description:?}")))?;
        let port = port
            .parse()
            .map_err(|_| CliError::Discovery(format!("malformed SSH endpoint {description:?}")))?;
        if host.is_empty() {
            return Err(CliError::Discovery(format!(
                "malformed SSH endpoint {description:?}"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Read the advertised endpoint from `<base>login`.
pub async fn discover_endpoint(http: &HttpContext, base: &Url) -> CliResult<SshEndpoint> {
    let url = http::join(base, "login")?;
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| CliError::Http(format!("{url}: {e}")))?;
    let header = response
        .headers()
        .get(SSH_ENDPOINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    drop(response);

    let description = header.ok_or_else(|| {
        CliError::Discovery(format!("No header '{SSH_ENDPOINT_HEADER}' returned by Jenkins"))
    })?;
    tracing::debug!(endpoint = %description, "connecting via SSH");
    SshEndpoint::parse(&description)
}

/// Quote one argument so the server-side tokenizer yields it unchanged.
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{08}' => out.push_str("\\b"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// The remote command line: every argument quoted, space separated.
pub fn remote_command(args: &[String]) -> String {
    args.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub user: String,
    pub identity_files: Vec<PathBuf>,
    /// Trust host keys not yet in `known_hosts`.
    pub accept_unknown_host_keys: bool,
    pub program: String,
}

impl SshOptions {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            identity_files: Vec::new(),
            accept_unknown_host_keys: true,
            program: "ssh".into(),
        }
    }
}

pub fn build_command(endpoint: &SshEndpoint, options: &SshOptions, args: &[String]) -> Command {
    let host_key_policy = if options.accept_unknown_host_keys {
        "StrictHostKeyChecking=accept-new"
    } else {
        "StrictHostKeyChecking=yes"
    };

    let mut cmd = Command::new(&options.program);
    cmd.arg("-p")
        .arg(endpoint.port.to_string())
        .arg("-l")
        .arg(&options.user)
        .arg("-o")
        .arg(host_key_policy);
    for file in &options.identity_files {
        cmd.arg("-i").arg(file);
    }
    cmd.arg(&endpoint.host)
        .arg(remote_command(args))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    cmd
}

/// Discover the endpoint, run the command over SSH and return its exit code.
pub async fn run(
    http: &HttpContext,
    base: &Url,
    options: &SshOptions,
    args: &[String],
) -> CliResult<i32> {
    let endpoint = discover_endpoint(http, base).await?;
    if options.accept_unknown_host_keys {
        tracing::debug!(%endpoint, "unknown host keys will be accepted");
    }
    for file in &options.identity_files {
        tracing::info!("Offering private key {}", file.display());
    }

    let status = build_command(&endpoint, options, args)
        .status()
        .await
        .map_err(|e| CliError::Connect(format!("cannot run {}: {e}", options.program)))?;
    status
        .code()
        .ok_or_else(|| CliError::Other(format!("{} terminated by a signal", options.program)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConfig;
    use std::ffi::OsStr;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn quoting_matches_server_tokenizer() {
        assert_eq!(quote("help"), "\"help\"");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("a b"), "\"a b\"");
        assert_eq!(quote(r#"say "hi"\"#), r#""say \"hi\"\\""#);
        assert_eq!(quote("x\ny\t"), "\"x\\ny\\t\"");
        assert_eq!(
            remote_command(&["build".into(), "my job".into()]),
            "\"build\" \"my job\""
        );
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            SshEndpoint::parse("jenkins.local:2222").unwrap(),
            SshEndpoint {
                host: "jenkins.local".into(),
                port: 2222
            }
        );
        assert!(SshEndpoint::parse("no-port").is_err());
        assert!(SshEndpoint::parse(":22").is_err());
        assert!(SshEndpoint::parse("host:ssh").is_err());
    }

    #[test]
    fn command_line() {
        let endpoint = SshEndpoint::parse("ci:53801").unwrap();
        let mut options = SshOptions::new("alice");
        options.identity_files.push(PathBuf::from("/keys/id_rsa"));
        options.accept_unknown_host_keys = false;

        let cmd = build_command(&endpoint, &options, &["who-am-i".into()]);
        let std = cmd.as_std();
        assert_eq!(std.get_program(), OsStr::new("ssh"));
        let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-p",
                "53801",
                "-l",
                "alice",
                "-o",
                "StrictHostKeyChecking=yes",
                "-i",
                "/keys/id_rsa",
                "ci",
                "\"who-am-i\"",
            ]
        );
    }

    #[tokio::test]
    async fn discovers_endpoint_from_login_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).insert_header(SSH_ENDPOINT_HEADER, "ci.example:2200"))
            .mount(&server)
            .await;

        let http = HttpContext::new(&HttpConfig::default()).unwrap();
        let base = http::normalize_base_url(&server.uri()).unwrap();
        let endpoint = discover_endpoint(&http, &base).await.unwrap();
        assert_eq!(endpoint.to_string(), "ci.example:2200");
    }

    #[tokio::test]
    async fn missing_header_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let http = HttpContext::new(&HttpConfig::default()).unwrap();
        let base = http::normalize_base_url(&server.uri()).unwrap();
        let err = discover_endpoint(&http, &base).await.unwrap_err();
        assert!(matches!(err, CliError::Discovery(_)));
        assert!(err.to_string().contains(SSH_ENDPOINT_HEADER));
    }
}
