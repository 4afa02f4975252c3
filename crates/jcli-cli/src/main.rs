//! jcli — Jenkins command-line client.
//!
//! Runs one server command over the CLI port, the framed HTTP protocol,
//! or SSH, with local stdin/stdout/stderr attached.

mod config;
mod run;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// jcli — run commands on a Jenkins server
#[derive(Parser, Debug)]
#[command(name = "jcli", version, about = "Run commands on a Jenkins server")]
pub struct Cli {
    /// Server root URL
    #[arg(short = 's', long = "url", env = "JENKINS_URL")]
    pub url: Option<String>,

    /// HTTP proxy (host:port) used to reach the CLI port; ignored without a
    /// remoting channel layer, which this binary does not include
    #[arg(short = 'p', long = "proxy")]
    pub proxy: Option<String>,

    /// Use the framed plain protocol over HTTP
    #[arg(long, conflicts_with_all = ["ssh", "remoting"])]
    pub http: bool,

    /// Use SSH through the server's advertised endpoint
    #[arg(long, conflicts_with_all = ["http", "remoting"])]
    pub ssh: bool,

    /// Use the CLI port only; needs a remoting channel layer, which this
    /// binary does not include
    #[arg(long, conflicts_with_all = ["http", "ssh"])]
    pub remoting: bool,

    /// Private key for authentication (repeatable)
    #[arg(short = 'i', long = "identity")]
    pub identity: Vec<PathBuf>,

    /// Don't load keys from the default locations
    #[arg(long)]
    pub no_key_auth: bool,

    /// Skip HTTPS certificate checks (insecure)
    #[arg(long)]
    pub no_certificate_check: bool,

    /// SSH login name
    #[arg(long)]
    pub user: Option<String>,

    /// HTTP credentials, `user:token` or `@file`
    #[arg(long)]
    pub auth: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub logger: Option<tracing::Level>,

    /// Config file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// The command and its arguments (default: help)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn init_tracing(level: Option<tracing::Level>) {
    let filter = match level {
        Some(level) => {
            let level = level.as_str().to_ascii_lowercase();
            EnvFilter::new(format!("jcli={level},jcli_client={level},jcli_core={level}"))
        }
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("jcli=warn,jcli_client=warn,jcli_core=warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(level.is_some_and(|l| l >= tracing::Level::DEBUG))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.logger);

    let code = match run::execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("jcli: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
