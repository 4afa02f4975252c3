//! The jcli client.
//!
//! `CliClient` runs one command: it loads keys, picks a transport, drives
//! the remote side until the command exits, and releases everything it
//! acquired on the way.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use url::Url;

use jcli_core::{fingerprint, BoxedReader, BoxedWriter, CliError, CliResult, DuplexConnection, TransportKind};

use crate::auth;
use crate::http::{self, HttpConfig, HttpContext};
use crate::keepalive::{spawn_keepalive, KeepaliveConfig};
use crate::keystore::KeyProvider;
use crate::locale;
use crate::plain::PlainClient;
use crate::proxy::ProxyAddress;
use crate::pump::spawn_stdin_pump;
use crate::remoting::{ChannelFactory, RemotingSession};
use crate::resources::{CloseFailures, ResourceSet};
use crate::ssh::{self, SshOptions};
use crate::transport::{
    CliPortConnector, Connector, HttpConnector, TransportMode, TransportSelector,
    UnavailableConnector, DEFAULT_CONNECT_TIMEOUT,
};

/// Command run when none is given.
pub const DEFAULT_COMMAND: &str = "help";

/// How long a failed send waits for the reader to report the server's verdict.
const VERDICT_GRACE: Duration = Duration::from_secs(2);

/// Configuration for talking to a server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server root URL.
    pub url: String,
    pub mode: TransportMode,
    /// HTTP proxy used to tunnel the CLI port connection.
    pub proxy: Option<ProxyAddress>,
    /// `user:token`, or `@file` holding it.
    pub auth: Option<String>,
    pub no_certificate_check: bool,
    /// Bound on TCP connects to the CLI port and the proxy.
    pub connect_timeout: Duration,
    pub keepalive: KeepaliveConfig,
    /// Private keys named explicitly; failures with these are fatal.
    pub identity_files: Vec<PathBuf>,
    /// Do not look for keys in the default locations.
    pub no_key_auth: bool,
    /// SSH login name.
    pub user: Option<String>,
    pub accept_unknown_host_keys: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            mode: TransportMode::Auto,
            proxy: None,
            auth: None,
            no_certificate_check: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: KeepaliveConfig::default(),
            identity_files: Vec::new(),
            no_key_auth: false,
            user: None,
            accept_unknown_host_keys: true,
        }
    }
}

pub struct CliClient {
    config: ConnectConfig,
    base: Url,
    http: HttpContext,
    channels: Option<Arc<dyn ChannelFactory>>,
}

impl CliClient {
    pub fn new(config: ConnectConfig) -> CliResult<Self> {
        let base = http::normalize_base_url(&config.url)?;
        let authorization = http::resolve_authorization(&base, config.auth.as_deref())?;
        let http = HttpContext::new(&HttpConfig {
            authorization,
            no_certificate_check: config.no_certificate_check,
            ..HttpConfig::default()
        })?;

        if config.user.is_some() && config.auth.is_some() {
            tracing::warn!("--user and --auth are mutually exclusive");
        }
        if config.user.is_some() && config.mode != TransportMode::Ssh {
            tracing::warn!("--user ignored unless using SSH mode");
        }

        Ok(Self {
            config,
            base,
            http,
            channels: None,
        })
    }

    /// Enable the CLI port transport by supplying the remoting layer.
    pub fn with_channel_factory(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.channels = Some(factory);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Run `args` with the process's standard streams.
    pub async fn run(&self, args: Vec<String>) -> CliResult<i32> {
        self.run_with(
            args,
            Box::new(tokio::io::stdin()),
            Box::new(tokio::io::stdout()),
            Box::new(tokio::io::stderr()),
        )
        .await
    }

    /// Run `args` and return the remote exit code.
    ///
    /// SSH mode always uses the inherited process streams.
    pub async fn run_with(
        &self,
        args: Vec<String>,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> CliResult<i32> {
        let args = if args.is_empty() {
            vec![DEFAULT_COMMAND.to_string()]
        } else {
            args
        };
        let keys = self.load_keys()?;
        tracing::debug!(mode = %self.config.mode, "using connection mode");

        if self.config.mode == TransportMode::Ssh {
            return self.run_ssh(&keys, &args).await;
        }

        let resources = Arc::new(ResourceSet::new());
        let result = self
            .run_selected(&resources, &keys, args, stdin, stdout, stderr)
            .await;
        if let Err(CloseFailures(failures)) = resources.close_all() {
            for (name, e) in failures {
                tracing::debug!("failed to close {name}: {e}");
            }
        }
        result
    }

    fn load_keys(&self) -> CliResult<KeyProvider> {
        let mut provider = KeyProvider::new();
        for path in &self.config.identity_files {
            provider.read_from(path)?;
        }
        if !self.config.no_key_auth && !provider.has_keys() {
            provider.read_from_default_locations();
        }
        Ok(provider)
    }

    fn selector(&self, resources: &Arc<ResourceSet>) -> CliResult<TransportSelector> {
        let mode = match (self.config.mode, &self.channels) {
            (TransportMode::Remoting, None) => {
                return Err(CliError::Config(
                    "remoting mode needs a remoting channel layer, which this client does not have; \
                     use --http or --ssh"
                        .into(),
                ))
            }
            (TransportMode::Auto, None) => {
                tracing::debug!("no remoting channel layer, using HTTP");
                TransportMode::Http
            }
            (mode, _) => mode,
        };
        if self.channels.is_none() && self.config.proxy.is_some() {
            tracing::warn!("--proxy only applies to the CLI port transport; ignoring it");
        }

        let cli_port: Box<dyn Connector> = match self.channels {
            Some(_) => Box::new(CliPortConnector {
                http: self.http.clone(),
                base: self.base.clone(),
                proxy: self.config.proxy.clone(),
                connect_timeout: self.config.connect_timeout,
                resources: resources.clone(),
            }),
            None => Box::new(UnavailableConnector {
                kind: TransportKind::CliPort,
                reason: "no remoting channel layer configured".into(),
            }),
        };
        let http = Box::new(HttpConnector {
            http: self.http.clone(),
            base: self.base.clone(),
            resources: resources.clone(),
        });
        Ok(TransportSelector::new(mode, cli_port, http))
    }

    async fn run_selected(
        &self,
        resources: &Arc<ResourceSet>,
        keys: &KeyProvider,
        args: Vec<String>,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> CliResult<i32> {
        let (kind, conn) = self.selector(resources)?.establish().await?;
        match kind {
            TransportKind::Http => self.run_plain(resources, conn, args, stdin, stdout, stderr).await,
            TransportKind::CliPort => self.run_remoting(conn, keys, args, stdin, stdout, stderr).await,
            TransportKind::Ssh => Err(CliError::Other("unexpected SSH transport".into())),
        }
    }

    async fn run_plain(
        &self,
        resources: &ResourceSet,
        conn: DuplexConnection,
        args: Vec<String>,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> CliResult<i32> {
        let client = PlainClient::start(conn, stdout, stderr);
        resources.register(client.reader_abort_handle());

        if let Err(e) = client
            .start_command(&args, &locale::current_encoding(), &locale::current_locale())
            .await
        {
            // A send fails once the server side has gone; its verdict says why.
            return match time::timeout(VERDICT_GRACE, client.wait_for_exit()).await {
                Ok(verdict) => verdict,
                Err(_) => Err(e),
            };
        }

        let pump = spawn_stdin_pump(stdin, client.handle());
        resources.register(pump.abort_handle());
        let keepalive = spawn_keepalive(client.handle(), self.config.keepalive, |e| {
            tracing::debug!(error = %e, "keepalive ping failed");
        });
        resources.register(keepalive.abort_handle());

        client.wait_for_exit().await
    }

    async fn run_remoting(
        &self,
        conn: DuplexConnection,
        keys: &KeyProvider,
        args: Vec<String>,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> CliResult<i32> {
        let factory = self
            .channels
            .as_deref()
            .ok_or_else(|| CliError::Connect("no remoting channel layer configured".into()))?;
        let session = RemotingSession::open(factory, conn).await?;

        let result: CliResult<i32> = async {
            if keys.has_keys() {
                let explicit = !self.config.identity_files.is_empty();
                let outcome = session.authenticate(&keys.private_keys()).await;
                if let Some(server) = auth::apply_policy(outcome, explicit)? {
                    let der = jcli_core::identity::encode_public_key(&server)?;
                    tracing::info!(server = %fingerprint(&der), "authenticated");
                }
            }
            session.execute(args, stdin, stdout, stderr).await
        }
        .await;

        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "closing remoting channel failed");
        }
        result
    }

    async fn run_ssh(&self, keys: &KeyProvider, args: &[String]) -> CliResult<i32> {
        let user = self
            .config
            .user
            .clone()
            .ok_or_else(|| CliError::Config("--user required when using SSH mode".into()))?;
        let mut options = SshOptions::new(user);
        options.identity_files = keys.keys().iter().map(|k| k.path.clone()).collect();
        options.accept_unknown_host_keys = self.config.accept_unknown_host_keys;
        ssh::run(&self.http, &self.base, &options, args).await
    }
}
