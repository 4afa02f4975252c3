//! Transport selection and the fallback chain.
//!
//! - `Auto` tries the CLI port, then falls back to the plain protocol over
//!   duplex HTTP.
//! - `Remoting` and `Http` use exactly one transport and never fall back.
//! - `Ssh` bypasses the selector; see [`crate::ssh`].

pub mod cli_port;
pub mod duplex;

pub use cli_port::{CliPortConnector, DEFAULT_CONNECT_TIMEOUT};
pub use duplex::{FullDuplexHttpStream, HttpConnector};

use std::fmt;
use std::str::FromStr;

use jcli_core::{
    AttemptFailure, BoxFuture, CliError, CliResult, DuplexConnection, FallbackFailure,
    TransportKind,
};

/// Which transport(s) the caller allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Auto,
    Remoting,
    Http,
    Ssh,
}

impl FromStr for TransportMode {
    type Err = CliError;

    fn from_str(s: &str) -> CliResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "remoting" => Ok(Self::Remoting),
            "http" => Ok(Self::Http),
            "ssh" => Ok(Self::Ssh),
            other => Err(CliError::Config(format!(
                "unknown transport mode {other:?} (expected auto, remoting, http or ssh)"
            ))),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Remoting => "remoting",
            Self::Http => "http",
            Self::Ssh => "ssh",
        })
    }
}

/// One way of reaching the server.
pub trait Connector: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn connect<'a>(&'a self) -> BoxFuture<'a, CliResult<DuplexConnection>>;
}

/// A connector that always fails, for transports this build cannot drive.
pub struct UnavailableConnector {
    pub kind: TransportKind,
    pub reason: String,
}

impl Connector for UnavailableConnector {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn connect<'a>(&'a self) -> BoxFuture<'a, CliResult<DuplexConnection>> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(CliError::Connect(reason)) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Unattempted,
    TryPrimary,
    TrySecondary,
    Established(TransportKind),
    Failed,
}

/// Walks the fallback chain for a [`TransportMode`].
pub struct TransportSelector {
    mode: TransportMode,
    state: SelectorState,
    cli_port: Box<dyn Connector>,
    http: Box<dyn Connector>,
}

impl TransportSelector {
    pub fn new(mode: TransportMode, cli_port: Box<dyn Connector>, http: Box<dyn Connector>) -> Self {
        Self {
            mode,
            state: SelectorState::Unattempted,
            cli_port,
            http,
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Establish a connection, returning which transport carried it.
    pub async fn establish(&mut self) -> CliResult<(TransportKind, DuplexConnection)> {
        if self.state != SelectorState::Unattempted {
            return Err(CliError::Other("transport selection already ran".into()));
        }
        let (primary, secondary): (&dyn Connector, Option<&dyn Connector>) = match self.mode {
            TransportMode::Auto => (self.cli_port.as_ref(), Some(self.http.as_ref())),
            TransportMode::Remoting => (self.cli_port.as_ref(), None),
            TransportMode::Http => (self.http.as_ref(), None),
            TransportMode::Ssh => {
                self.state = SelectorState::Failed;
                return Err(CliError::Config(
                    "SSH mode runs through the external ssh client".into(),
                ));
            }
        };

        self.state = SelectorState::TryPrimary;
        let primary_error = match primary.connect().await {
            Ok(conn) => {
                let kind = primary.kind();
                tracing::info!(transport = %kind, "connected");
                self.state = SelectorState::Established(kind);
                return Ok((kind, conn));
            }
            Err(e) => e,
        };

        let Some(secondary) = secondary else {
            self.state = SelectorState::Failed;
            return Err(primary_error);
        };

        tracing::warn!(
            "{} transport failed ({primary_error}); falling back to {}",
            primary.kind(),
            secondary.kind()
        );
        self.state = SelectorState::TrySecondary;
        match secondary.connect().await {
            Ok(conn) => {
                let kind = secondary.kind();
                tracing::info!(transport = %kind, "connected");
                self.state = SelectorState::Established(kind);
                Ok((kind, conn))
            }
            Err(e) => {
                self.state = SelectorState::Failed;
                Err(CliError::AllTransportsFailed(Box::new(FallbackFailure {
                    primary: AttemptFailure {
                        transport: primary.kind(),
                        error: primary_error,
                    },
                    superseded: vec![AttemptFailure {
                        transport: secondary.kind(),
                        error: e,
                    }],
                })))
            }
        }
    }
}
