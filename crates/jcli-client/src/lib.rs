//! jcli-client: client library for running commands on a Jenkins server.
//!
//! Discovers what the server offers, negotiates a transport (the CLI port
//! with its encrypted handshake, the framed plain protocol over duplex
//! HTTP, or SSH) and runs one command with local stdio attached.
//!
//! # Quick Start
//!
//! ```no_run
//! use jcli_client::{CliClient, ConnectConfig, TransportMode};
//!
//! # async fn example() -> jcli_core::CliResult<()> {
//! let client = CliClient::new(ConnectConfig {
//!     url: "https://ci.example.com/".into(),
//!     mode: TransportMode::Http,
//!     ..Default::default()
//! })?;
//!
//! let code = client.run(vec!["who-am-i".into()]).await?;
//! std::process::exit(code);
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod crypto;
pub mod handshake;
pub mod http;
pub mod keepalive;
pub mod keystore;
pub mod locale;
pub mod plain;
pub mod probe;
pub mod proxy;
pub mod pump;
pub mod remoting;
pub mod resources;
pub mod ssh;
pub mod transport;

// Re-export primary public types.
pub use client::{CliClient, ConnectConfig};
pub use keystore::KeyProvider;
pub use probe::{EndpointDescriptor, ProtocolVersion};
pub use proxy::ProxyAddress;
pub use remoting::{ChannelFactory, CliEntryPoint, RemotingSession};
pub use resources::ResourceSet;
pub use transport::{TransportMode, TransportSelector};

// Re-export jcli-core error types for convenience.
pub use jcli_core::{CliError, CliResult};
