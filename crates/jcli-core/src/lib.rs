//! jcli-core: Shared protocol library for jcli.
//!
//! Provides the Java-compatible data codec, plain-protocol frames, server
//! instance identity helpers, transport types, and the common error type.

pub mod codec;
pub mod error;
pub mod frames;
pub mod identity;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{AttemptFailure, CliError, CliResult, ErrorCategory, FallbackFailure};
pub use frames::{Frame, FrameDecoder, Op};
pub use identity::{fingerprint, InstanceIdentity};
pub use transport::{BoxFuture, BoxedReader, BoxedWriter, DuplexConnection, TransportKind};
