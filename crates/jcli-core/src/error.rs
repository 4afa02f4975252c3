use std::fmt;

use thiserror::Error;

use crate::transport::TransportKind;

/// Errors produced by the jcli protocol and transport layers.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("there's no Jenkins running at {0}")]
    NoServerDetected(String),

    #[error("no X-Jenkins-CLI2-Port among {0:?}")]
    NoPortAdvertised(Vec<String>),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("failed to establish a connection through HTTP proxy: {0}")]
    ProxyTunnelFailed(String),

    #[error("handshaking failed: {0}")]
    HandshakeMismatch(String),

    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("failed to negotiate transport security: {0}")]
    Crypto(String),

    #[error("server identity signature validation failed")]
    IdentitySpoofed,

    #[error("authentication failed: no private key accepted")]
    AuthenticationExhausted,

    #[error("no private key is available for use in authentication")]
    NoKeyAvailable,

    #[error("the server doesn't support public key authentication: {0}")]
    AuthUnsupported(String),

    #[error("framing violation: {0}")]
    FramingViolation(String),

    #[error("{0}")]
    AllTransportsFailed(Box<FallbackFailure>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure classes used by callers that only care about the kind of
/// failure, not its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    DiscoveryFailure,
    ConnectFailure,
    ProtocolMismatch,
    CryptoFailure,
    AuthenticationFailure,
    FramingViolation,
    Configuration,
    Other,
}

impl CliError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoServerDetected(_) | Self::NoPortAdvertised(_) | Self::Discovery(_) => {
                ErrorCategory::DiscoveryFailure
            }
            Self::Connect(_) | Self::ProxyTunnelFailed(_) | Self::Timeout | Self::Http(_) => {
                ErrorCategory::ConnectFailure
            }
            Self::HandshakeMismatch(_) | Self::ProtocolMismatch(_) => {
                ErrorCategory::ProtocolMismatch
            }
            Self::Crypto(_) | Self::IdentitySpoofed => ErrorCategory::CryptoFailure,
            Self::AuthenticationExhausted | Self::NoKeyAvailable | Self::AuthUnsupported(_) => {
                ErrorCategory::AuthenticationFailure
            }
            Self::FramingViolation(_) => ErrorCategory::FramingViolation,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::AllTransportsFailed(f) => f.primary.error.category(),
            Self::Io(_) => ErrorCategory::ConnectFailure,
            Self::Other(_) => ErrorCategory::Other,
        }
    }
}

/// One failed transport attempt.
#[derive(Debug)]
pub struct AttemptFailure {
    pub transport: TransportKind,
    pub error: CliError,
}

/// Terminal failure of a fallback chain: the first attempt's failure plus
/// every later attempt that was tried after it, in order.
#[derive(Debug)]
pub struct FallbackFailure {
    pub primary: AttemptFailure,
    pub superseded: Vec<AttemptFailure>,
}

impl fmt::Display for FallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} transport failed: {}", self.primary.transport, self.primary.error)?;
        for attempt in &self.superseded {
            write!(f, "; {} transport also failed: {}", attempt.transport, attempt.error)?;
        }
        Ok(())
    }
}

impl From<rsa::Error> for CliError {
    fn from(e: rsa::Error) -> Self {
        CliError::Crypto(e.to_string())
    }
}

impl From<base64::DecodeError> for CliError {
    fn from(e: base64::DecodeError) -> Self {
        CliError::Crypto(format!("invalid base64: {e}"))
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_errors_are_distinct() {
        let none = CliError::NoServerDetected("http://x/".into());
        let no_port = CliError::NoPortAdvertised(vec!["x-jenkins".into()]);
        assert_eq!(none.category(), ErrorCategory::DiscoveryFailure);
        assert_eq!(no_port.category(), ErrorCategory::DiscoveryFailure);
        assert!(matches!(no_port, CliError::NoPortAdvertised(_)));
    }

    #[test]
    fn fallback_display_lists_every_attempt() {
        let failure = FallbackFailure {
            primary: AttemptFailure {
                transport: TransportKind::CliPort,
                error: CliError::Connect("connection refused".into()),
            },
            superseded: vec![AttemptFailure {
                transport: TransportKind::Http,
                error: CliError::Http("503".into()),
            }],
        };
        let text = failure.to_string();
        assert!(text.contains("CLI port transport failed: connect failed: connection refused"));
        assert!(text.contains("HTTP transport also failed: http error: 503"));
    }

    #[test]
    fn fallback_category_follows_primary() {
        let err = CliError::AllTransportsFailed(Box::new(FallbackFailure {
            primary: AttemptFailure {
                transport: TransportKind::CliPort,
                error: CliError::IdentitySpoofed,
            },
            superseded: Vec::new(),
        }));
        assert_eq!(err.category(), ErrorCategory::CryptoFailure);
    }
}
