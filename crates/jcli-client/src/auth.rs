//! Public-key authentication after the channel is up.
//!
//! Runs over a pipe pair obtained from the remote entry point:
//!
//! ```text
//! key agreement (client side)
//! S → C  UTF alg, key, byte[] SHA1withRSA(server key ‖ secret)
//! for each client key:
//!   C → S  UTF alg, key, byte[] SHA1withRSA(client key ‖ secret)
//!   S → C  bool accepted
//! ```

use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::io::{AsyncRead, AsyncWrite};

use jcli_core::{CliError, CliResult};

use crate::handshake::Connection;
use crate::remoting::CliEntryPoint;

/// Protocol name passed to the entry point.
pub const SSH_AUTH_PROTOCOL: &str = "ssh";

/// Offer `keys` in order until the server accepts one; returns the
/// verified server identity.
pub async fn authenticate_with<R, W>(
    conn: &mut Connection<R, W>,
    keys: &[RsaPrivateKey],
) -> CliResult<RsaPublicKey>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if keys.is_empty() {
        return Err(CliError::NoKeyAvailable);
    }

    let secret = conn.diffie_hellman_client().await?;
    let server = conn.verify_identity(&secret).await?;

    for (i, key) in keys.iter().enumerate() {
        conn.prove_identity(key, &secret).await?;
        if conn.read_bool().await? {
            tracing::debug!(key = i, "server accepted key");
            return Ok(server);
        }
        tracing::debug!(key = i, "server rejected key");
    }
    Err(CliError::AuthenticationExhausted)
}

/// Authenticate through the entry point's auth pipe.
pub async fn authenticate(
    entry: &dyn CliEntryPoint,
    keys: &[RsaPrivateKey],
) -> CliResult<RsaPublicKey> {
    if keys.is_empty() {
        return Err(CliError::NoKeyAvailable);
    }
    let (reader, writer) = entry.authenticate(SSH_AUTH_PROTOCOL).await?.into_parts();
    let mut conn = Connection::new(reader, writer);
    authenticate_with(&mut conn, keys).await
}

/// Apply the caller's policy to an authentication outcome.
///
/// When keys were named explicitly, failure is fatal. Otherwise the
/// session continues anonymously.
pub fn apply_policy(
    outcome: CliResult<RsaPublicKey>,
    explicit: bool,
) -> CliResult<Option<RsaPublicKey>> {
    match outcome {
        Ok(identity) => Ok(Some(identity)),
        Err(e) if explicit => Err(e),
        Err(CliError::AuthUnsupported(reason)) => {
            tracing::debug!("server does not support key authentication: {reason}");
            Ok(None)
        }
        Err(e) => {
            tracing::warn!("Failed to authenticate with your SSH keys. Proceeding as anonymous");
            tracing::debug!("authentication failure: {e}");
            Ok(None)
        }
    }
}
