//! Key agreement and the session stream cipher.

pub mod cipher;
pub mod dh;

pub use cipher::{CipherReader, CipherWriter};
pub use dh::{DhGroup, DhKeyPair, DhPublicKey};

/// Length of an AES-128 session key.
pub const SESSION_KEY_LEN: usize = 16;

/// XOR-fold `bytes` into `size` bytes.
///
/// Every input byte lands at `i % size`; when the input is shorter than
/// `size` it wraps around to fill the output.
pub fn fold(bytes: &[u8], size: usize) -> Vec<u8> {
    let mut folded = vec![0u8; size];
    if bytes.is_empty() || size == 0 {
        return folded;
    }
    for i in (0..bytes.len().max(size)).rev() {
        folded[i % size] ^= bytes[i % bytes.len()];
    }
    folded
}

/// AES-128 key derived from a key-agreement secret. Also used as the IV.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        key.copy_from_slice(&fold(secret, SESSION_KEY_LEN));
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}
