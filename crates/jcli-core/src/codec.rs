//! Java `DataInput`/`DataOutput` compatible primitives.
//!
//! Wire formats:
//! - UTF string: `[2-byte big-endian length][modified UTF-8 bytes]`
//! - byte array: `[4-byte big-endian signed length][bytes]`
//! - boolean: one byte, non-zero is `true`

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CliError, CliResult};

/// Largest byte array accepted from the peer.
pub const MAX_BYTE_ARRAY: usize = 16 * 1024 * 1024;

/// Encode a string as modified UTF-8 (NUL as two bytes, supplementary
/// characters as surrogate pairs).
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8 bytes back into a string.
pub fn decode_modified_utf8(bytes: &[u8]) -> CliResult<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = continuation(bytes, i + 1)?;
            units.push(((b as u16 & 0x1F) << 6) | b2);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = continuation(bytes, i + 1)?;
            let b3 = continuation(bytes, i + 2)?;
            units.push(((b as u16 & 0x0F) << 12) | (b2 << 6) | b3);
            i += 3;
        } else {
            return Err(CliError::FramingViolation(format!(
                "malformed UTF input around byte {i}"
            )));
        }
    }
    String::from_utf16(&units)
        .map_err(|e| CliError::FramingViolation(format!("malformed UTF input: {e}")))
}

fn continuation(bytes: &[u8], at: usize) -> CliResult<u16> {
    match bytes.get(at) {
        Some(b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        _ => Err(CliError::FramingViolation(format!(
            "malformed UTF input around byte {at}"
        ))),
    }
}

/// Encode a string the way `DataOutputStream.writeUTF` does.
pub fn utf_bytes(s: &str) -> CliResult<Vec<u8>> {
    let encoded = encode_modified_utf8(s);
    let len = u16::try_from(encoded.len()).map_err(|_| {
        CliError::FramingViolation(format!("encoded string too long: {} bytes", encoded.len()))
    })?;
    let mut out = Vec::with_capacity(2 + encoded.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend(encoded);
    Ok(out)
}

/// Decode a complete `writeUTF` payload (length prefix included).
pub fn utf_from_bytes(data: &[u8]) -> CliResult<String> {
    if data.len() < 2 {
        return Err(CliError::FramingViolation("UTF payload too short".into()));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + len {
        return Err(CliError::FramingViolation(format!(
            "UTF payload length {} does not match prefix {len}",
            data.len() - 2
        )));
    }
    decode_modified_utf8(&data[2..])
}

pub async fn write_utf<W: AsyncWrite + Unpin + ?Sized>(w: &mut W, s: &str) -> CliResult<()> {
    w.write_all(&utf_bytes(s)?).await?;
    Ok(())
}

pub async fn read_utf<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> CliResult<String> {
    let len = r.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    decode_modified_utf8(&buf)
}

pub async fn write_byte_array<W: AsyncWrite + Unpin + ?Sized>(
    w: &mut W,
    data: &[u8],
) -> CliResult<()> {
    let len = i32::try_from(data.len())
        .map_err(|_| CliError::FramingViolation("byte array too long".into()))?;
    w.write_i32(len).await?;
    w.write_all(data).await?;
    Ok(())
}

pub async fn read_byte_array<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> CliResult<Vec<u8>> {
    let len = r.read_i32().await?;
    if len < 0 || len as usize > MAX_BYTE_ARRAY {
        return Err(CliError::FramingViolation(format!(
            "invalid byte array length {len}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_bool<W: AsyncWrite + Unpin + ?Sized>(w: &mut W, value: bool) -> CliResult<()> {
    w.write_u8(value as u8).await?;
    Ok(())
}

pub async fn read_bool<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> CliResult<bool> {
    Ok(r.read_u8().await? != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_unchanged() {
        assert_eq!(encode_modified_utf8("Welcome"), b"Welcome");
        assert_eq!(utf_bytes("Welcome").unwrap(), b"\x00\x07Welcome");
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode_modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode_modified_utf8(&[b'a', 0xC0, 0x80, b'b']).unwrap(), "a\0b");
    }

    #[test]
    fn supplementary_characters_become_surrogate_pairs() {
        let encoded = encode_modified_utf8("\u{1F600}");
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn bmp_characters_match_utf8() {
        let s = "Grüße, 日本";
        assert_eq!(encode_modified_utf8(s), s.as_bytes());
    }

    #[test]
    fn truncated_sequence_is_rejected() {
        assert!(matches!(
            decode_modified_utf8(&[0xE6, 0x97]),
            Err(CliError::FramingViolation(_))
        ));
    }

    #[test]
    fn overlong_string_is_rejected() {
        let s = "x".repeat(70_000);
        assert!(utf_bytes(&s).is_err());
    }

    #[test]
    fn utf_payload_length_must_match() {
        assert_eq!(utf_from_bytes(b"\x00\x02en").unwrap(), "en");
        assert!(utf_from_bytes(b"\x00\x05en").is_err());
    }

    #[tokio::test]
    async fn stream_primitives() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_utf(&mut a, "Protocol:CLI2-connect").await.unwrap();
        write_byte_array(&mut a, &[1, 2, 3]).await.unwrap();
        write_bool(&mut a, true).await.unwrap();

        assert_eq!(read_utf(&mut b).await.unwrap(), "Protocol:CLI2-connect");
        assert_eq!(read_byte_array(&mut b).await.unwrap(), vec![1, 2, 3]);
        assert!(read_bool(&mut b).await.unwrap());
    }

    #[tokio::test]
    async fn negative_array_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_i32(-1).await.unwrap();
        assert!(matches!(
            read_byte_array(&mut b).await,
            Err(CliError::FramingViolation(_))
        ));
    }
}
