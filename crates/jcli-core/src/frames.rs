//! Frames of the plain CLI protocol spoken over the duplex HTTP transport.
//!
//! Wire format: `[4-byte big-endian payload length][1-byte opcode][payload]`
//!
//! Text payloads are `writeUTF` encoded; the exit payload is a 4-byte
//! big-endian signed integer.

use crate::codec;
use crate::error::{CliError, CliResult};

/// Largest frame payload accepted from the peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 5;

/// Frame opcodes. The discriminants are the on-wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Client → server: one command-line argument.
    Arg = 0,
    /// Client → server: locale name.
    Locale = 1,
    /// Client → server: character encoding name.
    Encoding = 2,
    /// Client → server: begin execution.
    Start = 3,
    /// Server → client: exit code.
    Exit = 4,
    /// Client → server: a chunk of standard input.
    Stdin = 5,
    /// Client → server: end of standard input.
    EndStdin = 6,
    /// Server → client: a chunk of standard output.
    Stdout = 7,
    /// Server → client: a chunk of standard error.
    Stderr = 8,
}

impl Op {
    /// Whether this op travels from the client to the server.
    pub fn is_server_bound(self) -> bool {
        !matches!(self, Op::Exit | Op::Stdout | Op::Stderr)
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => Op::Arg,
            1 => Op::Locale,
            2 => Op::Encoding,
            3 => Op::Start,
            4 => Op::Exit,
            5 => Op::Stdin,
            6 => Op::EndStdin,
            7 => Op::Stdout,
            8 => Op::Stderr,
            other => return Err(other),
        })
    }
}

/// A decoded frame. `op` is `None` for opcodes this side does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn op(&self) -> Option<Op> {
        Op::try_from(self.opcode).ok()
    }

    /// Interpret the payload as a `writeUTF` string.
    pub fn text(&self) -> CliResult<String> {
        codec::utf_from_bytes(&self.payload)
    }

    /// Interpret the payload as a 4-byte exit code.
    pub fn exit_code(&self) -> CliResult<i32> {
        let bytes: [u8; 4] = self.payload.as_slice().try_into().map_err(|_| {
            CliError::FramingViolation(format!(
                "exit frame carries {} bytes, expected 4",
                self.payload.len()
            ))
        })?;
        Ok(i32::from_be_bytes(bytes))
    }
}

/// Encode one frame.
pub fn frame_encode(op: Op, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.push(op as u8);
    frame.extend_from_slice(payload);
    frame
}

/// Encode a frame whose payload is a `writeUTF` string.
pub fn text_frame(op: Op, text: &str) -> CliResult<Vec<u8>> {
    Ok(frame_encode(op, &codec::utf_bytes(text)?))
}

/// Encode an exit frame.
pub fn exit_frame(code: i32) -> Vec<u8> {
    frame_encode(Op::Exit, &code.to_be_bytes())
}

/// Streaming frame decoder: accumulates bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return all frames completed by them,
    /// in arrival order.
    pub fn feed(&mut self, data: &[u8]) -> CliResult<Vec<Frame>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        let mut offset = 0;

        loop {
            let rest = &self.buffer[offset..];
            if rest.len() < HEADER_LEN {
                break;
            }
            let len = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
            if len < 0 || len as usize > MAX_FRAME_LEN {
                return Err(CliError::FramingViolation(format!(
                    "invalid frame length {len}"
                )));
            }
            let len = len as usize;
            if rest.len() < HEADER_LEN + len {
                break;
            }

            frames.push(Frame {
                opcode: rest[4],
                payload: rest[HEADER_LEN..HEADER_LEN + len].to_vec(),
            });
            offset += HEADER_LEN + len;
        }

        // Consumed bytes leave the buffer in one move.
        self.buffer.drain(..offset);
        Ok(frames)
    }

    /// Number of bytes of an incomplete frame held in the buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
