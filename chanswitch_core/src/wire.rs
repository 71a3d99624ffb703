//! Wire codec for the four channel-switch packets.
//!
//! ## Wire Format
//! ```text
//! ScanTrigger     [0x01][mask: u16 BE]      3 bytes
//! ChangeProposal  [0x02][channel: u8]       2 bytes
//! ChangeAck       [0x03]                    1 byte
//! VerifyAck       [0x04]                    1 byte
//! ```
//!
//! There is no length prefix: the leading type byte fixes the size. The
//! session's transport is a byte stream, so [`FrameDecoder`] buffers partial
//! input until a whole packet is available.

use chanswitch_env::{Channel, ChannelMask};
use serde::Serialize;
use thiserror::Error;

const TYPE_SCAN_TRIGGER: u8 = 0x01;
const TYPE_CHANGE_PROPOSAL: u8 = 0x02;
const TYPE_CHANGE_ACK: u8 = 0x03;
const TYPE_VERIFY_ACK: u8 = 0x04;

/// Decode failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty input")]
    Empty,

    #[error("Unknown packet type 0x{0:02x}")]
    UnknownType(u8),

    #[error("{kind} needs {expected} bytes, got {actual}")]
    Truncated {
        kind: PacketKind,
        expected: usize,
        actual: usize,
    },
}

/// Packet discriminant, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PacketKind {
    ScanTrigger,
    ChangeProposal,
    ChangeAck,
    VerifyAck,
}

impl PacketKind {
    fn from_type_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            TYPE_SCAN_TRIGGER => Ok(PacketKind::ScanTrigger),
            TYPE_CHANGE_PROPOSAL => Ok(PacketKind::ChangeProposal),
            TYPE_CHANGE_ACK => Ok(PacketKind::ChangeAck),
            TYPE_VERIFY_ACK => Ok(PacketKind::VerifyAck),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    /// Encoded size including the type byte.
    pub fn wire_len(self) -> usize {
        match self {
            PacketKind::ScanTrigger => 3,
            PacketKind::ChangeProposal => 2,
            PacketKind::ChangeAck | PacketKind::VerifyAck => 1,
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketKind::ScanTrigger => "ScanTrigger",
            PacketKind::ChangeProposal => "ChangeProposal",
            PacketKind::ChangeAck => "ChangeAck",
            PacketKind::VerifyAck => "VerifyAck",
        };
        f.write_str(name)
    }
}

/// A protocol packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    /// Initiator asks the responder to scan the channels in `mask`.
    ScanTrigger { mask: ChannelMask },
    /// Responder proposes moving both stations to `channel`.
    ChangeProposal { channel: Channel },
    /// Initiator accepted the proposal and will retune shortly.
    ChangeAck,
    /// Initiator has retuned.
    VerifyAck,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::ScanTrigger { .. } => PacketKind::ScanTrigger,
            Packet::ChangeProposal { .. } => PacketKind::ChangeProposal,
            Packet::ChangeAck => PacketKind::ChangeAck,
            Packet::VerifyAck => PacketKind::VerifyAck,
        }
    }

    /// Appends the encoded packet to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Packet::ScanTrigger { mask } => {
                out.push(TYPE_SCAN_TRIGGER);
                out.extend_from_slice(&mask.0.to_be_bytes());
            }
            Packet::ChangeProposal { channel } => {
                out.push(TYPE_CHANGE_PROPOSAL);
                out.push(channel.0);
            }
            Packet::ChangeAck => out.push(TYPE_CHANGE_ACK),
            Packet::VerifyAck => out.push(TYPE_VERIFY_ACK),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.kind().wire_len());
        self.encode_into(&mut out);
        out
    }

    /// Decodes the packet at the start of `bytes`.
    ///
    /// Returns the packet and the number of bytes it occupied; trailing bytes
    /// are left for the caller.
    ///
    /// # Errors
    /// - `CodecError::Empty`: no bytes at all
    /// - `CodecError::UnknownType`: unrecognised leading byte
    /// - `CodecError::Truncated`: fewer bytes than the packet's fixed size
    pub fn decode(bytes: &[u8]) -> Result<(Packet, usize), CodecError> {
        let first = *bytes.first().ok_or(CodecError::Empty)?;
        let kind = PacketKind::from_type_byte(first)?;
        let expected = kind.wire_len();
        if bytes.len() < expected {
            return Err(CodecError::Truncated {
                kind,
                expected,
                actual: bytes.len(),
            });
        }

        let packet = match kind {
            PacketKind::ScanTrigger => Packet::ScanTrigger {
                mask: ChannelMask(u16::from_be_bytes([bytes[1], bytes[2]])),
            },
            PacketKind::ChangeProposal => Packet::ChangeProposal {
                channel: Channel(bytes[1]),
            },
            PacketKind::ChangeAck => Packet::ChangeAck,
            PacketKind::VerifyAck => Packet::VerifyAck,
        };
        Ok((packet, expected))
    }
}

/// Reassembles packets from a byte stream.
///
/// Bytes are appended with [`FrameDecoder::extend`] and drained with
/// [`FrameDecoder::next_packet`]. An unknown type byte cannot be skipped
/// (its length is unknown), so it discards everything buffered so far.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet forming a packet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete packet, an error for garbage, or `None`
    /// when more bytes are needed.
    pub fn next_packet(&mut self) -> Option<Result<Packet, CodecError>> {
        match Packet::decode(&self.buffer) {
            Ok((packet, used)) => {
                self.buffer.drain(..used);
                Some(Ok(packet))
            }
            Err(CodecError::Empty) | Err(CodecError::Truncated { .. }) => None,
            Err(err) => {
                self.buffer.clear();
                Some(Err(err))
            }
        }
    }
}
