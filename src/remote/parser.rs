//! Frame parsing for the remote protocol.
//!
//! Decoding is permissive by contract: callers log a `ProtoError` and drop
//! the frame rather than tearing the session down, so peers speaking a newer
//! protocol revision keep working.

use log::debug;
use smol_str::SmolStr;
use thiserror::Error;

use crate::remote::protocol::{
   HostMessage, HostOpcode, MTU_MARKER, RemoteCommand, RemoteOpcode, StateSnapshot, decode_bool,
};

/// Error type for protocol parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
   /// Empty payload
   #[error("Empty payload")]
   Empty,

   /// Opcode outside the known table
   #[error("Unknown opcode: {opcode}")]
   UnknownOpcode { opcode: u8 },

   /// Frame is too short for its opcode
   #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
   PacketTooShort { expected: usize, actual: usize },

   /// Generic invalid packet format
   #[error("Invalid packet format: {reason}")]
   InvalidFormat { reason: &'static str },
}

type Result<T> = std::result::Result<T, ProtoError>;

fn require_len(data: &[u8], expected: usize) -> Result<()> {
   if data.len() < expected {
      return Err(ProtoError::PacketTooShort {
         expected,
         actual: data.len(),
      });
   }
   Ok(())
}

/// Parses a byte-channel frame sent by the remote.
///
/// Trailing bytes beyond the opcode's payload are ignored.
pub fn parse_remote_command(data: &[u8]) -> Result<RemoteCommand> {
   let (&opcode, payload) = data.split_first().ok_or(ProtoError::Empty)?;
   let op = RemoteOpcode::from_repr(opcode).ok_or(ProtoError::UnknownOpcode { opcode })?;
   require_len(data, 1 + op.payload_len())?;

   debug!("Remote frame {op}: {}", hex::encode(data));

   Ok(match op {
      RemoteOpcode::RequestConfigName => RemoteCommand::RequestConfigName { index: payload[0] },
      RemoteOpcode::SetModelVisible => RemoteCommand::SetModelVisible {
         visible: decode_bool(payload[0]),
         fade: decode_bool(payload[1]),
      },
      RemoteOpcode::SetNoiseActive => RemoteCommand::SetNoiseActive {
         active: decode_bool(payload[0]),
      },
      RemoteOpcode::StopAndRealign => RemoteCommand::StopAndRealign,
      RemoteOpcode::SelectConfig => RemoteCommand::SelectConfig { index: payload[0] },
      RemoteOpcode::SetConfigActive => RemoteCommand::SetConfigActive {
         active: decode_bool(payload[0]),
      },
      RemoteOpcode::NextPainting => RemoteCommand::NextPainting,
   })
}

/// Parses a byte-channel frame sent by the headset.
pub fn parse_host_message(data: &[u8]) -> Result<HostMessage> {
   let (&opcode, payload) = data.split_first().ok_or(ProtoError::Empty)?;
   let op = HostOpcode::from_repr(opcode).ok_or(ProtoError::UnknownOpcode { opcode })?;
   require_len(data, 1 + op.payload_len())?;

   debug!("Host frame {op}: {}", hex::encode(data));

   Ok(match op {
      HostOpcode::Connected => HostMessage::Connected { count: payload[0] },
      HostOpcode::State => HostMessage::State(StateSnapshot {
         model_visible: decode_bool(payload[0]),
         noise_active: decode_bool(payload[1]),
         active_config: payload[2],
      }),
   })
}

/// Parses the command-channel MTU frame. A zero MTU is rejected.
pub fn parse_mtu_frame(data: &[u8]) -> Result<u16> {
   require_len(data, 2)?;
   if data[0] != MTU_MARKER {
      return Err(ProtoError::InvalidFormat {
         reason: "missing MTU marker",
      });
   }
   if data[1] == 0 {
      return Err(ProtoError::InvalidFormat {
         reason: "zero MTU",
      });
   }
   Ok(u16::from(data[1]))
}

/// Splits a `"<index>;<name>"` reply into its parts.
pub fn parse_name_response(text: &str) -> Result<(u8, SmolStr)> {
   let (index, name) = text.split_once(';').ok_or(ProtoError::InvalidFormat {
      reason: "missing ';' separator",
   })?;
   let index = index.trim().parse().map_err(|_| ProtoError::InvalidFormat {
      reason: "config index is not a byte",
   })?;
   Ok((index, name.into()))
}
