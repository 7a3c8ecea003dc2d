//! Remote protocol definitions and data structures.
//!
//! This module contains the opcode tables, message types and encoders for
//! the byte and string channels exchanged between the headset and the
//! remote once a session is ready. Opcode numbers and payload order are the
//! compatibility surface with unmodified peers.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

use crate::bluetooth::transport::Packet;

/// Bytes the link layer reserves from every negotiated MTU.
pub const PROTOCOL_OVERHEAD: u16 = 3;

/// Effective MTU of a link that never negotiated one.
pub const DEFAULT_EFFECTIVE_MTU: u16 = 23 - PROTOCOL_OVERHEAD;

/// First byte of the command-channel frame carrying the effective MTU.
pub const MTU_MARKER: u8 = 0xA5;

/// Name returned for a configuration index the application does not know.
pub const INVALID_CONFIG_NAME: &str = "INVALID PM INDEX!";

/// Opcodes sent by the remote to the headset.
#[repr(u8)]
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display, strum::IntoStaticStr,
)]
pub enum RemoteOpcode {
   RequestConfigName = 0,
   SetModelVisible = 1,
   SetNoiseActive = 2,
   StopAndRealign = 3,
   SelectConfig = 4,
   SetConfigActive = 5,
   NextPainting = 6,
}

impl RemoteOpcode {
   /// Number of payload bytes following the opcode.
   pub const fn payload_len(self) -> usize {
      match self {
         Self::RequestConfigName
         | Self::SetNoiseActive
         | Self::SelectConfig
         | Self::SetConfigActive => 1,
         Self::SetModelVisible => 2,
         Self::StopAndRealign | Self::NextPainting => 0,
      }
   }
}

/// Opcodes sent by the headset to the remote.
#[repr(u8)]
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display, strum::IntoStaticStr,
)]
pub enum HostOpcode {
   Connected = 0,
   State = 1,
}

impl HostOpcode {
   pub const fn payload_len(self) -> usize {
      match self {
         Self::Connected => 1,
         Self::State => 3,
      }
   }
}

/// A decoded remote → headset command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCommand {
   /// Ask for the name of the manipulation config at `index`.
   RequestConfigName { index: u8 },
   SetModelVisible { visible: bool, fade: bool },
   SetNoiseActive { active: bool },
   /// Stop the running manipulation and realign the model.
   StopAndRealign,
   SelectConfig { index: u8 },
   /// Start or stop the currently selected config.
   SetConfigActive { active: bool },
   NextPainting,
}

impl RemoteCommand {
   pub const fn opcode(&self) -> RemoteOpcode {
      match self {
         Self::RequestConfigName { .. } => RemoteOpcode::RequestConfigName,
         Self::SetModelVisible { .. } => RemoteOpcode::SetModelVisible,
         Self::SetNoiseActive { .. } => RemoteOpcode::SetNoiseActive,
         Self::StopAndRealign => RemoteOpcode::StopAndRealign,
         Self::SelectConfig { .. } => RemoteOpcode::SelectConfig,
         Self::SetConfigActive { .. } => RemoteOpcode::SetConfigActive,
         Self::NextPainting => RemoteOpcode::NextPainting,
      }
   }

   /// Builds the byte-channel frame for this command.
   pub fn build(&self) -> Packet {
      let mut pkt = Packet::new();
      pkt.push(self.opcode() as u8);
      match *self {
         Self::RequestConfigName { index } | Self::SelectConfig { index } => pkt.push(index),
         Self::SetModelVisible { visible, fade } => {
            pkt.extend([encode_bool(visible), encode_bool(fade)]);
         },
         Self::SetNoiseActive { active } | Self::SetConfigActive { active } => {
            pkt.push(encode_bool(active));
         },
         Self::StopAndRealign | Self::NextPainting => {},
      }
      pkt
   }
}

/// Application state mirrored to every remote after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
   pub model_visible: bool,
   pub noise_active: bool,
   pub active_config: u8,
}

/// A decoded headset → remote message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostMessage {
   /// Connection acknowledged; `count` is the number of manipulation
   /// configs the remote may ask names for.
   Connected { count: u8 },
   State(StateSnapshot),
}

impl HostMessage {
   pub const fn opcode(&self) -> HostOpcode {
      match self {
         Self::Connected { .. } => HostOpcode::Connected,
         Self::State(_) => HostOpcode::State,
      }
   }

   pub fn build(&self) -> Packet {
      let mut pkt = Packet::new();
      pkt.push(self.opcode() as u8);
      match *self {
         Self::Connected { count } => pkt.push(count),
         Self::State(state) => pkt.extend([
            encode_bool(state.model_visible),
            encode_bool(state.noise_active),
            state.active_config,
         ]),
      }
      pkt
   }
}

pub const fn encode_bool(value: bool) -> u8 {
   if value { 1 } else { 0 }
}

pub const fn decode_bool(value: u8) -> bool {
   value == 1
}

/// Builds the two-byte command-channel frame announcing the effective MTU.
///
/// MTUs that do not fit in a byte are announced as 255.
pub fn build_mtu_frame(mtu: u16) -> Packet {
   let announced = u8::try_from(mtu).unwrap_or(u8::MAX);
   Packet::from_slice(&[MTU_MARKER, announced])
}

/// Formats the string-channel reply to a config name request.
pub fn format_name_response(index: u8, name: &str) -> SmolStr {
   format_smolstr!("{index};{name}")
}

/// String and frame budget shared by both link roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
   string_capacity: usize,
}

impl Codec {
   pub const fn new(string_capacity: usize) -> Self {
      Self { string_capacity }
   }

   pub const fn string_capacity(&self) -> usize {
      self.string_capacity
   }

   /// Largest string payload that may be written over a link with the given
   /// effective MTU.
   pub fn string_budget(&self, effective_mtu: u16) -> usize {
      usize::from(effective_mtu).min(self.string_capacity)
   }

   /// Encodes `text` as ASCII and cuts it to the string budget. The tail is
   /// dropped silently.
   pub fn truncate_string(&self, text: &str, effective_mtu: u16) -> Packet {
      let budget = self.string_budget(effective_mtu);
      text
         .chars()
         .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
         .take(budget)
         .collect()
   }

   /// Decodes a string-channel payload. Empty payloads yield `None`.
   pub fn decode_string(&self, data: &[u8]) -> Option<SmolStr> {
      if data.is_empty() {
         return None;
      }
      let text: String = data
         .iter()
         .map(|&b| if b.is_ascii() { b as char } else { '?' })
         .collect();
      Some(text.into())
   }
}

impl fmt::Display for StateSnapshot {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
         f,
         "model={} noise={} config={}",
         self.model_visible, self.noise_active, self.active_config
      )
   }
}
