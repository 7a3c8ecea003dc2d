//! Logical channels of a link and their GATT identifiers.

use std::fmt;

use uuid::Uuid;

/// Service hosting every characteristic of the remote.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x37200001_7638_4216_b629_96ad40f79aa1);
pub const COMMAND_CHARACTERISTIC_UUID: Uuid =
   Uuid::from_u128(0x37200002_7638_4216_b629_96ad40f79aa1);
pub const SAMPLE_CHARACTERISTIC_UUID: Uuid =
   Uuid::from_u128(0x37200003_7638_4216_b629_96ad40f79aa1);
pub const STRING_CHARACTERISTIC_UUID: Uuid =
   Uuid::from_u128(0x1cf3f7da_39e3_4d60_8937_58f954be82e2);

/// Characteristic capacity of the fixed-size byte channels.
pub const BYTE_CHANNEL_CAPACITY: usize = 5;

/// `(service, characteristic)` pair addressing one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
   pub service: Uuid,
   pub characteristic: Uuid,
}

impl fmt::Display for ChannelId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}/{}", self.service, self.characteristic)
   }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
pub enum Channel {
   /// One-shot channel used only for the MTU push.
   Command = 0,
   /// Opcode-framed byte messages.
   Sample = 1,
   /// ASCII text, e.g. config names.
   String = 2,
}

impl Channel {
   pub const ALL: [Self; 3] = [Self::Command, Self::Sample, Self::String];

   /// Channels that stay subscribed for the lifetime of a session, in
   /// subscription order.
   pub const LONG_LIVED: [Self; 2] = [Self::Sample, Self::String];

   pub const fn id(self) -> ChannelId {
      let characteristic = match self {
         Self::Command => COMMAND_CHARACTERISTIC_UUID,
         Self::Sample => SAMPLE_CHARACTERISTIC_UUID,
         Self::String => STRING_CHARACTERISTIC_UUID,
      };
      ChannelId {
         service: SERVICE_UUID,
         characteristic,
      }
   }

   /// Maps a discovered characteristic back to its channel. Unknown
   /// characteristics yield `None`.
   pub fn from_id(id: ChannelId) -> Option<Self> {
      Self::ALL.into_iter().find(|c| c.id() == id)
   }

   /// Looks a channel up by characteristic alone; peripherals only see the
   /// characteristic of a write.
   pub fn from_characteristic(characteristic: Uuid) -> Option<Self> {
      Self::ALL
         .into_iter()
         .find(|c| c.id().characteristic == characteristic)
   }

   pub const fn is_long_lived(self) -> bool {
      !matches!(self, Self::Command)
   }

   const fn bit(self) -> u8 {
      1 << self as u8
   }
}

/// Per-session discovery and subscription flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSet {
   found: u8,
   subscribed: u8,
}

impl ChannelSet {
   pub const fn new() -> Self {
      Self {
         found: 0,
         subscribed: 0,
      }
   }

   /// Marks a channel as found. Returns `true` if it was not found before.
   pub fn mark_found(&mut self, channel: Channel) -> bool {
      let prev = self.found;
      self.found |= channel.bit();
      prev != self.found
   }

   pub const fn is_found(&self, channel: Channel) -> bool {
      self.found & channel.bit() != 0
   }

   /// Every long-lived channel has been discovered.
   pub fn all_found(&self) -> bool {
      Channel::LONG_LIVED.iter().all(|&c| self.is_found(c))
   }

   /// Records a subscription confirmation. Duplicate confirmations for the
   /// same channel are not counted twice.
   pub fn mark_subscribed(&mut self, channel: Channel) -> bool {
      let prev = self.subscribed;
      self.subscribed |= channel.bit();
      prev != self.subscribed
   }

   pub const fn is_subscribed(&self, channel: Channel) -> bool {
      self.subscribed & channel.bit() != 0
   }

   pub const fn subscribed_count(&self) -> usize {
      self.subscribed.count_ones() as usize
   }

   /// Next long-lived channel still awaiting a subscription.
   pub fn next_unsubscribed(&self) -> Option<Channel> {
      Channel::LONG_LIVED
         .into_iter()
         .find(|&c| !self.is_subscribed(c))
   }

   /// Readiness predicate: all long-lived channels found and at least
   /// `total channels - 1` subscriptions confirmed, the command channel
   /// being the excluded one.
   pub fn is_ready(&self) -> bool {
      self.all_found() && self.subscribed_count() >= Channel::ALL.len() - 1
   }

   pub fn reset_subscriptions(&mut self) {
      self.subscribed = 0;
   }
}
