//! Contract of the native BLE transport the link is driven through.
//!
//! The transport itself is not implemented here. Every operation is
//! non-blocking: it returns as soon as the native call has been issued, and
//! its completion arrives later as a [`TransportEvent`] pushed through a
//! [`TransportEvents`] sink.

use smallvec::SmallVec;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{bluetooth::channel::ChannelId, error::Result};

pub type Packet = SmallVec<[u8; 32]>;

/// GATT characteristic property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Properties(u8);

impl Properties {
   pub const BROADCAST: Self = Self(0x01);
   pub const READ: Self = Self(0x02);
   pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
   pub const WRITE: Self = Self(0x08);
   pub const NOTIFY: Self = Self(0x10);

   /// Properties of every characteristic the remote exposes.
   pub const REMOTE: Self = Self(
      Self::READ.0
         | Self::WRITE.0
         | Self::NOTIFY.0
         | Self::BROADCAST.0
         | Self::WRITE_WITHOUT_RESPONSE.0,
   );

   pub const fn bits(self) -> u8 {
      self.0
   }

   pub const fn contains(self, other: Self) -> bool {
      self.0 & other.0 == other.0
   }
}

/// Operations the link issues against the native transport.
pub trait Transport: Send {
   /// Starts a scan; found peers are reported as [`TransportEvent::PeerFound`].
   fn scan(&mut self, name_prefix: &str) -> Result<()>;

   fn stop_scan(&mut self) -> Result<()>;

   fn connect(&mut self, address: &str) -> Result<()>;

   fn request_mtu(&mut self, address: &str, desired: u16) -> Result<()>;

   /// Writes with response; confirmed by [`TransportEvent::Written`].
   fn write(&mut self, address: &str, channel: ChannelId, bytes: &[u8]) -> Result<()>;

   fn subscribe(&mut self, address: &str, channel: ChannelId) -> Result<()>;

   fn disconnect(&mut self, address: &str) -> Result<()>;

   // Peripheral role

   fn start_advertising(&mut self, local_name: &str) -> Result<()>;

   fn stop_advertising(&mut self) -> Result<()>;

   fn create_characteristic(
      &mut self,
      channel: ChannelId,
      properties: Properties,
      capacity: usize,
   ) -> Result<()>;

   /// Replaces a local characteristic's value and notifies subscribers.
   fn update_characteristic(&mut self, channel: ChannelId, bytes: &[u8]) -> Result<()>;
}

/// Completions and notifications reported by the native transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
   PeerFound {
      address: SmolStr,
      name: SmolStr,
   },
   Connected {
      address: SmolStr,
   },
   ServiceFound {
      address: SmolStr,
      service: Uuid,
   },
   CharacteristicFound {
      address: SmolStr,
      channel: ChannelId,
   },
   Disconnected {
      address: SmolStr,
   },
   /// Raw negotiated MTU, protocol overhead included.
   MtuChanged {
      address: SmolStr,
      mtu: u16,
   },
   Written {
      address: SmolStr,
      channel: ChannelId,
   },
   Subscribed {
      address: SmolStr,
      channel: ChannelId,
   },
   Data {
      address: SmolStr,
      channel: ChannelId,
      bytes: Packet,
   },
   AdvertisingStarted,
   /// A central wrote to one of our local characteristics.
   CharacteristicWritten {
      channel: ChannelId,
      bytes: Packet,
   },
   Error(SmolStr),
}

/// Sink handed to transport adapters for reporting [`TransportEvent`]s.
///
/// This type is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct TransportEvents {
   tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
   pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
      let (tx, rx) = mpsc::unbounded_channel();
      (Self { tx }, rx)
   }

   /// Reports an event. Returns `false` once the link has shut down.
   pub fn emit(&self, event: TransportEvent) -> bool {
      self.tx.send(event).is_ok()
   }

   pub fn is_closed(&self) -> bool {
      self.tx.is_closed()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_remote_properties() {
      assert!(Properties::REMOTE.contains(Properties::WRITE));
      assert!(Properties::REMOTE.contains(Properties::NOTIFY));
      assert_eq!(Properties::REMOTE.bits(), 0x1f);
      assert!(!Properties::READ.contains(Properties::WRITE));
   }

   #[test]
   fn test_events_close_with_receiver() {
      let (events, rx) = TransportEvents::channel();
      assert!(events.emit(TransportEvent::AdvertisingStarted));
      drop(rx);
      assert!(events.is_closed());
      assert!(!events.emit(TransportEvent::AdvertisingStarted));
   }
}
