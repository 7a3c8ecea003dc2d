//! Event handling system for link status updates.
//!
//! This module provides the event infrastructure through which the link
//! reports human-readable status, transport errors, session lifecycle
//! changes and received payloads to the host application.

use std::sync::Arc;

use log::{debug, error, info, warn};
use smol_str::SmolStr;

use crate::{
   bluetooth::{session::PeerSession, transport::Packet},
   remote::protocol::HostMessage,
};

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StatusLevel {
   Info,
   Warning,
}

/// Events that can be emitted by the link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
   /// Progress or warning text for the UI layer.
   Status(StatusLevel, SmolStr),
   /// A transport operation failed. Non-fatal.
   Error(SmolStr),
   SessionReady(PeerSession),
   SessionDisconnected(PeerSession),
   BytesReceived { session: PeerSession, bytes: Packet },
   StringReceived { session: PeerSession, text: SmolStr },
   /// Decoded headset message received by the remote.
   HostMessage(HostMessage),
   AdvertisingStarted,
   /// Every session flagged for teardown is gone.
   TeardownComplete,
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: LinkEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

/// Mirrors status text to the log and the host's event bus.
///
/// This type is cheaply cloneable.
#[derive(Clone)]
pub struct Reporter {
   events: EventSender,
   verbose: bool,
}

impl Reporter {
   pub fn new(events: EventSender, verbose: bool) -> Self {
      Self { events, verbose }
   }

   pub fn set_verbose(&mut self, verbose: bool) {
      self.verbose = verbose;
   }

   pub fn emit(&self, event: LinkEvent) {
      self.events.emit(event);
   }

   pub fn info(&self, msg: impl Into<SmolStr>) {
      let msg = msg.into();
      info!("{msg}");
      self.emit(LinkEvent::Status(StatusLevel::Info, msg));
   }

   /// Status only forwarded to the host when verbose logging is enabled.
   pub fn verbose(&self, msg: impl Into<SmolStr>) {
      let msg = msg.into();
      debug!("{msg}");
      if self.verbose {
         self.emit(LinkEvent::Status(StatusLevel::Info, msg));
      }
   }

   pub fn warning(&self, msg: impl Into<SmolStr>) {
      let msg = msg.into();
      warn!("{msg}");
      self.emit(LinkEvent::Status(StatusLevel::Warning, msg));
   }

   pub fn error(&self, msg: impl Into<SmolStr>) {
      let msg = msg.into();
      error!("{msg}");
      self.emit(LinkEvent::Error(msg));
   }
}
