//! Pairing core for a headset and its handheld BLE remotes.
//!
//! The headset scans for remotes advertising `"<network>:<client>"`,
//! negotiates an MTU with each of them and exchanges short command frames
//! and strings over three GATT characteristics. The remote advertises,
//! hosts the characteristics and learns its byte budget from the headset.
//!
//! Radio access is abstracted behind [`Transport`]; platform adapters feed
//! their callbacks back through [`TransportEvents`].

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod event;
pub mod remote;

#[cfg(test)]
mod testing;

pub use bluetooth::{
   channel::{Channel, ChannelId},
   machine::{ConnectionMachine, LinkState},
   manager::LinkManager,
   peripheral::PeripheralLink,
   registry::SharedRegistry,
   session::{PeerSession, Role, SessionState},
   transport::{Packet, Properties, Transport, TransportEvent, TransportEvents},
};
pub use config::Config;
pub use error::{LinkError, Result};
pub use event::{EventBus, EventSender, LinkEvent, StatusLevel};
pub use remote::{
   bridge::{ApplicationBridge, Handled, Outbox, RemoteHandler},
   parser::ProtoError,
   protocol::{Codec, HostMessage, RemoteCommand, StateSnapshot},
   study::StudyController,
};
