//! Per-peer session records.

use serde::{Deserialize, Serialize};
use serde_json::json;
use smol_str::SmolStr;

use crate::bluetooth::channel::ChannelSet;

/// Which end of the link a session is tracked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
   /// Tracked by the headset; describes one remote.
   Server,
   /// Tracked by the remote; describes the headset.
   Client,
}

#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
   Discovered,
   Connecting,
   /// All long-lived channels found; negotiation in progress.
   Connected,
   Ready,
   Disconnecting,
}

/// One logical connection endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
   address: SmolStr,
   name: SmolStr,
   role: Role,
   pub(crate) state: SessionState,
   pub(crate) mtu: Option<u16>,
   pub(crate) channels: ChannelSet,
   pub(crate) teardown: bool,
   pub(crate) transport_connected: bool,
}

impl PeerSession {
   pub fn new(address: impl Into<SmolStr>, name: impl Into<SmolStr>, role: Role) -> Self {
      Self {
         address: address.into(),
         name: name.into(),
         role,
         state: SessionState::Discovered,
         mtu: None,
         channels: ChannelSet::new(),
         teardown: false,
         transport_connected: false,
      }
   }

   pub fn address(&self) -> &SmolStr {
      &self.address
   }

   /// Advertised name, network prefix included.
   pub fn name(&self) -> &SmolStr {
      &self.name
   }

   /// Advertised name without the `"<network>:"` prefix.
   pub fn client_name(&self) -> &str {
      self
         .name
         .split_once(':')
         .map_or(self.name.as_str(), |(_, client)| client)
   }

   pub const fn role(&self) -> Role {
      self.role
   }

   pub const fn state(&self) -> SessionState {
      self.state
   }

   pub fn is_ready(&self) -> bool {
      self.state == SessionState::Ready
   }

   /// The connection target has found all of its long-lived channels.
   pub fn is_connected(&self) -> bool {
      matches!(self.state, SessionState::Connected | SessionState::Ready)
   }

   /// Effective MTU, protocol overhead already subtracted.
   pub const fn mtu(&self) -> Option<u16> {
      self.mtu
   }

   pub const fn channels(&self) -> &ChannelSet {
      &self.channels
   }

   pub const fn is_flagged_for_teardown(&self) -> bool {
      self.teardown
   }

   pub const fn is_transport_connected(&self) -> bool {
      self.transport_connected
   }

   /// Stores a newly negotiated effective MTU. A smaller value than the one
   /// already negotiated is ignored; returns the MTU in effect.
   pub fn apply_mtu(&mut self, effective: u16) -> u16 {
      let mtu = self.mtu.map_or(effective, |current| current.max(effective));
      self.mtu = Some(mtu);
      mtu
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
          "address": self.address.as_str(),
          "name": self.name.as_str(),
          "role": self.role.to_string(),
          "state": self.state.to_string(),
          "connected": self.is_connected(),
          "mtu": self.mtu,
          "subscribed_channels": self.channels.subscribed_count(),
      })
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_client_name() {
      let session = PeerSession::new("AA:BB", "SwitchAR_HMD:Remote0", Role::Server);
      assert_eq!(session.client_name(), "Remote0");

      let bare = PeerSession::new("AA:BB", "Remote0", Role::Server);
      assert_eq!(bare.client_name(), "Remote0");
   }

   #[test]
   fn test_mtu_never_shrinks() {
      let mut session = PeerSession::new("AA:BB", "Remote0", Role::Server);
      assert_eq!(session.mtu(), None);
      assert_eq!(session.apply_mtu(182), 182);
      assert_eq!(session.apply_mtu(20), 182);
      assert_eq!(session.apply_mtu(244), 244);
      assert_eq!(session.mtu(), Some(244));
   }

   #[test]
   fn test_to_json() {
      let mut session = PeerSession::new("AA:BB", "SwitchAR_HMD:Remote0", Role::Server);
      session.apply_mtu(182);
      let json = session.to_json();
      assert_eq!(json["state"], "discovered");
      assert_eq!(json["role"], "server");
      assert_eq!(json["mtu"], 182);
      assert_eq!(json["connected"], false);
   }
}
