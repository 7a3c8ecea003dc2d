//! Glue between decoded remote commands and the headset application.

use log::{debug, warn};
use smol_str::SmolStr;

use crate::{
   bluetooth::{registry::SharedRegistry, session::PeerSession},
   error::Result,
   remote::{
      parser::parse_remote_command,
      protocol::{
         Codec, DEFAULT_EFFECTIVE_MTU, HostMessage, RemoteCommand, StateSnapshot,
         format_name_response,
      },
   },
};

/// Write side of a link, addressed by session address.
pub trait Outbox {
   /// Writes a frame on the sample channel.
   fn send_bytes(&mut self, address: &str, bytes: &[u8]) -> Result<()>;
   /// Writes text on the string channel, truncated to the session budget.
   fn send_string(&mut self, address: &str, text: &str) -> Result<()>;
}

/// Outcome of a state-changing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
   Unchanged,
   /// Application state changed; every remote gets a fresh snapshot.
   StateChanged,
}

/// Application side of the remote protocol, one method per command.
pub trait RemoteHandler {
   /// Display name of the manipulation config at `index`.
   fn config_name(&self, index: u8) -> SmolStr;
   /// Number of manipulation configs a remote may ask names for.
   fn config_count(&self) -> u8;
   fn snapshot(&self) -> StateSnapshot;

   fn set_model_visible(&mut self, visible: bool, fade: bool) -> Handled;
   fn set_noise_active(&mut self, active: bool) -> Handled;
   fn stop_and_realign(&mut self) -> Handled;
   fn select_config(&mut self, index: u8) -> Handled;
   fn set_config_active(&mut self, active: bool) -> Handled;
   fn next_painting(&mut self) -> Handled;

   /// Free-form text received from a remote.
   fn on_text(&mut self, session: &PeerSession, text: &str) {
      debug!("Text from {}: {text}", session.name());
   }
}

pub struct ApplicationBridge<H> {
   registry: SharedRegistry,
   codec: Codec,
   handler: H,
}

impl<H: RemoteHandler> ApplicationBridge<H> {
   pub const fn new(registry: SharedRegistry, codec: Codec, handler: H) -> Self {
      Self {
         registry,
         codec,
         handler,
      }
   }

   pub const fn handler(&self) -> &H {
      &self.handler
   }

   pub const fn handler_mut(&mut self) -> &mut H {
      &mut self.handler
   }

   /// Greets a freshly paired remote with the config count.
   pub fn on_session_ready(&mut self, session: &PeerSession, out: &mut dyn Outbox) {
      let msg = HostMessage::Connected {
         count: self.handler.config_count(),
      };
      if let Err(e) = out.send_bytes(session.address(), &msg.build()) {
         warn!("Failed to greet {}: {e}", session.name());
      }
   }

   /// Decodes one sample-channel frame and dispatches it to the handler.
   pub fn on_bytes(&mut self, session: &PeerSession, bytes: &[u8], out: &mut dyn Outbox) {
      let command = match parse_remote_command(bytes) {
         Ok(command) => command,
         Err(e) => {
            debug!(
               "Ignoring frame from {}: {e} ({})",
               session.name(),
               hex::encode(bytes)
            );
            return;
         },
      };
      debug!("{}: {command:?}", session.name());

      let handled = match command {
         RemoteCommand::RequestConfigName { index } => {
            let name = self.handler.config_name(index);
            let reply = self.fit_reply(session, &format_name_response(index, &name));
            if let Err(e) = out.send_string(session.address(), &reply) {
               warn!("Failed to send config name to {}: {e}", session.name());
            }
            Handled::Unchanged
         },
         RemoteCommand::SetModelVisible { visible, fade } => {
            self.handler.set_model_visible(visible, fade)
         },
         RemoteCommand::SetNoiseActive { active } => self.handler.set_noise_active(active),
         RemoteCommand::StopAndRealign => self.handler.stop_and_realign(),
         RemoteCommand::SelectConfig { index } => self.handler.select_config(index),
         RemoteCommand::SetConfigActive { active } => self.handler.set_config_active(active),
         RemoteCommand::NextPainting => self.handler.next_painting(),
      };

      if handled == Handled::StateChanged {
         self.broadcast_state_snapshot(out);
      }
   }

   /// Cuts a reply to what the session's string channel can carry.
   fn fit_reply(&self, session: &PeerSession, reply: &str) -> SmolStr {
      let mtu = session.mtu().unwrap_or(DEFAULT_EFFECTIVE_MTU);
      let frame = self.codec.truncate_string(reply, mtu);
      if frame.len() < reply.chars().count() {
         debug!(
            "Reply to {} cut to {} bytes: {reply}",
            session.name(),
            frame.len()
         );
      }
      self.codec.decode_string(&frame).unwrap_or_default()
   }

   pub fn on_text(&mut self, session: &PeerSession, text: &str) {
      if !text.is_empty() {
         self.handler.on_text(session, text);
      }
   }

   /// Sends the current application state to every ready remote. Returns
   /// the number of writes issued.
   pub fn broadcast_state_snapshot(&mut self, out: &mut dyn Outbox) -> usize {
      let frame = HostMessage::State(self.handler.snapshot()).build();
      let mut sent = 0;
      for session in self.registry.ready() {
         match out.send_bytes(session.address(), &frame) {
            Ok(()) => sent += 1,
            Err(e) => warn!("Failed to send state to {}: {e}", session.name()),
         }
      }
      debug!("State broadcast to {sent} remotes: {}", hex::encode(&frame));
      sent
   }
}
