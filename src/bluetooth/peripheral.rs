//! Remote (peripheral) side of the link.
//!
//! The remote hosts the three characteristics, advertises itself as
//! `"<network>:<client>"` and waits for a headset to connect. The headset
//! announces the negotiated MTU on the command channel, which is the
//! remote's signal that the link is usable.

use log::debug;
use smol_str::format_smolstr;

use crate::{
   bluetooth::{
      channel::{BYTE_CHANNEL_CAPACITY, Channel},
      registry::SharedRegistry,
      session::{PeerSession, Role, SessionState},
      transport::{Properties, Transport, TransportEvent},
   },
   config::Config,
   error::{LinkError, Result},
   event::{LinkEvent, Reporter},
   remote::{
      parser::{parse_host_message, parse_mtu_frame},
      protocol::{Codec, DEFAULT_EFFECTIVE_MTU, RemoteCommand},
   },
};

pub struct PeripheralLink {
   config: Config,
   codec: Codec,
   transport: Box<dyn Transport>,
   registry: SharedRegistry,
   reporter: Reporter,
   advertising: bool,
}

impl PeripheralLink {
   pub fn new(config: Config, transport: Box<dyn Transport>, reporter: Reporter) -> Self {
      Self {
         codec: Codec::new(config.string_capacity),
         config,
         transport,
         registry: SharedRegistry::new(Role::Client),
         reporter,
         advertising: false,
      }
   }

   pub fn registry(&self) -> &SharedRegistry {
      &self.registry
   }

   pub const fn is_advertising(&self) -> bool {
      self.advertising
   }

   /// The headset session, once it announced its MTU.
   pub fn session(&self) -> Option<PeerSession> {
      self.registry.list().into_iter().next()
   }

   pub fn is_ready(&self) -> bool {
      self.session().is_some_and(|s| s.is_ready())
   }

   /// Creates the characteristics and starts advertising.
   pub fn start(&mut self) -> Result<()> {
      if self.advertising {
         return Err(LinkError::AlreadyRunning);
      }

      for channel in Channel::ALL {
         let capacity = match channel {
            Channel::String => self.config.string_capacity,
            Channel::Command | Channel::Sample => BYTE_CHANNEL_CAPACITY,
         };
         self
            .transport
            .create_characteristic(channel.id(), Properties::REMOTE, capacity)?;
      }

      let name = self.config.advertised_name();
      self.transport.start_advertising(&name)?;
      self.advertising = true;
      self.reporter.info(format_smolstr!("Advertising as {name}"));
      Ok(())
   }

   pub fn stop(&mut self) -> Result<()> {
      if !self.advertising {
         return Ok(());
      }
      self.advertising = false;
      if let Some(session) = self.registry.with(|r| {
         let session = r.list().into_iter().next();
         r.clear();
         session
      }) {
         self.reporter.emit(LinkEvent::SessionDisconnected(session));
      }
      self.reporter.info("Stopped advertising");
      self.transport.stop_advertising()
   }

   pub fn handle_event(&mut self, event: TransportEvent) {
      match event {
         TransportEvent::AdvertisingStarted => {
            self.reporter.verbose("Advertising started");
            self.reporter.emit(LinkEvent::AdvertisingStarted);
         },
         TransportEvent::CharacteristicWritten { channel, bytes } => {
            debug!("Write on {channel}: {}", hex::encode(&bytes));
            match Channel::from_id(channel) {
               Some(Channel::Command) => {
                  if let Err(e) = self.on_command(&bytes) {
                     debug!("Ignoring command frame: {e}");
                  }
               },
               Some(Channel::Sample) => match parse_host_message(&bytes) {
                  Ok(msg) => self.reporter.emit(LinkEvent::HostMessage(msg)),
                  Err(e) => debug!("Ignoring host frame: {e}"),
               },
               Some(Channel::String) => self.on_string(&bytes),
               None => debug!("Write on unknown characteristic {channel}"),
            }
         },
         TransportEvent::Error(msg) => self.reporter.error(msg),
         other => debug!("Ignoring central event in peripheral role: {other:?}"),
      }
   }

   fn on_command(&mut self, bytes: &[u8]) -> Result<()> {
      let mtu = parse_mtu_frame(bytes)?;

      let network = self.config.server_name.clone();
      let session = self.registry.with(|r| {
         r.register(PeerSession::new(network.as_str(), network.as_str(), Role::Client));
         let session = r.lookup_mut(&network)?;
         let mtu = session.apply_mtu(mtu);
         session.transport_connected = true;
         session.state = SessionState::Ready;
         Some((mtu, session.clone()))
      });
      let Some((mtu, session)) = session else {
         return Ok(());
      };

      self.reporter.info(format_smolstr!("MTU set to {mtu}"));
      if usize::from(mtu) < self.codec.string_capacity() {
         self.reporter.warning(format_smolstr!(
            "MTU smaller than the string characteristic size (MTU of {mtu} vs. {})",
            self.codec.string_capacity()
         ));
      }
      self.reporter.emit(LinkEvent::SessionReady(session));
      Ok(())
   }

   fn on_string(&mut self, bytes: &[u8]) {
      let Some(text) = self.codec.decode_string(bytes) else {
         return;
      };
      let session = self.session().unwrap_or_else(|| {
         let network = self.config.server_name.as_str();
         PeerSession::new(network, network, Role::Client)
      });
      self
         .reporter
         .emit(LinkEvent::StringReceived { session, text });
   }

   fn ready_session(&self) -> Result<PeerSession> {
      self
         .session()
         .filter(PeerSession::is_ready)
         .ok_or_else(|| LinkError::SessionNotReady(self.config.server_name.as_str().into()))
   }

   /// Publishes a command frame on the sample characteristic.
   pub fn send_command(&mut self, command: &RemoteCommand) -> Result<()> {
      self.ready_session()?;
      let frame = command.build();
      debug!("→ {command:?}: {}", hex::encode(&frame));
      self
         .transport
         .update_characteristic(Channel::Sample.id(), &frame)
   }

   /// Publishes text on the string characteristic, truncated to the MTU.
   pub fn send_string(&mut self, text: &str) -> Result<()> {
      let session = self.ready_session()?;
      let mtu = session.mtu().unwrap_or(DEFAULT_EFFECTIVE_MTU);
      let bytes = self.codec.truncate_string(text, mtu);
      self.reporter.verbose(format_smolstr!("Writing string: {text}"));
      self
         .transport
         .update_characteristic(Channel::String.id(), &bytes)
   }
}
