//! Connection lifecycle state machine for the headset (central) role.
//!
//! The machine pairs with remotes one at a time: it scans for peers
//! advertising the configured network name, connects to the first
//! unconnected one, negotiates the MTU, pushes the effective MTU to the
//! remote, subscribes to the long-lived channels and finally reports the
//! session as ready. Teardown walks every flagged session through a
//! disconnect with a timeout.
//!
//! Nothing here blocks. Transport operations are fire-and-forget and their
//! completions arrive through [`ConnectionMachine::handle_event`]; the
//! periodic [`ConnectionMachine::tick`] evaluates a state only after its
//! dwell time has elapsed, so a pending native call is never re-issued.

use std::time::{Duration, Instant};

use log::debug;
use smol_str::{SmolStr, format_smolstr};

use crate::{
   bluetooth::{
      channel::Channel,
      registry::SharedRegistry,
      session::{PeerSession, Role, SessionState},
      transport::{Packet, Transport, TransportEvent},
   },
   config::Config,
   error::{LinkError, Result},
   event::{LinkEvent, Reporter},
   remote::{
      bridge::Outbox,
      protocol::{Codec, DEFAULT_EFFECTIVE_MTU, PROTOCOL_OVERHEAD, build_mtu_frame},
   },
};

/// Dwell before the first scan after starting
const START_DELAY: Duration = Duration::from_millis(100);
/// Dwell between stopping and restarting a stalled scan
const RESCAN_DELAY: Duration = Duration::from_millis(10);
/// Dwell after a new peer was found before picking a candidate
const CANDIDATE_DELAY: Duration = Duration::from_millis(10);
/// Dwell before issuing a connect
const CONNECT_DELAY: Duration = Duration::from_millis(100);
/// Settling time between channel discovery and the MTU request
const MTU_DELAY: Duration = Duration::from_secs(2);
/// Dwell before pushing the MTU to the remote
const PUSH_DELAY: Duration = Duration::from_millis(10);
/// Dwell before subscribing after the MTU push was confirmed
const SUBSCRIBE_DELAY: Duration = Duration::from_millis(50);
/// Dwell in `Ready` before looking for the next candidate
const READY_DELAY: Duration = Duration::from_millis(100);
/// Dwell before handling the next session flagged for teardown
const DISCONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkState {
   Idle,
   Scanning,
   RestartScan,
   CandidateFound,
   Connecting,
   NegotiatingMtu,
   PushingMtuToPeer,
   SubscribingChannels,
   Ready,
   Disconnect,
   Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
   /// Evaluate the current state once the deadline passes.
   Dwell(Instant),
   /// A transport callback is outstanding; recover if it has not arrived
   /// by the deadline.
   Await(Instant),
}

/// Headset-side connection state machine.
pub struct ConnectionMachine {
   config: Config,
   codec: Codec,
   transport: Box<dyn Transport>,
   registry: SharedRegistry,
   reporter: Reporter,

   state: LinkState,
   timer: Option<Timer>,
   /// Session currently being negotiated; at most one at a time.
   connecting: Option<SmolStr>,
   /// Session whose disconnect is pending.
   disconnecting: Option<SmolStr>,
   running: bool,
   stopping: bool,
}

impl ConnectionMachine {
   pub fn new(
      config: Config,
      transport: Box<dyn Transport>,
      registry: SharedRegistry,
      reporter: Reporter,
   ) -> Self {
      debug_assert_eq!(registry.with(|r| r.role()), Role::Server);
      Self {
         codec: Codec::new(config.string_capacity),
         config,
         transport,
         registry,
         reporter,
         state: LinkState::Idle,
         timer: None,
         connecting: None,
         disconnecting: None,
         running: false,
         stopping: false,
      }
   }

   pub const fn state(&self) -> LinkState {
      self.state
   }

   pub const fn is_running(&self) -> bool {
      self.running
   }

   pub const fn is_stopping(&self) -> bool {
      self.stopping
   }

   pub fn registry(&self) -> &SharedRegistry {
      &self.registry
   }

   pub const fn codec(&self) -> Codec {
      self.codec
   }

   /// Address of the session currently being negotiated.
   pub fn connecting(&self) -> Option<&SmolStr> {
      self.connecting.as_ref()
   }

   pub fn set_verbose(&mut self, verbose: bool) {
      self.config.verbose = verbose;
      self.reporter.set_verbose(verbose);
   }

   /// Starts scanning for remotes advertising the configured network name.
   pub fn start_server(&mut self, now: Instant) -> Result<()> {
      if self.running {
         self.reporter.warning("Server already running");
         return Err(LinkError::AlreadyRunning);
      }

      self.registry.with(|r| r.clear());
      self.connecting = None;
      self.disconnecting = None;
      self.running = true;
      self.stopping = false;

      self
         .reporter
         .info(format_smolstr!("Server network: {}", self.config.server_name));
      self.set_state(LinkState::Scanning, START_DELAY, now);
      Ok(())
   }

   /// Stops scanning and tears every session down. Returns `false` if the
   /// server was not running, in which case there is nothing to wait for.
   pub fn stop_server(&mut self, now: Instant) -> bool {
      if !self.running {
         return false;
      }
      if self.stopping {
         return true;
      }

      self.stopping = true;
      self.connecting = None;
      if let Err(e) = self.transport.stop_scan() {
         self.reporter.error(format_smolstr!("Failed to stop scan: {e}"));
      }
      self.registry.with(|r| r.mark_all_for_teardown());
      self.reporter.info("Stopping server");
      self.set_state(LinkState::Disconnect, DISCONNECT_DELAY, now);
      true
   }

   /// Flags one session for teardown and starts the disconnect path.
   pub fn disconnect_session(&mut self, address: &str, now: Instant) -> Result<()> {
      if !self.registry.with(|r| r.mark_for_teardown(address)) {
         return Err(LinkError::SessionNotFound(address.into()));
      }
      if self.connecting.as_deref() == Some(address) {
         self.connecting = None;
      }
      // an unrelated negotiation finishes first; candidate selection then
      // picks up the flagged session
      let busy = self.connecting.is_some()
         || matches!(self.state, LinkState::Disconnect | LinkState::Disconnecting);
      if !busy {
         self.set_state(LinkState::Disconnect, DISCONNECT_DELAY, now);
      }
      Ok(())
   }

   /// Polling step; evaluates the current state once its timer expired.
   pub fn tick(&mut self, now: Instant) {
      match self.timer {
         Some(Timer::Dwell(due)) if now >= due => {
            self.timer = None;
            self.step(now);
         },
         Some(Timer::Await(due)) if now >= due => {
            self.timer = None;
            self.on_timeout(now);
         },
         _ => {},
      }
   }

   fn set_state(&mut self, state: LinkState, delay: Duration, now: Instant) {
      self.state = state;
      self.timer = Some(Timer::Dwell(now + delay));
   }

   /// Parks in `state` with no timer; only an event moves the machine on.
   fn settle(&mut self, state: LinkState) {
      self.state = state;
      self.timer = None;
   }

   fn await_callback(&mut self, timeout: Duration, now: Instant) {
      self.timer = Some(Timer::Await(now + timeout));
   }

   fn step(&mut self, now: Instant) {
      match self.state {
         LinkState::Idle | LinkState::CandidateFound | LinkState::Ready => {
            self.select_candidate(now);
         },
         LinkState::Scanning => self.start_scan(now),
         LinkState::RestartScan => {
            self.reporter.info("Restarting scanning");
            if let Err(e) = self.transport.stop_scan() {
               self.reporter.error(format_smolstr!("Failed to stop scan: {e}"));
            }
            self.set_state(LinkState::Scanning, RESCAN_DELAY, now);
         },
         LinkState::Connecting => self.connect_target(now),
         LinkState::NegotiatingMtu => self.request_mtu(now),
         LinkState::PushingMtuToPeer => self.push_mtu(now),
         LinkState::SubscribingChannels => self.subscribe_next(now),
         LinkState::Disconnect => self.disconnect_next(now),
         LinkState::Disconnecting => {},
      }
   }

   fn on_timeout(&mut self, now: Instant) {
      match self.state {
         LinkState::NegotiatingMtu | LinkState::PushingMtuToPeer | LinkState::SubscribingChannels => {
            let Some(address) = self.connecting.take() else {
               self.settle(LinkState::Idle);
               return;
            };
            self.reporter.error(format_smolstr!(
               "Timed out in {} with {address}, dropping connection",
               self.state
            ));
            self.registry.with(|r| r.mark_for_teardown(&address));
            self.set_state(LinkState::Disconnect, DISCONNECT_DELAY, now);
         },
         LinkState::Disconnecting => {
            if let Some(address) = self.disconnecting.take() {
               self
                  .reporter
                  .warning(format_smolstr!("Timed out disconnecting from {address}"));
               self.remove_session(&address);
            }
            self.set_state(LinkState::Disconnect, DISCONNECT_DELAY, now);
         },
         _ => {},
      }
   }

   // === Pairing ===

   fn select_candidate(&mut self, now: Instant) {
      if !self.running || self.stopping || self.connecting.is_some() {
         self.settle(LinkState::Idle);
         return;
      }

      if self.registry.with(|r| r.next_teardown().is_some()) {
         self.set_state(LinkState::Disconnect, DISCONNECT_DELAY, now);
         return;
      }

      self.reporter.verbose("Can connect");
      let candidate = self.registry.with(|r| {
         r.first_unconnected()
            .map(|s| (s.address().clone(), s.name().clone()))
      });
      match candidate {
         Some((address, name)) => {
            self.reporter.verbose(format_smolstr!("Need connect: {name}"));
            self.connecting = Some(address);
            self.set_state(LinkState::Connecting, CONNECT_DELAY, now);
         },
         None => self.settle(LinkState::Idle),
      }
   }

   fn start_scan(&mut self, now: Instant) {
      if let Err(e) = self.transport.scan(&self.config.server_name) {
         self.reporter.error(format_smolstr!("Failed to start scan: {e}"));
      }
      // peers found while the scan was stopped are picked up now
      let pending = self.connecting.is_none()
         && self.registry.with(|r| r.first_unconnected().is_some());
      if pending {
         self.set_state(LinkState::CandidateFound, CANDIDATE_DELAY, now);
      } else {
         self.set_state(LinkState::RestartScan, self.config.scan_restart(), now);
      }
   }

   fn connect_target(&mut self, now: Instant) {
      let Some(address) = self.connecting.clone() else {
         self.select_candidate(now);
         return;
      };
      let name = self.registry.with(|r| {
         r.lookup_mut(&address).map(|s| {
            s.state = SessionState::Connecting;
            s.channels.reset_subscriptions();
            s.name().clone()
         })
      });
      let Some(name) = name else {
         self.connecting = None;
         self.select_candidate(now);
         return;
      };

      self
         .reporter
         .info(format_smolstr!("Connecting to {name}, {address}..."));
      self.settle(LinkState::Connecting);
      if let Err(e) = self.transport.connect(&address) {
         self
            .reporter
            .error(format_smolstr!("Failed to connect to {address}: {e}"));
      }
   }

   fn request_mtu(&mut self, now: Instant) {
      let Some(address) = self.connecting.clone() else {
         self.select_candidate(now);
         return;
      };
      self.reporter.verbose("Request MTU");
      self.await_callback(self.config.negotiation_timeout(), now);
      if let Err(e) = self.transport.request_mtu(&address, self.config.desired_mtu) {
         self.reporter.error(format_smolstr!("Failed to request MTU: {e}"));
      }
   }

   fn push_mtu(&mut self, now: Instant) {
      let Some(address) = self.connecting.clone() else {
         self.select_candidate(now);
         return;
      };
      let Some(mtu) = self.registry.lookup(&address).and_then(|s| s.mtu()) else {
         self.select_candidate(now);
         return;
      };

      self.reporter.verbose("Writing MTU to client");
      self.await_callback(self.config.negotiation_timeout(), now);
      let frame = build_mtu_frame(mtu);
      if let Err(e) = self.transport.write(&address, Channel::Command.id(), &frame) {
         self.reporter.error(format_smolstr!("Failed to write MTU: {e}"));
      }
   }

   fn subscribe_next(&mut self, now: Instant) {
      let Some(address) = self.connecting.clone() else {
         self.select_candidate(now);
         return;
      };
      let next = self
         .registry
         .lookup(&address)
         .and_then(|s| s.channels().next_unsubscribed());
      let Some(channel) = next else {
         return;
      };

      self
         .reporter
         .verbose(format_smolstr!("Subscribe to {channel} channel of {address}"));
      self.await_callback(self.config.negotiation_timeout(), now);
      if let Err(e) = self.transport.subscribe(&address, channel.id()) {
         self
            .reporter
            .error(format_smolstr!("Failed to subscribe to {channel}: {e}"));
      }
   }

   // === Teardown ===

   fn disconnect_next(&mut self, now: Instant) {
      let next = self.registry.with(|r| {
         r.next_teardown()
            .map(|s| (s.address().clone(), s.is_transport_connected()))
      });

      match next {
         Some((address, true)) => {
            self.registry.with(|r| {
               if let Some(s) = r.lookup_mut(&address) {
                  s.state = SessionState::Disconnecting;
               }
            });
            self
               .reporter
               .verbose(format_smolstr!("Disconnecting from {address}"));
            self.disconnecting = Some(address.clone());
            self.state = LinkState::Disconnecting;
            self.await_callback(self.config.disconnect_timeout(), now);
            if let Err(e) = self.transport.disconnect(&address) {
               self
                  .reporter
                  .error(format_smolstr!("Failed to disconnect from {address}: {e}"));
            }
         },
         Some((address, false)) => {
            self.remove_session(&address);
            self.set_state(LinkState::Disconnect, DISCONNECT_DELAY, now);
         },
         None if self.stopping => {
            self.stopping = false;
            self.running = false;
            self.settle(LinkState::Idle);
            self.reporter.info("Server stopped");
            self.reporter.emit(LinkEvent::TeardownComplete);
         },
         None => self.set_state(LinkState::Idle, CONNECT_DELAY, now),
      }
   }

   fn remove_session(&mut self, address: &str) {
      if let Some(session) = self.registry.with(|r| r.unregister(address)) {
         self.reporter.info(format_smolstr!(
            "Disconnected from {}, {} sessions left",
            session.name(),
            self.registry.len()
         ));
         self.reporter.emit(LinkEvent::SessionDisconnected(session));
      }
   }

   // === Transport events ===

   pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
      match event {
         TransportEvent::PeerFound { address, name } => self.on_peer_found(address, name, now),
         TransportEvent::Connected { address } => {
            self.registry.with(|r| {
               if let Some(s) = r.lookup_mut(&address) {
                  s.transport_connected = true;
               }
            });
            self
               .reporter
               .verbose(format_smolstr!("Connect to {address}..."));
         },
         TransportEvent::ServiceFound { address, service } => {
            self
               .reporter
               .verbose(format_smolstr!("Service discovered {address}, {service}..."));
         },
         TransportEvent::CharacteristicFound { address, channel } => {
            self.reporter.verbose(format_smolstr!(
               "Characteristic discovered {address}, {channel}..."
            ));
            if let Some(channel) = Channel::from_id(channel) {
               self.on_channel_found(&address, channel, now);
            }
         },
         TransportEvent::Disconnected { address } => self.on_disconnected(&address, now),
         TransportEvent::MtuChanged { address, mtu } => self.on_mtu(&address, mtu, now),
         TransportEvent::Written { address, channel } => {
            let is_push = Channel::from_id(channel) == Some(Channel::Command)
               && self.connecting.as_ref() == Some(&address)
               && self.state == LinkState::PushingMtuToPeer;
            if is_push {
               self.reporter.verbose("MTU written to client");
               self.set_state(LinkState::SubscribingChannels, SUBSCRIBE_DELAY, now);
            } else {
               debug!("Write to {address} on {channel} confirmed");
            }
         },
         TransportEvent::Subscribed { address, channel } => {
            if let Some(channel) = Channel::from_id(channel).filter(|c| c.is_long_lived()) {
               self.on_subscribed(&address, channel, now);
            }
         },
         TransportEvent::Data {
            address,
            channel,
            bytes,
         } => self.on_data(&address, Channel::from_id(channel), bytes),
         TransportEvent::Error(msg) => self.reporter.error(msg),
         TransportEvent::AdvertisingStarted | TransportEvent::CharacteristicWritten { .. } => {
            debug!("Ignoring peripheral event in central role: {event:?}");
         },
      }
   }

   fn on_peer_found(&mut self, address: SmolStr, name: SmolStr, now: Instant) {
      if !self.running || self.stopping {
         return;
      }
      if !name.starts_with(self.config.server_name.as_str()) {
         debug!("Ignoring {name} ({address}): not on network");
         return;
      }

      let session = PeerSession::new(address.clone(), name, Role::Server);
      if !self.registry.with(|r| r.register(session)) {
         return;
      }
      self.reporter.info(format_smolstr!("Found {address}"));

      let busy = self.connecting.is_some()
         || self.disconnecting.is_some()
         || matches!(
            self.state,
            LinkState::Scanning | LinkState::Disconnect | LinkState::Disconnecting
         );
      if !busy {
         self.set_state(LinkState::CandidateFound, CANDIDATE_DELAY, now);
      }
   }

   fn on_channel_found(&mut self, address: &SmolStr, channel: Channel, now: Instant) {
      if self.connecting.as_ref() != Some(address) {
         return;
      }
      let all_found = self.registry.with(|r| {
         let s = r.lookup_mut(address)?;
         if s.channels.mark_found(channel) {
            debug!("A characteristic was found: {channel}");
         }
         if s.channels.all_found() && s.state == SessionState::Connecting {
            s.state = SessionState::Connected;
            s.transport_connected = true;
            Some(true)
         } else {
            Some(false)
         }
      });

      if all_found == Some(true) && self.state == LinkState::Connecting {
         self.reporter.info("All characteristics found");
         self.set_state(LinkState::NegotiatingMtu, MTU_DELAY, now);
      }
   }

   fn on_mtu(&mut self, address: &SmolStr, mtu: u16, now: Instant) {
      let mut effective = mtu.saturating_sub(PROTOCOL_OVERHEAD);
      if effective == 0 {
         self.reporter.warning(format_smolstr!(
            "Invalid MTU {mtu} from {address}, using {DEFAULT_EFFECTIVE_MTU}"
         ));
         effective = DEFAULT_EFFECTIVE_MTU;
      }
      let Some(applied) = self
         .registry
         .with(|r| r.lookup_mut(address).map(|s| s.apply_mtu(effective)))
      else {
         return;
      };

      if applied != effective {
         self.reporter.warning(format_smolstr!(
            "Ignoring MTU {effective} for {address}, keeping {applied}"
         ));
      } else {
         self.reporter.info(format_smolstr!("MTU set to {applied}"));
      }
      if usize::from(applied) < self.codec.string_capacity() {
         self.reporter.warning(format_smolstr!(
            "MTU smaller than the string characteristic size (MTU of {applied} vs. {})",
            self.codec.string_capacity()
         ));
      }

      if self.connecting.as_ref() == Some(address) && self.state == LinkState::NegotiatingMtu {
         self.set_state(LinkState::PushingMtuToPeer, PUSH_DELAY, now);
      }
   }

   fn on_subscribed(&mut self, address: &SmolStr, channel: Channel, now: Instant) {
      let Some((fresh, ready, count)) = self.registry.with(|r| {
         let s = r.lookup_mut(address)?;
         let fresh = s.channels.mark_subscribed(channel);
         let ready = s.channels.is_ready() && s.state != SessionState::Ready;
         if ready {
            s.state = SessionState::Ready;
         }
         Some((fresh, ready, s.channels.subscribed_count()))
      }) else {
         self
            .reporter
            .verbose(format_smolstr!("Subscription for unknown device {address}"));
         return;
      };

      self.reporter.verbose(format_smolstr!(
         "Subscribed to {count} characteristics so far."
      ));

      let is_target = self.connecting.as_ref() == Some(address);
      if ready {
         let Some(session) = self.registry.lookup(address) else {
            return;
         };
         self.reporter.info(format_smolstr!(
            "Device completely connected to {}",
            session.name()
         ));
         self.reporter.emit(LinkEvent::SessionReady(session));
         if is_target {
            self.connecting = None;
            self.set_state(LinkState::Ready, READY_DELAY, now);
         }
      } else if fresh && is_target && self.state == LinkState::SubscribingChannels {
         self.subscribe_next(now);
      }
   }

   fn on_disconnected(&mut self, address: &SmolStr, now: Instant) {
      self.remove_session(address);

      if self.disconnecting.as_ref() == Some(address) {
         self.disconnecting = None;
         self.set_state(LinkState::Disconnect, DISCONNECT_DELAY, now);
      } else if self.connecting.as_ref() == Some(address) {
         self.connecting = None;
         self.set_state(LinkState::Idle, CONNECT_DELAY, now);
      }
   }

   fn on_data(&mut self, address: &SmolStr, channel: Option<Channel>, bytes: Packet) {
      let Some(session) = self.registry.lookup(address) else {
         debug!("Dropping data from unknown device {address}");
         return;
      };
      debug!("← {address}: {}", hex::encode(&bytes));

      match channel {
         Some(Channel::Sample) => {
            self
               .reporter
               .emit(LinkEvent::BytesReceived { session, bytes });
         },
         Some(Channel::String) => {
            if let Some(text) = self.codec.decode_string(&bytes) {
               self
                  .reporter
                  .emit(LinkEvent::StringReceived { session, text });
            }
         },
         Some(Channel::Command) | None => {},
      }
   }

   fn ready_session(&self, address: &str) -> Result<PeerSession> {
      let session = self
         .registry
         .lookup(address)
         .ok_or_else(|| LinkError::SessionNotFound(address.into()))?;
      if !session.is_ready() {
         return Err(LinkError::SessionNotReady(address.into()));
      }
      Ok(session)
   }
}

impl Outbox for ConnectionMachine {
   fn send_bytes(&mut self, address: &str, bytes: &[u8]) -> Result<()> {
      let session = self.ready_session(address)?;
      let max = usize::from(session.mtu().unwrap_or(DEFAULT_EFFECTIVE_MTU));
      if bytes.len() > max {
         return Err(LinkError::FrameTooLarge {
            size: bytes.len(),
            max,
         });
      }

      self.reporter.verbose(format_smolstr!(
         "Writing to device {} on sample characteristic",
         session.name()
      ));
      debug!("→ {address}: {}", hex::encode(bytes));
      self.transport.write(address, Channel::Sample.id(), bytes)
   }

   fn send_string(&mut self, address: &str, text: &str) -> Result<()> {
      let session = self.ready_session(address)?;
      let bytes = self
         .codec
         .truncate_string(text, session.mtu().unwrap_or(DEFAULT_EFFECTIVE_MTU));

      self.reporter.verbose(format_smolstr!(
         "Writing to device {} on string characteristic: {text}",
         session.name()
      ));
      debug!("→ {address}: {}", hex::encode(&bytes));
      self.transport.write(address, Channel::String.id(), &bytes)
   }
}
