//! Async front end for the headset role.
//!
//! [`LinkManager`] owns a [`ConnectionMachine`] and an [`ApplicationBridge`]
//! on a dedicated tokio task. The task ticks the machine, feeds it transport
//! callbacks and routes the resulting link events through the bridge before
//! forwarding them to the host application.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{debug, info};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
   time::{self, Instant, MissedTickBehavior},
};

use crate::{
   bluetooth::{
      machine::{ConnectionMachine, LinkState},
      registry::SharedRegistry,
      session::{PeerSession, Role},
      transport::{Packet, Transport, TransportEvent},
   },
   config::Config,
   error::{LinkError, Result},
   event::{EventBus, EventSender, LinkEvent, Reporter},
   remote::{
      bridge::{ApplicationBridge, Outbox, RemoteHandler},
      protocol::Codec,
   },
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 64;

// === Commands ===

#[derive(Debug)]
enum ManagerCommand {
   StartServer(oneshot::Sender<Result<()>>),
   StopServer(oneshot::Sender<()>),
   Disconnect(SmolStr, oneshot::Sender<Result<()>>),
   BroadcastState(oneshot::Sender<usize>),
   SendBytes(SmolStr, Packet, oneshot::Sender<Result<()>>),
   SendString(SmolStr, SmolStr, oneshot::Sender<Result<()>>),
   GetState(oneshot::Sender<LinkState>),
   SetVerbose(bool),
   Shutdown,
}

/// Link events raised while the actor is busy, drained after every step.
#[derive(Default)]
struct EventQueue {
   queue: SegQueue<LinkEvent>,
}

impl EventBus for EventQueue {
   fn emit(&self, event: LinkEvent) {
      self.queue.push(event);
   }
}

// === Main Manager ===

/// Handle to the headset link actor.
pub struct LinkManager {
   inbox: mpsc::Sender<ManagerCommand>,
   registry: SharedRegistry,
   handle: JoinHandle<()>,
}

impl LinkManager {
   /// Spawns the link actor. `transport_rx` is the receiving end of the
   /// [`TransportEvents`](crate::bluetooth::transport::TransportEvents)
   /// sink handed to `transport`.
   pub async fn new<H>(
      config: Config,
      transport: Box<dyn Transport>,
      transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
      handler: H,
      event_tx: EventSender,
   ) -> Result<Self>
   where
      H: RemoteHandler + Send + 'static,
   {
      if config.tick_interval().is_zero() {
         return Err(LinkError::InvalidConfig("tick_interval_ms must be non-zero".into()));
      }
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let registry = SharedRegistry::new(Role::Server);
      let actor = LinkActor::new(
         config,
         transport,
         registry.clone(),
         handler,
         event_tx,
         command_rx,
         transport_rx,
      );
      let handle = tokio::spawn(actor.run());
      Ok(Self {
         inbox: command_tx,
         registry,
         handle,
      })
   }

   async fn request<T>(
      &self,
      make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
   ) -> Result<T> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(make(tx))
         .await
         .map_err(|_| LinkError::ManagerShutdown)?;
      rx.await.map_err(|_| LinkError::ManagerShutdown)
   }

   pub async fn start_server(&self) -> Result<()> {
      self.request(ManagerCommand::StartServer).await?
   }

   /// Stops scanning and disconnects every remote. Resolves once teardown
   /// has completed.
   pub async fn stop_server(&self) -> Result<()> {
      self.request(ManagerCommand::StopServer).await
   }

   pub async fn disconnect(&self, address: &str) -> Result<()> {
      self
         .request(|tx| ManagerCommand::Disconnect(address.into(), tx))
         .await?
   }

   /// Sends the application state to every ready remote; returns the
   /// number of remotes written to.
   pub async fn broadcast_state(&self) -> Result<usize> {
      self.request(ManagerCommand::BroadcastState).await
   }

   pub async fn send_bytes(&self, address: &str, bytes: &[u8]) -> Result<()> {
      self
         .request(|tx| ManagerCommand::SendBytes(address.into(), Packet::from_slice(bytes), tx))
         .await?
   }

   pub async fn send_string(&self, address: &str, text: &str) -> Result<()> {
      self
         .request(|tx| ManagerCommand::SendString(address.into(), text.into(), tx))
         .await?
   }

   pub async fn state(&self) -> Result<LinkState> {
      self.request(ManagerCommand::GetState).await
   }

   pub async fn set_verbose(&self, verbose: bool) -> Result<()> {
      self
         .inbox
         .send(ManagerCommand::SetVerbose(verbose))
         .await
         .map_err(|_| LinkError::ManagerShutdown)
   }

   /// Snapshot of every known session.
   pub fn sessions(&self) -> Vec<PeerSession> {
      self.registry.list()
   }

   pub fn ready_sessions(&self) -> Vec<PeerSession> {
      self.registry.ready()
   }

   pub async fn shutdown(self) -> Result<()> {
      // a closed inbox means the actor already exited
      let _ = self.inbox.send(ManagerCommand::Shutdown).await;
      self.handle.await.map_err(LinkError::ActorPanicked)
   }
}

// === Manager Actor ===

struct LinkActor<H> {
   machine: ConnectionMachine,
   bridge: ApplicationBridge<H>,
   queue: Arc<EventQueue>,
   event_tx: EventSender,
   command_rx: mpsc::Receiver<ManagerCommand>,
   transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
   tick_interval: Duration,

   // State
   stop_waiters: Vec<oneshot::Sender<()>>,
}

impl<H: RemoteHandler> LinkActor<H> {
   fn new(
      config: Config,
      transport: Box<dyn Transport>,
      registry: SharedRegistry,
      handler: H,
      event_tx: EventSender,
      command_rx: mpsc::Receiver<ManagerCommand>,
      transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
   ) -> Self {
      let queue = Arc::new(EventQueue::default());
      let reporter = Reporter::new(queue.clone(), config.verbose);
      let codec = Codec::new(config.string_capacity);
      let tick_interval = config.tick_interval();
      Self {
         machine: ConnectionMachine::new(config, transport, registry.clone(), reporter),
         bridge: ApplicationBridge::new(registry, codec, handler),
         queue,
         event_tx,
         command_rx,
         transport_rx,
         tick_interval,
         stop_waiters: Vec::new(),
      }
   }

   async fn run(mut self) {
      info!("Link manager starting up");

      let mut tick_interval = time::interval(self.tick_interval);
      tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

      // Main event loop
      loop {
         select! {
             _ = tick_interval.tick() => {
                 self.machine.tick(Instant::now().into_std());
             }
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Link manager shutting down");
                     break;
                 };
                 if !self.handle_command(cmd) {
                     break;
                 }
             }
             Some(event) = self.transport_rx.recv() => {
                 self.machine.handle_event(event, Instant::now().into_std());
             }
         }
         self.drain_events();
      }

      self.drain_events();
      debug!("Link manager stopped");
   }

   fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
      let now = Instant::now().into_std();
      match cmd {
         ManagerCommand::StartServer(reply) => {
            let _ = reply.send(self.machine.start_server(now));
         },
         ManagerCommand::StopServer(reply) => {
            if self.machine.stop_server(now) {
               self.stop_waiters.push(reply);
            } else {
               let _ = reply.send(());
            }
         },
         ManagerCommand::Disconnect(address, reply) => {
            let _ = reply.send(self.machine.disconnect_session(&address, now));
         },
         ManagerCommand::BroadcastState(reply) => {
            let sent = self.bridge.broadcast_state_snapshot(&mut self.machine);
            let _ = reply.send(sent);
         },
         ManagerCommand::SendBytes(address, bytes, reply) => {
            let _ = reply.send(self.machine.send_bytes(&address, &bytes));
         },
         ManagerCommand::SendString(address, text, reply) => {
            let _ = reply.send(self.machine.send_string(&address, &text));
         },
         ManagerCommand::GetState(reply) => {
            let _ = reply.send(self.machine.state());
         },
         ManagerCommand::SetVerbose(verbose) => self.machine.set_verbose(verbose),
         ManagerCommand::Shutdown => {
            info!("Link manager shutting down");
            return false;
         },
      }
      true
   }

   /// Routes queued link events through the bridge, then hands them to the
   /// host application.
   fn drain_events(&mut self) {
      while let Some(event) = self.queue.queue.pop() {
         match &event {
            LinkEvent::SessionReady(session) => {
               self.bridge.on_session_ready(session, &mut self.machine);
            },
            LinkEvent::BytesReceived { session, bytes } => {
               self.bridge.on_bytes(session, bytes, &mut self.machine);
            },
            LinkEvent::StringReceived { session, text } => {
               self.bridge.on_text(session, text);
            },
            LinkEvent::TeardownComplete => {
               for waiter in self.stop_waiters.drain(..) {
                  let _ = waiter.send(());
               }
            },
            _ => {},
         }
         self.event_tx.emit(event);
      }
   }
}
