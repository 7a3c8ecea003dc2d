//! Test doubles shared by the unit tests.

use std::sync::{
   Arc,
   atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::{
   bluetooth::{
      channel::{Channel, ChannelId},
      transport::{Packet, Properties, Transport},
   },
   error::{LinkError, Result},
   event::{EventBus, LinkEvent},
};

pub fn init_logging() {
   let _ = env_logger::builder().is_test(true).try_init();
}

/// A transport call as recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
   Scan(SmolStr),
   StopScan,
   Connect(SmolStr),
   RequestMtu(SmolStr, u16),
   Write(SmolStr, Channel, Packet),
   Subscribe(SmolStr, Channel),
   Disconnect(SmolStr),
   StartAdvertising(SmolStr),
   StopAdvertising,
   CreateCharacteristic(Channel, Properties, usize),
   UpdateCharacteristic(Channel, Packet),
}

/// Transport that records every call. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
   ops: Arc<Mutex<Vec<Op>>>,
   failing: Arc<AtomicBool>,
}

impl MockTransport {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn ops(&self) -> Vec<Op> {
      self.ops.lock().clone()
   }

   /// Returns and clears the recorded calls.
   pub fn take(&self) -> Vec<Op> {
      std::mem::take(&mut *self.ops.lock())
   }

   pub fn writes(&self) -> Vec<(SmolStr, Channel, Packet)> {
      self
         .ops()
         .into_iter()
         .filter_map(|op| match op {
            Op::Write(addr, channel, bytes) => Some((addr, channel, bytes)),
            _ => None,
         })
         .collect()
   }

   /// Makes every subsequent call fail.
   pub fn set_failing(&self, failing: bool) {
      self.failing.store(failing, Ordering::Relaxed);
   }

   fn record(&self, op: Op) -> Result<()> {
      if self.failing.load(Ordering::Relaxed) {
         return Err(LinkError::transport(format!("mock failure: {op:?}")));
      }
      self.ops.lock().push(op);
      Ok(())
   }
}

fn channel(id: ChannelId) -> Channel {
   Channel::from_id(id).expect("mock only sees known channels")
}

impl Transport for MockTransport {
   fn scan(&mut self, name_prefix: &str) -> Result<()> {
      self.record(Op::Scan(name_prefix.into()))
   }

   fn stop_scan(&mut self) -> Result<()> {
      self.record(Op::StopScan)
   }

   fn connect(&mut self, address: &str) -> Result<()> {
      self.record(Op::Connect(address.into()))
   }

   fn request_mtu(&mut self, address: &str, desired: u16) -> Result<()> {
      self.record(Op::RequestMtu(address.into(), desired))
   }

   fn write(&mut self, address: &str, id: ChannelId, bytes: &[u8]) -> Result<()> {
      self.record(Op::Write(address.into(), channel(id), Packet::from_slice(bytes)))
   }

   fn subscribe(&mut self, address: &str, id: ChannelId) -> Result<()> {
      self.record(Op::Subscribe(address.into(), channel(id)))
   }

   fn disconnect(&mut self, address: &str) -> Result<()> {
      self.record(Op::Disconnect(address.into()))
   }

   fn start_advertising(&mut self, local_name: &str) -> Result<()> {
      self.record(Op::StartAdvertising(local_name.into()))
   }

   fn stop_advertising(&mut self) -> Result<()> {
      self.record(Op::StopAdvertising)
   }

   fn create_characteristic(
      &mut self,
      id: ChannelId,
      properties: Properties,
      capacity: usize,
   ) -> Result<()> {
      self.record(Op::CreateCharacteristic(channel(id), properties, capacity))
   }

   fn update_characteristic(&mut self, id: ChannelId, bytes: &[u8]) -> Result<()> {
      self.record(Op::UpdateCharacteristic(channel(id), Packet::from_slice(bytes)))
   }
}

/// Event bus that keeps everything it is given.
#[derive(Default)]
pub struct RecordingBus {
   events: Mutex<Vec<LinkEvent>>,
}

impl RecordingBus {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn events(&self) -> Vec<LinkEvent> {
      self.events.lock().clone()
   }

   pub fn take(&self) -> Vec<LinkEvent> {
      std::mem::take(&mut *self.events.lock())
   }

   pub fn count(&self, pred: impl Fn(&LinkEvent) -> bool) -> usize {
      self.events.lock().iter().filter(|e| pred(e)).count()
   }
}

impl EventBus for RecordingBus {
   fn emit(&self, event: LinkEvent) {
      self.events.lock().push(event);
   }
}
