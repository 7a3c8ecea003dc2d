//! Registry of known peer sessions.
//!
//! The registry exclusively owns session records. Insertion order is
//! preserved so that candidate selection is FIFO by discovery and broadcast
//! fan-out is stable.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::bluetooth::session::{PeerSession, Role, SessionState};

#[derive(Debug)]
pub struct SessionRegistry {
   role: Role,
   sessions: Vec<PeerSession>,
}

impl SessionRegistry {
   pub const fn new(role: Role) -> Self {
      Self {
         role,
         sessions: Vec::new(),
      }
   }

   pub const fn role(&self) -> Role {
      self.role
   }

   /// Registers a session. Idempotent by peer name: a rediscovered peer
   /// is not duplicated and `false` is returned. A client-role registry
   /// tracks a single server and replaces any previous entry.
   pub fn register(&mut self, session: PeerSession) -> bool {
      if self.sessions.iter().any(|s| s.name() == session.name()) {
         return false;
      }
      if self.role == Role::Client {
         self.sessions.clear();
      }
      debug!("Registered {} ({})", session.name(), session.address());
      self.sessions.push(session);
      true
   }

   /// Removes the session matching `key` by address or name. Absent
   /// sessions are ignored.
   pub fn unregister(&mut self, key: &str) -> Option<PeerSession> {
      let idx = self
         .sessions
         .iter()
         .position(|s| s.address() == key || s.name() == key)?;
      Some(self.sessions.remove(idx))
   }

   pub fn lookup(&self, address: &str) -> Option<&PeerSession> {
      self.sessions.iter().find(|s| s.address() == address)
   }

   pub fn lookup_mut(&mut self, address: &str) -> Option<&mut PeerSession> {
      self.sessions.iter_mut().find(|s| s.address() == address)
   }

   /// Snapshot of every session in insertion order.
   pub fn list(&self) -> Vec<PeerSession> {
      self.sessions.clone()
   }

   /// Snapshot of the ready sessions in insertion order.
   pub fn ready(&self) -> Vec<PeerSession> {
      self
         .sessions
         .iter()
         .filter(|s| s.is_ready())
         .cloned()
         .collect()
   }

   /// Flags a session for teardown. Returns `false` if it is unknown.
   pub fn mark_for_teardown(&mut self, address: &str) -> bool {
      let Some(session) = self.lookup_mut(address) else {
         return false;
      };
      session.teardown = true;
      true
   }

   pub fn mark_all_for_teardown(&mut self) {
      for session in &mut self.sessions {
         session.teardown = true;
      }
   }

   /// First session flagged for teardown, by address.
   pub fn next_teardown(&self) -> Option<&PeerSession> {
      self.sessions.iter().find(|s| s.teardown)
   }

   /// First session not yet connected and not flagged for teardown.
   pub fn first_unconnected(&self) -> Option<&PeerSession> {
      self
         .sessions
         .iter()
         .find(|s| s.state() == SessionState::Discovered && !s.teardown)
   }

   pub fn len(&self) -> usize {
      self.sessions.len()
   }

   pub fn is_empty(&self) -> bool {
      self.sessions.is_empty()
   }

   pub fn clear(&mut self) {
      self.sessions.clear();
   }
}

/// Registry shared between the state machine and its readers.
///
/// This type is cheaply cloneable. Readers only ever get snapshots, so they
/// never observe a registry in the middle of a mutation.
#[derive(Debug, Clone)]
pub struct SharedRegistry(Arc<Mutex<SessionRegistry>>);

impl SharedRegistry {
   pub fn new(role: Role) -> Self {
      Self(Arc::new(Mutex::new(SessionRegistry::new(role))))
   }

   /// Runs `f` with exclusive access to the registry.
   pub fn with<R>(&self, f: impl FnOnce(&mut SessionRegistry) -> R) -> R {
      f(&mut self.0.lock())
   }

   pub fn lookup(&self, address: &str) -> Option<PeerSession> {
      self.0.lock().lookup(address).cloned()
   }

   pub fn list(&self) -> Vec<PeerSession> {
      self.0.lock().list()
   }

   pub fn ready(&self) -> Vec<PeerSession> {
      self.0.lock().ready()
   }

   pub fn len(&self) -> usize {
      self.0.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.lock().is_empty()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn session(address: &str, name: &str) -> PeerSession {
      PeerSession::new(address, name, Role::Server)
   }

   #[test]
   fn test_register_is_idempotent_by_name() {
      let mut registry = SessionRegistry::new(Role::Server);
      assert!(registry.register(session("AA", "HMD:Remote0")));
      assert!(!registry.register(session("BB", "HMD:Remote0")));
      assert_eq!(registry.len(), 1);
      assert_eq!(registry.list()[0].address(), "AA");
   }

   #[test]
   fn test_server_tracks_many_in_order() {
      let mut registry = SessionRegistry::new(Role::Server);
      registry.register(session("AA", "HMD:Remote0"));
      registry.register(session("BB", "HMD:Remote1"));
      registry.register(session("CC", "HMD:Remote2"));

      let names: Vec<_> = registry.list().iter().map(|s| s.client_name().to_string()).collect();
      assert_eq!(names, ["Remote0", "Remote1", "Remote2"]);
   }

   #[test]
   fn test_client_tracks_one() {
      let mut registry = SessionRegistry::new(Role::Client);
      registry.register(PeerSession::new("HMD", "HMD", Role::Client));
      registry.register(PeerSession::new("HMD2", "HMD2", Role::Client));
      assert_eq!(registry.len(), 1);
      assert_eq!(registry.list()[0].address(), "HMD2");
   }

   #[test]
   fn test_unregister_absent_is_noop() {
      let mut registry = SessionRegistry::new(Role::Server);
      registry.register(session("AA", "HMD:Remote0"));
      assert!(registry.unregister("ZZ").is_none());
      assert_eq!(registry.len(), 1);

      // by name works too
      assert!(registry.unregister("HMD:Remote0").is_some());
      assert!(registry.is_empty());
      assert!(registry.unregister("AA").is_none());
   }

   #[test]
   fn test_teardown_and_candidates() {
      let mut registry = SessionRegistry::new(Role::Server);
      registry.register(session("AA", "HMD:Remote0"));
      registry.register(session("BB", "HMD:Remote1"));

      assert_eq!(registry.first_unconnected().unwrap().address(), "AA");
      assert!(registry.mark_for_teardown("AA"));
      assert!(!registry.mark_for_teardown("ZZ"));
      assert_eq!(registry.first_unconnected().unwrap().address(), "BB");
      assert_eq!(registry.next_teardown().unwrap().address(), "AA");

      registry.lookup_mut("BB").unwrap().state = SessionState::Ready;
      assert!(registry.first_unconnected().is_none());
      assert_eq!(registry.ready().len(), 1);

      registry.mark_all_for_teardown();
      assert!(registry.list().iter().all(PeerSession::is_flagged_for_teardown));
   }

   #[test]
   fn test_shared_snapshot() {
      let shared = SharedRegistry::new(Role::Server);
      shared.with(|r| r.register(session("AA", "HMD:Remote0")));
      let snapshot = shared.list();
      shared.with(|r| r.unregister("AA"));
      assert_eq!(snapshot.len(), 1);
      assert!(shared.is_empty());
      assert!(shared.lookup("AA").is_none());
   }
}
