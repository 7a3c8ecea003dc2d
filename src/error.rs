//! Error types for the remote link.
//!
//! This module defines the errors surfaced by the public API: transport
//! failures, session lookups, frame budget violations, configuration I/O and
//! actor shutdown.

use smol_str::SmolStr;
use thiserror::Error;
use tokio::task::JoinError;

use crate::remote::parser::ProtoError;

/// Main error type for the remote link.
#[derive(Error, Debug)]
pub enum LinkError {
   #[error("Transport error: {0}")]
   Transport(SmolStr),

   #[error("Protocol error: {0}")]
   Protocol(#[from] ProtoError),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Session not found: {0}")]
   SessionNotFound(SmolStr),

   #[error("Session not ready: {0}")]
   SessionNotReady(SmolStr),

   #[error("Frame too large: {size} bytes (max: {max})")]
   FrameTooLarge { size: usize, max: usize },

   #[error("Server already running")]
   AlreadyRunning,

   #[error("Actor panicked: {0}")]
   ActorPanicked(JoinError),

   #[error("Invalid configuration: {0}")]
   InvalidConfig(SmolStr),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Manager has been shut down")]
   ManagerShutdown,
}

impl LinkError {
   pub fn transport(msg: impl Into<SmolStr>) -> Self {
      Self::Transport(msg.into())
   }
}

/// Convenience type alias for Results with `LinkError`.
pub type Result<T> = std::result::Result<T, LinkError>;
