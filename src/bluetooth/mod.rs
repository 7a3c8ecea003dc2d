//! BLE link layer for the headset and the remote.
//!
//! This module provides the transport seam, channel layout, session
//! registry, the headset connection state machine with its async manager
//! and the remote's peripheral link.

pub mod channel;
pub mod machine;
pub mod manager;
pub mod peripheral;
pub mod registry;
pub mod session;
pub mod transport;
