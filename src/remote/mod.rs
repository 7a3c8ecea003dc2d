//! Remote command protocol and application glue.
//!
//! This module contains the byte-channel codec shared by both link roles,
//! the bridge that dispatches decoded commands to the headset application
//! and the study application capabilities it drives.

pub mod bridge;
pub mod parser;
pub mod protocol;
pub mod study;
