//! Configuration management for the remote link.
//!
//! This module handles loading and saving configuration from disk,
//! including network names, MTU budget and state machine timings.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Main configuration structure for the link.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
   /// Network name the headset scans for and the remote advertises under.
   #[serde(default = "default_server_name")]
   pub server_name: String,

   /// Name the remote appends to the network name when advertising.
   #[serde(default = "default_client_name")]
   pub client_name: String,

   #[serde(default = "default_desired_mtu")]
   pub desired_mtu: u16,

   /// Capacity of the string characteristic, in bytes.
   #[serde(default = "default_string_capacity")]
   pub string_capacity: usize,

   #[serde(default)]
   pub verbose: bool,

   #[serde(default = "default_tick_interval")]
   pub tick_interval_ms: u64,

   #[serde(default = "default_scan_restart")]
   pub scan_restart_secs: u64,

   #[serde(default = "default_disconnect_timeout")]
   pub disconnect_timeout_secs: u64,

   #[serde(default = "default_negotiation_timeout")]
   pub negotiation_timeout_secs: u64,
}

fn default_server_name() -> String {
   "SwitchAR_HMD".to_string()
}

fn default_client_name() -> String {
   "Remote0".to_string()
}

const fn default_desired_mtu() -> u16 {
   128
}

const fn default_string_capacity() -> usize {
   128
}

const fn default_tick_interval() -> u64 {
   16
}

const fn default_scan_restart() -> u64 {
   5
}

const fn default_disconnect_timeout() -> u64 {
   5
}

const fn default_negotiation_timeout() -> u64 {
   10
}

impl Default for Config {
   fn default() -> Self {
      Self {
         server_name: default_server_name(),
         client_name: default_client_name(),
         desired_mtu: default_desired_mtu(),
         string_capacity: default_string_capacity(),
         verbose: false,
         tick_interval_ms: default_tick_interval(),
         scan_restart_secs: default_scan_restart(),
         disconnect_timeout_secs: default_disconnect_timeout(),
         negotiation_timeout_secs: default_negotiation_timeout(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   /// Loads configuration from `path`, writing the defaults there if the
   /// file does not exist yet.
   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(link_home) = env::var("REMOTE_LINK_HOME") {
         PathBuf::from(link_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(LinkError::ConfigDirNotFound);
      };

      Ok(config_dir.join("remote-link").join("config.toml"))
   }

   /// Name the remote advertises with: `"<server_name>:<client_name>"`.
   pub fn advertised_name(&self) -> String {
      format!("{}:{}", self.server_name, self.client_name)
   }

   pub const fn tick_interval(&self) -> Duration {
      Duration::from_millis(self.tick_interval_ms)
   }

   pub const fn scan_restart(&self) -> Duration {
      Duration::from_secs(self.scan_restart_secs)
   }

   pub const fn disconnect_timeout(&self) -> Duration {
      Duration::from_secs(self.disconnect_timeout_secs)
   }

   pub const fn negotiation_timeout(&self) -> Duration {
      Duration::from_secs(self.negotiation_timeout_secs)
   }
}
