// Configuration for hosts, clients and discovery.
//
// Every struct has a `Default` and derives `Deserialize` with
// `#[serde(default)]`, so a TOML file only needs the keys it overrides.
// Framing defaults to "raw"; set it to "length-prefixed" on both ends to opt
// in to length-prefixed frames:
//
//     [host]
//     queue_name = "Friday Night"
//     owner_name = "Sam"
//     fair_play = true
//     framing = "length-prefixed"
//
//     [discovery]
//     port = 47474
//     scan_targets = ["255.255.255.255:47474"]

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use partyqueue_protocol::{Framing, HostAdvertisement};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Port shared by the host's TCP listener and UDP beacon.
pub const DEFAULT_PORT: u16 = 47_474;

/// Default interval between scan probes.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 1_000;

/// Host session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Name shown to scanning clients.
    pub queue_name: String,
    /// Display name of the host's owner.
    pub owner_name: String,
    /// User id of the host, sent to clients in `InitiateClient` and used as
    /// the requester id for tracks queued locally.
    pub host_user_id: String,
    /// Id of the shared playlist in the external catalog.
    pub playlist_id: String,
    /// Round-robin requesters instead of plain FIFO.
    pub fair_play: bool,
    pub framing: Framing,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            queue_name: "PartyQueue".into(),
            owner_name: "host".into(),
            host_user_id: "host".into(),
            playlist_id: "partyqueue".into(),
            fair_play: false,
            framing: Framing::default(),
        }
    }
}

impl HostConfig {
    pub fn advertisement(&self) -> HostAdvertisement {
        HostAdvertisement {
            queue_name: self.queue_name.clone(),
            owner_name: self.owner_name.clone(),
            fair_play: self.fair_play,
        }
    }
}

/// Client session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Requester id sent with every add-track request.
    pub user_id: String,
    pub display_name: String,
    pub framing: Framing,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: "guest".into(),
            display_name: "guest".into(),
            framing: Framing::default(),
        }
    }
}

/// LAN discovery settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Local address the host listens on and scans are sent from.
    pub bind_ip: IpAddr,
    /// Host port (TCP and UDP). 0 lets the OS pick one for the TCP listener;
    /// the beacon then binds the same number.
    pub port: u16,
    /// Where scan probes are sent.
    pub scan_targets: Vec<SocketAddr>,
    pub probe_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            scan_targets: vec![SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_PORT))],
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
        }
    }
}

impl DiscoveryConfig {
    /// Loopback-only discovery on an OS-assigned port. Scanners need their
    /// `scan_targets` pointed at the host's bound address.
    pub fn loopback() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            scan_targets: Vec::new(),
            probe_interval_ms: 100,
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "discovery.probe_interval_ms",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

/// Everything a config file can hold.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub host: HostConfig,
    pub client: ClientConfig,
    pub discovery: DiscoveryConfig,
}

impl FileConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.discovery.validate()?;
        Ok(config)
    }

    /// Per-user config location, e.g. `~/.config/partyqueue/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "partyqueue").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the per-user config if it exists, otherwise use defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}
