//! Replica configuration.

use crate::error::{Result, TallyError};
use crate::network::PeerAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tally_core::ReplicaId;

/// A configured peer: its replica id and base address.
///
/// Parsed from either `"http://backend2:8080"` (id derived from the host
/// name) or `"replica-2=http://127.0.0.1:8081"` (explicit id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerConfig {
    pub id: ReplicaId,
    pub address: PeerAddress,
}

impl PeerConfig {
    pub fn new(id: impl Into<ReplicaId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: PeerAddress::new(address),
        }
    }
}

/// Derive a replica id from a base URL's host name.
///
/// Digits in the host give `replica-<digits>` (`backend2` → `replica-2`);
/// otherwise the whole host is used (`alpha` → `replica-alpha`).
pub fn replica_id_from_url(url: &str) -> Option<ReplicaId> {
    let without_scheme = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = without_scheme.split(['/', ':']).next()?.trim();
    if host.is_empty() {
        return None;
    }
    let digits: String = host.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        Some(ReplicaId::new(format!("replica-{host}")))
    } else {
        Some(ReplicaId::new(format!("replica-{digits}")))
    }
}

impl FromStr for PeerConfig {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TallyError::Config("empty peer entry".to_string()));
        }
        match s.split_once('=') {
            Some((id, address)) => {
                let id = ReplicaId::new(id.trim());
                let address = address.trim();
                if id.is_empty() || address.is_empty() {
                    return Err(TallyError::Config(format!("malformed peer entry: {s}")));
                }
                Ok(Self::new(id, address))
            }
            None => {
                let id = replica_id_from_url(s).ok_or_else(|| {
                    TallyError::Config(format!("cannot derive replica id from {s}"))
                })?;
                Ok(Self::new(id, s))
            }
        }
    }
}

impl TryFrom<String> for PeerConfig {
    type Error = TallyError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PeerConfig> for String {
    fn from(peer: PeerConfig) -> Self {
        peer.to_string()
    }
}

impl fmt::Display for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.id, self.address)
    }
}

/// Configuration for a replica process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// This replica's id. Required.
    pub replica_id: String,
    /// Address the HTTP API binds to.
    pub listen_addr: String,
    /// Peers to push to and pull from.
    pub peers: Vec<PeerConfig>,
    /// Push the local entry to peers after every increment.
    pub push_enabled: bool,
    /// Run the background pull sweep.
    pub periodic_sync_enabled: bool,
    /// Period of the pull sweep (in milliseconds).
    pub sync_interval_ms: u64,
    /// Delay before the first pull sweep (in milliseconds).
    pub sync_startup_delay_ms: u64,
    /// Period of the maintenance tick (in milliseconds).
    pub deep_sync_interval_ms: u64,
    /// Delay before the first maintenance tick (in milliseconds).
    pub deep_sync_startup_delay_ms: u64,
    /// Bound on acquiring the local row lock (in milliseconds).
    pub lock_timeout_ms: u64,
    /// Bound on each call to a peer (in milliseconds).
    pub peer_timeout_ms: u64,
    /// SQLite database file. In-memory when absent.
    pub database: Option<PathBuf>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            replica_id: String::new(),
            listen_addr: "127.0.0.1:8080".to_string(),
            peers: Vec::new(),
            push_enabled: true,
            periodic_sync_enabled: true,
            sync_interval_ms: 30_000,
            sync_startup_delay_ms: 10_000,
            deep_sync_interval_ms: 300_000,
            deep_sync_startup_delay_ms: 60_000,
            lock_timeout_ms: 3_000,
            peer_timeout_ms: 5_000,
            database: None,
        }
    }
}

impl ReplicaConfig {
    pub fn builder(replica_id: impl Into<String>) -> ReplicaConfigBuilder {
        ReplicaConfigBuilder::new(replica_id)
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TallyError::Config(e.to_string()))
    }

    /// Render as a TOML document.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| TallyError::Config(e.to_string()))
    }

    pub fn local_id(&self) -> ReplicaId {
        ReplicaId::new(self.replica_id.trim())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn sync_startup_delay(&self) -> Duration {
        Duration::from_millis(self.sync_startup_delay_ms)
    }

    pub fn deep_sync_interval(&self) -> Duration {
        Duration::from_millis(self.deep_sync_interval_ms)
    }

    pub fn deep_sync_startup_delay(&self) -> Duration {
        Duration::from_millis(self.deep_sync_startup_delay_ms)
    }

    /// Reject configurations a replica cannot run with.
    pub fn validate(&self) -> Result<()> {
        let local = self.local_id();
        if local.is_empty() {
            return Err(TallyError::Config("replica_id is required".to_string()));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.id == local {
                return Err(TallyError::Config(format!(
                    "peer {} has the local replica id; use the `id=url` form",
                    peer.address
                )));
            }
            if !seen.insert(&peer.id) {
                return Err(TallyError::Config(format!(
                    "duplicate peer id {}; use the `id=url` form",
                    peer.id
                )));
            }
        }

        for (name, value) in [
            ("sync_interval_ms", self.sync_interval_ms),
            ("deep_sync_interval_ms", self.deep_sync_interval_ms),
            ("lock_timeout_ms", self.lock_timeout_ms),
            ("peer_timeout_ms", self.peer_timeout_ms),
        ] {
            if value == 0 {
                return Err(TallyError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            config: ReplicaConfig {
                replica_id: replica_id.into(),
                ..ReplicaConfig::default()
            },
        }
    }

    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn peer(mut self, peer: PeerConfig) -> Self {
        self.config.peers.push(peer);
        self
    }

    pub fn peers(mut self, peers: impl IntoIterator<Item = PeerConfig>) -> Self {
        self.config.peers.extend(peers);
        self
    }

    pub fn push_enabled(mut self, enabled: bool) -> Self {
        self.config.push_enabled = enabled;
        self
    }

    pub fn periodic_sync(mut self, enabled: bool) -> Self {
        self.config.periodic_sync_enabled = enabled;
        self
    }

    pub fn sync_interval(mut self, ms: u64) -> Self {
        self.config.sync_interval_ms = ms;
        self
    }

    pub fn sync_startup_delay(mut self, ms: u64) -> Self {
        self.config.sync_startup_delay_ms = ms;
        self
    }

    pub fn deep_sync_interval(mut self, ms: u64) -> Self {
        self.config.deep_sync_interval_ms = ms;
        self
    }

    pub fn deep_sync_startup_delay(mut self, ms: u64) -> Self {
        self.config.deep_sync_startup_delay_ms = ms;
        self
    }

    pub fn lock_timeout(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    pub fn peer_timeout(mut self, ms: u64) -> Self {
        self.config.peer_timeout_ms = ms;
        self
    }

    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database = Some(path.into());
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_id_from_url() {
        assert_eq!(
            replica_id_from_url("http://backend2:8080"),
            Some(ReplicaId::new("replica-2"))
        );
        assert_eq!(
            replica_id_from_url("https://alpha/api"),
            Some(ReplicaId::new("replica-alpha"))
        );
        assert_eq!(replica_id_from_url("http://"), None);
    }

    #[test]
    fn test_peer_config_parsing() {
        let derived: PeerConfig = "http://backend3:8080".parse().unwrap();
        assert_eq!(derived.id, ReplicaId::new("replica-3"));
        assert_eq!(derived.address.as_str(), "http://backend3:8080");

        let explicit: PeerConfig = "replica-9 = http://127.0.0.1:9000/".parse().unwrap();
        assert_eq!(explicit.id, ReplicaId::new("replica-9"));
        assert_eq!(explicit.address.as_str(), "http://127.0.0.1:9000");

        assert!("=http://x".parse::<PeerConfig>().is_err());
        assert!("".parse::<PeerConfig>().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config = ReplicaConfig::from_toml(
            r#"
            replica_id = "replica-1"
            listen_addr = "0.0.0.0:8081"
            peers = ["http://backend2:8080", "replica-3=http://10.0.0.3:8080"]
            push_enabled = false
            sync_interval_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.local_id(), ReplicaId::new("replica-1"));
        assert_eq!(config.listen_addr, "0.0.0.0:8081");
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[0].id, ReplicaId::new("replica-2"));
        assert_eq!(config.peers[1].id, ReplicaId::new("replica-3"));
        assert!(!config.push_enabled);
        assert!(config.periodic_sync_enabled);
        assert_eq!(config.sync_interval(), Duration::from_secs(1));
        assert_eq!(config.peer_timeout(), Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn test_config_renders_to_toml() {
        let config = ReplicaConfig::builder("replica-1")
            .peer(PeerConfig::new("replica-2", "http://127.0.0.1:8082"))
            .build();
        let text = config.to_toml().unwrap();
        assert!(text.contains("replica-2=http://127.0.0.1:8082"));
        assert_eq!(ReplicaConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(ReplicaConfig::default().validate().is_err());

        let self_peer = ReplicaConfig::builder("replica-1")
            .peer("http://backend1:8080".parse().unwrap())
            .build();
        assert!(self_peer.validate().is_err());

        let duplicate = ReplicaConfig::builder("replica-1")
            .peer("http://localhost:8081".parse().unwrap())
            .peer("http://localhost:8082".parse().unwrap())
            .build();
        assert!(duplicate.validate().is_err());

        let zero_timeout = ReplicaConfig::builder("replica-1").lock_timeout(0).build();
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ReplicaConfig::builder("replica-1")
            .listen_addr("127.0.0.1:9001")
            .peer(PeerConfig::new("replica-2", "http://127.0.0.1:9002"))
            .push_enabled(false)
            .periodic_sync(false)
            .sync_interval(500)
            .sync_startup_delay(0)
            .lock_timeout(100)
            .peer_timeout(250)
            .build();

        assert_eq!(config.listen_addr, "127.0.0.1:9001");
        assert!(!config.push_enabled);
        assert!(!config.periodic_sync_enabled);
        assert_eq!(config.sync_startup_delay(), Duration::ZERO);
        assert_eq!(config.lock_timeout(), Duration::from_millis(100));
        config.validate().unwrap();
    }
}
