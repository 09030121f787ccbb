//! Engine configuration.

use crate::abuse::AbuseConfig;
use crate::dedup::DedupConfig;
use crate::fragment::FragmentConfig;
use crate::router::RouterConfig;
use crate::DEFAULT_TTL;
use std::time::Duration;
use weft_crypto::session::SessionConfig;

/// Top-level engine tuning; every subsystem's policy in one place so a
/// whole engine can be constructed from a single value.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hop budget stamped on locally originated frames
    pub ttl: u8,
    /// Transport addresses advertised for this node
    pub local_addresses: Vec<String>,
    /// Dedup cache policy
    pub dedup: DedupConfig,
    /// Fragmentation policy
    pub fragment: FragmentConfig,
    /// Routing and heartbeat policy
    pub router: RouterConfig,
    /// Admission-control policy
    pub abuse: AbuseConfig,
    /// Session rotation and retention policy
    pub session: SessionConfig,
    /// Cadence of the maintenance timer (purges, rotation checks)
    pub maintenance_interval: Duration,
    /// Give up on an unacknowledged directed message after this long
    pub ack_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            local_addresses: Vec::new(),
            dedup: DedupConfig::default(),
            fragment: FragmentConfig::default(),
            router: RouterConfig::default(),
            abuse: AbuseConfig::default(),
            session: SessionConfig::default(),
            maintenance_interval: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
        }
    }
}
