//! Pure data configuration for the networking stack. No validation, no
//! business-rule defaults beyond the literal constants the spec names — the
//! teacher's `config` "Iron Rule" (data only, no policy) is preserved here.

use std::time::Duration;

use multiaddr::Multiaddr;

/// Bootstrap relay multiaddresses used when no explicit relay is configured.
/// A constant placeholder list; real deployments override via `relays`.
pub fn default_webrtc_star_relays() -> Vec<Multiaddr> {
    Vec::new()
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub direct_dial_timeout: Duration,
    pub relay_dial_timeout: Duration,
    pub direct_upgrade_timeout: Duration,
    pub pending_expiry: Duration,
    pub rendezvous_refresh_interval: Duration,
    pub relay_reservation_backoff: Duration,
    pub relay_reservation_max_attempts: u32,
    pub relays: Vec<Multiaddr>,
    /// `RELAY_ADDR` — listen address when running as a relay server.
    pub relay_addr: Option<Multiaddr>,
    /// `RELAY_PRIVATE_KEY` — path to the relay server's persisted keypair.
    pub relay_private_key_path: Option<std::path::PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            direct_dial_timeout: Duration::from_secs(8),
            relay_dial_timeout: Duration::from_secs(12),
            direct_upgrade_timeout: Duration::from_secs(10),
            pending_expiry: clipmesh_core::trust::manager::PENDING_EXPIRY,
            rendezvous_refresh_interval: Duration::from_secs(30),
            relay_reservation_backoff: Duration::from_secs(2),
            relay_reservation_max_attempts: 6,
            relays: default_webrtc_star_relays(),
            relay_addr: None,
            relay_private_key_path: None,
        }
    }
}
