use crate::net::PacketLossSimulation;
use crate::protocol::DEFAULT_UPDATE_BACKUP;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub timeout_ms: u64,
    /// Consecutive timed-out checks, one per frame, before a client is dropped.
    pub timeout_checks: u32,
    pub frame_interval_ms: u64,
    /// Send a frame to spawned clients every this many server frames.
    pub snapshot_interval: u32,
    /// Frames kept per client for delta compression.
    pub update_backup: usize,
    pub entity_ring_size: usize,
    /// Malformed packets tolerated from one client before it is dropped.
    pub bad_packet_limit: u32,
    pub rcon_password: Option<String>,
    pub hostname: String,
    pub map_name: String,
    pub game_dir: String,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            timeout_ms: 125_000,
            timeout_checks: 5,
            frame_interval_ms: 100,
            snapshot_interval: 1,
            update_backup: DEFAULT_UPDATE_BACKUP,
            entity_ring_size: DEFAULT_UPDATE_BACKUP * 64,
            bad_packet_limit: 3,
            rcon_password: None,
            hostname: "noname".to_string(),
            map_name: "base1".to_string(),
            game_dir: "baseq2".to_string(),
            packet_loss: None,
        }
    }
}
