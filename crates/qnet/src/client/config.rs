use crate::protocol::DEFAULT_UPDATE_BACKUP;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout_ms: u64,
    /// Consecutive timed-out checks before the server is given up on.
    pub timeout_checks: u32,
    pub resend_interval_ms: u64,
    /// Minimum gap between command packets, 0 to send on every call.
    pub command_interval_ms: u64,
    /// Expected gap between server frames, used to interpolate.
    pub frame_interval_ms: u64,
    pub update_backup: usize,
    /// Entity states kept for decoding deltas.
    pub parse_entities: usize,
    pub userinfo: String,
    /// Random when unset.
    pub qport: Option<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            timeout_checks: 5,
            resend_interval_ms: 3_000,
            command_interval_ms: 0,
            frame_interval_ms: 100,
            update_backup: DEFAULT_UPDATE_BACKUP,
            parse_entities: 1024,
            userinfo: "\\name\\unnamed".to_string(),
            qport: None,
        }
    }
}
