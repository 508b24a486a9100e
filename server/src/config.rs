use std::time::Duration;

/// Engine tunables. Everything the game design leaves open is an explicit
/// field here, populated from command-line flags rather than buried as a
/// constant.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long the buzz window stays open after the host arms it.
    pub buzz_window: Duration,
    /// Interval between heartbeat probes on each player connection.
    pub heartbeat_interval: Duration,
    /// An ack arriving later than this after its probe is discarded as stale.
    pub probe_timeout: Duration,
    /// Maximum distinct player identities per room.
    pub max_players: usize,
    /// A room with no connections for this long removes itself.
    pub room_ttl: Duration,
    /// Period of the room control loop's tick; bounds window-expiry detection.
    pub tick_interval: Duration,
    /// Lead time for latency-leveled delivery of the window-open event.
    pub open_lead: Duration,
    /// How long a fresh connection may take to send its first frame.
    pub handshake_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buzz_window: Duration::from_millis(3000),
            heartbeat_interval: Duration::from_millis(2000),
            probe_timeout: Duration::from_millis(5000),
            max_players: 32,
            room_ttl: Duration::from_secs(30 * 60),
            tick_interval: Duration::from_millis(50),
            open_lead: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.tick_interval < config.buzz_window);
        assert!(config.open_lead < config.buzz_window);
        assert!(config.heartbeat_interval <= config.probe_timeout);
    }
}
