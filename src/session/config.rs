//! Tunables for a download session: discovery, pipelining, endgame, and
//! progress-reporting knobs, all with sensible defaults.
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory verified pieces are written into.
    pub save_dir: PathBuf,
    /// DHT bootstrap hostnames, resolved and pinged at startup.
    pub dht_bootstrap_nodes: Vec<String>,
    /// UDP port the DHT client binds to.
    pub dht_port: u16,
    /// TCP port advertised to peers and trackers.
    pub peer_port: u16,
    /// Hard cap on simultaneous peer connections.
    pub max_peers: usize,
    /// Initial per-peer pipeline depth; grown toward `max_pipeline_window`.
    pub initial_pipeline_window: usize,
    pub max_pipeline_window: usize,
    /// Pieces remaining at or below which endgame duplication kicks in.
    pub endgame_threshold: usize,
    /// How often progress is sampled and emitted to the sink.
    pub progress_interval: Duration,
    /// Hard cap on a single iterative DHT lookup.
    pub lookup_round_cap: u32,
    pub lookup_time_cap: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            save_dir: PathBuf::from("."),
            dht_bootstrap_nodes: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
            ],
            dht_port: 6881,
            peer_port: 6881,
            max_peers: 50,
            initial_pipeline_window: crate::scheduler::piece::DEFAULT_WINDOW,
            max_pipeline_window: crate::scheduler::piece::MAX_WINDOW,
            endgame_threshold: crate::scheduler::endgame::DEFAULT_ENDGAME_THRESHOLD,
            progress_interval: Duration::from_secs(1),
            lookup_round_cap: 20,
            lookup_time_cap: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_named_protocol_constants() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.max_peers, 50);
        assert_eq!(cfg.endgame_threshold, 8);
        assert_eq!(cfg.initial_pipeline_window, 5);
        assert_eq!(cfg.max_pipeline_window, 16);
    }
}
