//! Progress reporting: a periodic snapshot handed to a caller-supplied
//! sink rather than the core writing to a terminal or UI directly.
use super::SessionState;

#[derive(Debug, Clone)]
pub struct Progress {
    pub state: SessionState,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub download_rate: f64,
    pub upload_rate: f64,
    pub peer_count: usize,
    pub seed_count: usize,
    pub error_message: Option<String>,
}

/// Receives progress snapshots; the core never writes to a terminal or UI
/// directly, it only calls this sink.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, progress: &Progress);
}

/// A sink that drops every update; useful for tests and headless runs
/// that only care about the final session result.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&mut self, _progress: &Progress) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_updates_without_panicking() {
        let mut sink = NullSink;
        sink.on_progress(&Progress {
            state: SessionState::Downloading,
            bytes_done: 0,
            bytes_total: 100,
            download_rate: 0.0,
            upload_rate: 0.0,
            peer_count: 0,
            seed_count: 0,
            error_message: None,
        });
    }
}
