use clap::Parser;
use magnetdl::session::{self, Progress, ProgressSink, SessionConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Fetch a single torrent from a magnet link")]
struct Cli {
    /// magnet: URI to download
    magnet: String,

    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    #[arg(long, default_value_t = 6881)]
    dht_port: u16,

    #[arg(long, default_value_t = 6881)]
    peer_port: u16,

    #[arg(long, default_value_t = 50)]
    max_peers: usize,
}

struct StderrSink;

impl ProgressSink for StderrSink {
    fn on_progress(&mut self, progress: &Progress) {
        eprintln!(
            "{:?} {}/{} bytes, {} peers{}",
            progress.state,
            progress.bytes_done,
            progress.bytes_total,
            progress.peer_count,
            progress
                .error_message
                .as_ref()
                .map(|m| format!(" ({m})"))
                .unwrap_or_default(),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = SessionConfig {
        save_dir: cli.out,
        dht_port: cli.dht_port,
        peer_port: cli.peer_port,
        max_peers: cli.max_peers,
        ..SessionConfig::default()
    };

    let handle = session::start(cli.magnet, config, Box::new(StderrSink));
    handle.join().await?;
    Ok(())
}
