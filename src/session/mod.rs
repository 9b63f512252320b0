//! Orchestrator: wires magnet parsing, DHT/tracker peer discovery, the
//! metadata exchange, and the piece scheduler into one download session.
pub mod config;
pub mod progress;

pub use config::SessionConfig;
pub use progress::{NullSink, Progress, ProgressSink};

use crate::dht::{DhtClient, Lookup};
use crate::error::Error;
use crate::magnet::MagnetInfo;
use crate::peer::{ExtensionHandshake, Handshake, MessageDecoder, MetadataFetcher, PeerConnection, PeerError, PeerMessage};
use crate::scheduler::endgame::EndgamePolicy;
use crate::scheduler::piece::PieceOutcome;
use crate::scheduler::piece::PieceSet;
use crate::storage::{Layout, Store};
use crate::torrent::info::InfoDict;
use crate::tracker;
use crate::wire::{InfoHash, NodeId, PeerAddress};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Parsing,
    Discovering,
    Metadata,
    Downloading,
    Done,
    Failed,
}

#[derive(Debug)]
pub enum SessionCommand {
    Pause,
    Resume,
    Cancel { delete_files: bool },
}

/// A caller's remote control over a running session: send commands, await
/// the final result.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    join: tokio::task::JoinHandle<Result<(), Error>>,
}

impl SessionHandle {
    pub async fn pause(&self) {
        let _ = self.commands.send(SessionCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.commands.send(SessionCommand::Resume).await;
    }

    pub async fn cancel(&self, delete_files: bool) {
        let _ = self.commands.send(SessionCommand::Cancel { delete_files }).await;
    }

    pub async fn join(self) -> Result<(), Error> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(Error::Fatal(format!("session task panicked: {e}"))),
        }
    }
}

enum PeerEvent {
    Connected { id: usize, addr: PeerAddress, supports_extensions: bool },
    ConnectFailed { addr: PeerAddress },
    Message { id: usize, msg: PeerMessage },
    Closed { id: usize },
}

struct PeerRuntime {
    conn: PeerConnection,
    outgoing: mpsc::Sender<PeerMessage>,
    remote_ext: Option<ExtensionHandshake>,
}

/// Starts a session as a background task and returns a handle to control
/// it. `sink` receives periodic progress snapshots.
pub fn start(magnet_uri: String, config: SessionConfig, sink: Box<dyn ProgressSink>) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::channel(8);
    let join = tokio::spawn(run(magnet_uri, config, sink, commands_rx));
    SessionHandle { commands: commands_tx, join }
}

#[instrument(skip(sink, commands), level = "info")]
async fn run(
    magnet_uri: String,
    config: SessionConfig,
    mut sink: Box<dyn ProgressSink>,
    mut commands: mpsc::Receiver<SessionCommand>,
) -> Result<(), Error> {
    let mut state = SessionState::Parsing;
    let magnet = match MagnetInfo::parse(&magnet_uri) {
        Ok(m) => m,
        Err(e) => {
            emit(sink.as_mut(), SessionState::Failed, 0, 0, 0, 0, Some(e.to_string()));
            return Err(Error::Fatal(format!("invalid magnet uri: {e}")));
        }
    };
    let info_hash = magnet.info_hash;
    let tracker_client = tracker::Client::new(config.peer_port);
    let local_peer_id = tracker_client.peer_id();

    state = SessionState::Discovering;
    emit(sink.as_mut(), state, 0, 0, 0, 0, None);
    let discovered = discover_peers(&magnet, &config, &tracker_client).await;
    if discovered.is_empty() {
        state = SessionState::Failed;
        emit(sink.as_mut(), state, 0, 0, 0, 0, Some("exhausted discovery with zero peers".to_string()));
        return Err(Error::Fatal("exhausted discovery with zero peers".to_string()));
    }

    let (events_tx, mut events_rx) = mpsc::channel::<PeerEvent>(256);
    let mut next_peer_id = 0usize;
    let mut peers: HashMap<usize, PeerRuntime> = HashMap::new();

    for addr in discovered.iter().take(config.max_peers) {
        let id = next_peer_id;
        next_peer_id += 1;
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        peers.insert(
            id,
            PeerRuntime {
                conn: PeerConnection::new(*addr, Instant::now()),
                outgoing: outgoing_tx,
                remote_ext: None,
            },
        );
        tokio::spawn(run_peer(id, *addr, info_hash, local_peer_id, events_tx.clone(), outgoing_rx));
    }

    let mut metadata_fetcher: Option<MetadataFetcher> = None;
    let mut info: Option<InfoDict> = None;
    let mut piece_set: Option<PieceSet> = None;
    let mut store: Option<Store> = None;
    let mut endgame = EndgamePolicy::new(config.endgame_threshold);
    let mut paused = false;
    let mut progress_ticker = interval(config.progress_interval);
    let mut total_length: u64 = magnet.exact_length.unwrap_or(0);
    let mut bytes_done: u64 = 0;

    loop {
        tokio::select! {
            Some(cmd) = commands.recv() => {
                match cmd {
                    SessionCommand::Pause => paused = true,
                    SessionCommand::Resume => paused = false,
                    SessionCommand::Cancel { delete_files } => {
                        if delete_files {
                            if let Some(s) = &store {
                                let _ = std::fs::remove_dir_all(s.root());
                            }
                        }
                        state = SessionState::Failed;
                        emit(sink.as_mut(), state, bytes_done, total_length, peers.len(), 0, Some("cancelled".to_string()));
                        return Ok(());
                    }
                }
            }
            Some(event) = events_rx.recv() => {
                match event {
                    PeerEvent::Connected { id, supports_extensions, .. } => {
                        if let Some(p) = peers.get_mut(&id) {
                            p.conn.mark_ready();
                            if supports_extensions {
                                let ours = ExtensionHandshake::ours(None);
                                if let Ok(payload) = ours.encode() {
                                    let _ = p.outgoing.send(PeerMessage::Extended { extended_id: 0, payload }).await;
                                }
                            }
                        }
                    }
                    PeerEvent::ConnectFailed { addr } => {
                        debug!(%addr, "peer connect failed");
                    }
                    PeerEvent::Closed { id } => {
                        if let Some(mut p) = peers.remove(&id) {
                            p.conn.close();
                            if let Some(set) = piece_set.as_mut() {
                                set.on_peer_removed(&p.conn.bitfield, id, Instant::now());
                            }
                        }
                    }
                    PeerEvent::Message { id, msg } => {
                        if paused {
                            continue;
                        }
                        handle_peer_message(
                            id,
                            msg,
                            &mut peers,
                            &mut metadata_fetcher,
                            &mut info,
                            &mut piece_set,
                            &mut store,
                            &mut endgame,
                            &mut state,
                            &mut total_length,
                            &config,
                            info_hash,
                        ).await?;
                    }
                }
            }
            _ = progress_ticker.tick() => {
                let now = Instant::now();
                if let Some(fetcher) = metadata_fetcher.as_mut() {
                    for piece in fetcher.expired_requests(now) {
                        fetcher.on_reject_or_timeout(piece);
                    }
                    dispatch_metadata_requests(&mut peers, &mut metadata_fetcher, now).await;
                }
                if let Some(set) = piece_set.as_mut() {
                    for (piece, offset, peer_id) in set.expire_requests(now) {
                        if let Some(p) = peers.get_mut(&peer_id) {
                            p.conn.remove_outstanding_at(piece, offset);
                        }
                    }
                    for peer_id in peers.keys().copied().collect::<Vec<_>>() {
                        dispatch_requests(peer_id, &mut peers, &mut piece_set, &mut endgame, &config, now).await;
                    }
                    bytes_done = (set.num_pieces() - set.remaining()) as u64 * set.piece_length() as u64;
                    total_length = set.total_length() as u64;
                }
                emit(sink.as_mut(), state, bytes_done, total_length, peers.len(), 0, None);
                if state == SessionState::Downloading && piece_set.as_ref().map(|s| s.is_complete()).unwrap_or(false) {
                    state = SessionState::Done;
                    emit(sink.as_mut(), state, bytes_done, total_length, peers.len(), 0, None);
                    return Ok(());
                }
            }
        }
    }
}

async fn discover_peers(magnet: &MagnetInfo, config: &SessionConfig, tracker_client: &tracker::Client) -> Vec<PeerAddress> {
    let mut found = HashSet::new();

    let local_id = NodeId::random();
    let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.dht_port).parse().expect("valid bind address");
    match DhtClient::bind(bind_addr, local_id).await {
        Ok(mut dht) => {
            let bootstrap: Vec<&str> = config.dht_bootstrap_nodes.iter().map(String::as_str).collect();
            if let Err(e) = dht.bootstrap(&bootstrap).await {
                warn!(error = %e, "dht bootstrap failed");
            }
            let target = NodeId::from_bytes(*magnet.info_hash.as_bytes());
            let seeds: Vec<_> = dht.routing_table().find_closest(&target, 8).into_iter().map(|n| (n.id, n.addr)).collect();
            if !seeds.is_empty() {
                let mut lookup = Lookup::new_get_peers(target, magnet.info_hash, seeds);
                if let Err(e) = dht
                    .run_lookup(&mut lookup, config.lookup_round_cap, config.lookup_time_cap, config.peer_port)
                    .await
                {
                    warn!(error = %e, "dht lookup failed");
                }
                found.extend(lookup.collected_peers().iter().copied());
            }
        }
        Err(e) => warn!(error = %e, "failed to bind dht socket"),
    }

    for tracker_url in &magnet.trackers {
        match tracker_client
            .announce(tracker_url, magnet.info_hash, 0, 0, magnet.exact_length.unwrap_or(0), tracker::Event::Started)
            .await
        {
            Ok(resp) => found.extend(resp.peers),
            Err(e) => warn!(%tracker_url, error = %e, "tracker announce failed"),
        }
    }

    found.into_iter().collect()
}

#[allow(clippy::too_many_arguments)]
async fn handle_peer_message(
    id: usize,
    msg: PeerMessage,
    peers: &mut HashMap<usize, PeerRuntime>,
    metadata_fetcher: &mut Option<MetadataFetcher>,
    info: &mut Option<InfoDict>,
    piece_set: &mut Option<PieceSet>,
    store: &mut Option<Store>,
    endgame: &mut EndgamePolicy,
    state: &mut SessionState,
    total_length: &mut u64,
    config: &SessionConfig,
    info_hash: InfoHash,
) -> Result<(), Error> {
    let now = Instant::now();
    match msg {
        PeerMessage::Extended { extended_id: 0, payload } => {
            let remote = ExtensionHandshake::decode(&payload)?;
            if let Some(size) = remote.metadata_size {
                if metadata_fetcher.is_none() && info.is_none() {
                    *metadata_fetcher = Some(MetadataFetcher::new(info_hash, size));
                    *state = SessionState::Metadata;
                }
            }
            if let Some(p) = peers.get_mut(&id) {
                p.remote_ext = Some(remote);
            }
            dispatch_metadata_requests(peers, metadata_fetcher, now).await;
        }
        PeerMessage::Extended { extended_id: 1, payload } => {
            if let Some(fetcher) = metadata_fetcher.as_mut() {
                let (meta_msg, data) = crate::peer::metadata::MetadataMessage::decode(&payload)?;
                match meta_msg.msg_type {
                    crate::peer::metadata::MsgType::Data => {
                        fetcher.on_data(meta_msg.piece, data)?;
                        if fetcher.is_complete() {
                            let decoded = fetcher.finish()?;
                            let (parsed_info, hashes) = InfoDict::from_bencode(&decoded)?;
                            let piece_length = parsed_info.piece_length;
                            let total = parsed_info.total_length();
                            let layout = Layout::from_info(&parsed_info);
                            let num_pieces = hashes.len();
                            *total_length = total as u64;
                            *piece_set = Some(PieceSet::new(hashes, piece_length, total));
                            *store = Some(Store::new(config.save_dir.clone(), layout, num_pieces));
                            *info = Some(parsed_info);
                            *state = SessionState::Downloading;
                            for p in peers.values_mut() {
                                let _ = p.outgoing.try_send(PeerMessage::Interested);
                                p.conn.am_interested = true;
                            }
                        }
                    }
                    crate::peer::metadata::MsgType::Reject => fetcher.on_reject_or_timeout(meta_msg.piece),
                    crate::peer::metadata::MsgType::Request => {}
                }
            }
            dispatch_metadata_requests(peers, metadata_fetcher, now).await;
        }
        PeerMessage::Bitfield(bits) => {
            if let Some(p) = peers.get_mut(&id) {
                let num_pieces = piece_set.as_ref().map(|s| s.num_pieces()).unwrap_or(bits.len() * 8);
                p.conn.set_bitfield(&bits, num_pieces);
                if let Some(set) = piece_set.as_mut() {
                    set.on_peer_bitfield(&p.conn.bitfield);
                }
            }
        }
        PeerMessage::Have { piece } => {
            if let Some(p) = peers.get_mut(&id) {
                p.conn.set_have(piece as usize);
            }
            if let Some(set) = piece_set.as_mut() {
                set.on_peer_have(piece as usize);
            }
        }
        PeerMessage::Unchoke => {
            if let Some(p) = peers.get_mut(&id) {
                p.conn.peer_choking = false;
            }
            dispatch_requests(id, peers, piece_set, endgame, config, now).await;
        }
        PeerMessage::Choke => {
            if let Some(p) = peers.get_mut(&id) {
                p.conn.peer_choking = true;
            }
        }
        PeerMessage::Piece { piece, offset, data } => {
            if let Some(p) = peers.get_mut(&id) {
                p.conn.remove_outstanding(&crate::peer::connection::BlockRequest { piece, offset, length: data.len() as u32 });
            }
            if let Some(set) = piece_set.as_mut() {
                if let Some(outcome) = set.on_block(piece, offset, &data, id)? {
                    match outcome {
                        PieceOutcome::Verified { piece, data } => {
                            if let (Some(store), Some(info)) = (store.as_mut(), info.as_ref()) {
                                store.write_piece(piece, info.piece_length, &data)?;
                            }
                            for p in peers.values_mut() {
                                let _ = p.outgoing.try_send(PeerMessage::Have { piece });
                            }
                        }
                        PieceOutcome::Mismatch { strikes, .. } => {
                            for peer_id in strikes {
                                if let Some(p) = peers.get_mut(&peer_id) {
                                    if p.conn.add_strike() >= PeerConnection::MAX_STRIKES {
                                        let _ = p.outgoing.send(PeerMessage::NotInterested).await;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            dispatch_requests(id, peers, piece_set, endgame, config, now).await;
        }
        _ => {}
    }
    Ok(())
}

async fn dispatch_metadata_requests(peers: &mut HashMap<usize, PeerRuntime>, metadata_fetcher: &mut Option<MetadataFetcher>, now: Instant) {
    let Some(fetcher) = metadata_fetcher.as_mut() else { return };
    let capable: Vec<usize> = peers
        .iter()
        .filter(|(_, p)| p.remote_ext.as_ref().and_then(|e| e.remote_ut_metadata_id()).is_some())
        .map(|(id, _)| *id)
        .collect();
    loop {
        let Some((piece, peer_id)) = fetcher.next_request(&capable, now) else { break };
        let Some(peer) = peers.get(&peer_id) else { continue };
        let Some(remote_id) = peer.remote_ext.as_ref().and_then(|e| e.remote_ut_metadata_id()) else { continue };
        let Ok(payload) = crate::peer::metadata::MetadataMessage::request(piece).encode() else { continue };
        let _ = peer.outgoing.send(PeerMessage::Extended { extended_id: remote_id, payload }).await;
    }
}

async fn dispatch_requests(
    id: usize,
    peers: &mut HashMap<usize, PeerRuntime>,
    piece_set: &mut Option<PieceSet>,
    endgame: &mut EndgamePolicy,
    config: &SessionConfig,
    now: Instant,
) {
    let Some(set) = piece_set.as_mut() else { return };
    let Some(peer) = peers.get_mut(&id) else { return };
    let window = if endgame.is_active(set.remaining()) { config.max_pipeline_window } else { config.initial_pipeline_window };
    while peer.conn.can_request_more(window) {
        let has_piece = |i: usize| peer.conn.has_piece(i);
        match set.pick_block(id, has_piece, now) {
            Some((piece, offset, length)) => {
                peer.conn.add_outstanding(crate::peer::connection::BlockRequest { piece, offset, length });
                if peer.outgoing.send(PeerMessage::Request { piece, offset, length }).await.is_err() {
                    break;
                }
            }
            None => break,
        }
    }
}

async fn run_peer(
    id: usize,
    addr: PeerAddress,
    info_hash: InfoHash,
    local_peer_id: [u8; 20],
    events_tx: mpsc::Sender<PeerEvent>,
    mut outgoing_rx: mpsc::Receiver<PeerMessage>,
) {
    let result = connect_and_pump(id, addr, info_hash, local_peer_id, &events_tx, &mut outgoing_rx).await;
    if let Err(e) = result {
        debug!(%addr, error = %e, "peer connection ended");
        let _ = events_tx.send(PeerEvent::ConnectFailed { addr }).await;
    }
    let _ = events_tx.send(PeerEvent::Closed { id }).await;
}

async fn connect_and_pump(
    id: usize,
    addr: PeerAddress,
    info_hash: InfoHash,
    local_peer_id: [u8; 20],
    events_tx: &mpsc::Sender<PeerEvent>,
    outgoing_rx: &mut mpsc::Receiver<PeerMessage>,
) -> Result<(), PeerError> {
    let mut stream = TcpStream::connect(addr.socket_addr()).await?;
    let hs = Handshake::new(info_hash, local_peer_id);
    stream.write_all(&hs.serialize()).await?;

    let mut hs_buf = [0u8; crate::peer::handshake::HANDSHAKE_LEN];
    stream.read_exact(&mut hs_buf).await?;
    let remote_hs = Handshake::parse(&hs_buf)?;
    remote_hs.validate_info_hash(&info_hash)?;

    let supports_extensions = remote_hs.supports_extensions();
    let _ = events_tx.send(PeerEvent::Connected { id, addr, supports_extensions }).await;

    let mut decoder = MessageDecoder::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            read_result = stream.read(&mut buf) => {
                let n = read_result?;
                if n == 0 {
                    return Ok(());
                }
                decoder.feed(&buf[..n]);
                while let Some(msg) = decoder.next_message()? {
                    if events_tx.send(PeerEvent::Message { id, msg }).await.is_err() {
                        return Ok(());
                    }
                }
            }
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(msg) => stream.write_all(&msg.encode()).await?,
                    None => return Ok(()),
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit(
    sink: &mut dyn ProgressSink,
    state: SessionState,
    bytes_done: u64,
    bytes_total: u64,
    peer_count: usize,
    seed_count: usize,
    error_message: Option<String>,
) {
    sink.on_progress(&Progress {
        state,
        bytes_done,
        bytes_total,
        download_rate: 0.0,
        upload_rate: 0.0,
        peer_count,
        seed_count,
        error_message,
    });
}
