// game.rs — the Game aggregate: owns every per-session collaborator and
// drives the Lobby → CountingDown → Loading → Playing → Ended lifecycle.
//
// Grounded on mattx86-myq2-rust's sv_main.rs `sv_frame`: a single per-tick
// entry point that walks timeouts, advances simulation state, and returns
// what happened rather than performing I/O itself — the caller (here,
// `scheduler.rs`, there, the platform's socket loop) is responsible for
// actually writing bytes to sockets.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use w3gs_common::error::{AdmissionError, TimeoutError};
use w3gs_common::map::Map;
use w3gs_common::slot::{ObserverPolicy, RaceFlags, SlotStatus, SlotTable, SlotType};

use crate::action_engine::{ActionEngine, FrameCallback};
use crate::collab::MapSource;
use crate::config::{GameConfig, LoadingMode};
use crate::discovery::{DiscoveryEvent, DiscoveryPublisher};
use crate::history::GameHistory;
use crate::lag_manager::LagManager;
use crate::map_transfer::{MapChunk, MapSizeReport, MapTransfer};
use crate::protocol;
use crate::reconnect::{ReconnectRegistry, ReconnectRejectReason};
use crate::user::{GproxyState, Spectator, User};

/// The uid a hosted game presents itself as when it is the source of a map
/// chunk or the host-counter side of STARTDOWNLOAD — the bot itself never
/// occupies a player slot.
pub const HOST_UID: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Lobby,
    CountingDown,
    Loading,
    Playing,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    SlotInfoBroadcast(Vec<u8>),
    CountdownStart(Vec<u8>),
    CountdownEnd(Vec<u8>),
    GameLoadedOthers(u8, Vec<u8>),
    Frame(Vec<u8>),
    StartLag(Vec<u8>),
    StopLag(u8, Vec<u8>),
    /// A user's departure, relayed once their last queued action has drained.
    PlayerLeaveOthers(u8, Vec<u8>),
    /// One MAPPART chunk ready to send to `to_uid`.
    MapPart(u8, Vec<u8>),
    StartDownload(u8, Vec<u8>),
    Kick(u8, TimeoutError),
    RejectJoin(AdmissionError),
    Discovery(DiscoveryEvent, Vec<u8>),
    Desynchronized(Vec<u8>, Vec<u8>),
    GameEnded,
}

pub struct Game {
    pub host_counter: u32,
    pub entry_key: u32,
    pub map: Map,
    pub creator: String,
    pub owner: Option<String>,
    pub config: GameConfig,
    /// The seed broadcast to every client at COUNTDOWN_END so random events
    /// (neutral hostile spawns, item drops) stay in sync across the game.
    pub random_seed: u32,

    pub slots: SlotTable,
    pub users: HashMap<u8, User>,
    pub spectators: HashMap<u8, Spectator>,
    pub action_engine: ActionEngine,
    pub lag_manager: LagManager,
    pub map_transfer: Option<MapTransfer>,
    pub history: GameHistory,
    pub reconnect: ReconnectRegistry,
    pub discovery: DiscoveryPublisher,

    pub phase: GamePhase,
    pub delete_me: bool,

    created_at_ms: u64,
    countdown_started_at_ms: Option<u64>,
    countdown_start_pending: bool,
    loading_started_at_ms: Option<u64>,
    loaded_uids: HashSet<u8>,
    last_owner_seen_ms: u64,
    broadcast_counter: u32,
    /// When each map-less user was first observed lacking the map, for the
    /// `lacks_map_kick_delay_secs` grace period.
    map_missing_since_ms: HashMap<u8, u64>,
    discovery_announced: bool,
}

impl Game {
    pub fn new(
        host_counter: u32,
        entry_key: u32,
        map: Map,
        creator: impl Into<String>,
        owner: Option<String>,
        config: GameConfig,
        now_ms: u64,
    ) -> Self {
        let observer_policy = ObserverPolicy::Limited(map.slot_count as u8);
        Game {
            slots: SlotTable::new(map.slot_count, map.layout, observer_policy),
            action_engine: ActionEngine::new(config.latency_default_ms),
            lag_manager: LagManager::new(config.sync_limit, config.sync_limit_safe, 64),
            map_transfer: None,
            history: GameHistory::new(config.latency_default_ms, config.gproxy_empty_actions),
            reconnect: ReconnectRegistry::new(
                config.playing_timeout_secs * 1000 / config.latency_default_ms.max(1) as u64,
            ),
            discovery: DiscoveryPublisher::new(config.discovery_refresh_secs * 1000, Vec::new()),
            host_counter,
            entry_key,
            map,
            creator: creator.into(),
            owner,
            random_seed: rand::random(),
            config,
            phase: GamePhase::Lobby,
            delete_me: false,
            created_at_ms: now_ms,
            countdown_started_at_ms: None,
            countdown_start_pending: false,
            loading_started_at_ms: None,
            loaded_uids: HashSet::new(),
            last_owner_seen_ms: now_ms,
            users: HashMap::new(),
            spectators: HashMap::new(),
            broadcast_counter: 0,
            map_missing_since_ms: HashMap::new(),
            discovery_announced: false,
        }
    }

    pub fn touch_owner(&mut self, now_ms: u64) {
        self.last_owner_seen_ms = now_ms;
    }

    pub fn join_user(&mut self, uid: u8, mut user: User, team: u8, color: u8) -> Result<(), AdmissionError> {
        let slot_index = self
            .slots
            .join(uid, team, color, RaceFlags::RANDOM | RaceFlags::SELECTABLE)
            .map_err(|_| AdmissionError::Full)?;
        user.slot_index = slot_index;
        self.users.insert(uid, user);
        Ok(())
    }

    /// Seat a non-participating observer. Spectators never occupy a
    /// `SlotTable` seat and contribute no actions; they exist purely to
    /// receive the broadcast.
    pub fn join_spectator(&mut self, spectator: Spectator) {
        self.spectators.insert(spectator.uid, spectator);
    }

    pub fn spectator_left(&mut self, uid: u8) {
        self.spectators.remove(&uid);
    }

    /// Owner-issued `start` command.
    pub fn start_countdown(&mut self, now_ms: u64) -> Result<(), &'static str> {
        if self.phase != GamePhase::Lobby {
            return Err("countdown can only start from Lobby");
        }
        self.phase = GamePhase::CountingDown;
        self.countdown_started_at_ms = Some(now_ms);
        self.countdown_start_pending = true;
        Ok(())
    }

    /// Owner-issued cancel during CountingDown.
    pub fn cancel_countdown(&mut self) -> Result<(), &'static str> {
        if self.phase != GamePhase::CountingDown {
            return Err("no countdown in progress");
        }
        self.phase = GamePhase::Lobby;
        self.countdown_started_at_ms = None;
        self.countdown_start_pending = false;
        Ok(())
    }

    pub fn gameloaded_self(&mut self, uid: u8, now_ms: u64) {
        if self.phase != GamePhase::Loading {
            return;
        }
        self.loaded_uids.insert(uid);
        if let Some(user) = self.users.get_mut(&uid) {
            user.finished_loading = true;
        }
        let _ = now_ms;
    }

    fn all_loaded(&self) -> bool {
        !self.users.is_empty() && self.users.keys().all(|uid| self.loaded_uids.contains(uid))
    }

    /// Advance the lifecycle and sequencer by one outer tick
    ///. Returns every event the caller must relay to sockets.
    pub fn tick(&mut self, now_ms: u64, map_source: &dyn MapSource) -> Vec<GameEvent> {
        let mut events = Vec::new();

        if !self.discovery_announced {
            self.discovery_announced = true;
            let event = self.open_discovery(now_ms);
            let wire = protocol::encode_create_game(self.host_counter, self.map.min_game_version);
            events.push(GameEvent::Discovery(event, wire));
        }

        if self.slots.is_dirty() {
            let wire = protocol::encode_slot_info(self.slots.slots(), self.random_seed, self.map.layout);
            events.push(GameEvent::SlotInfoBroadcast(wire));
            self.slots.clear_dirty();
        }

        match self.phase {
            GamePhase::Lobby => self.tick_lobby(now_ms, &mut events),
            GamePhase::CountingDown => self.tick_countdown(now_ms, &mut events),
            GamePhase::Loading => self.tick_loading(now_ms, &mut events),
            GamePhase::Playing => self.tick_playing(now_ms, &mut events),
            GamePhase::Ended => {
                events.push(GameEvent::GameEnded);
                self.delete_me = true;
            }
        }

        self.tick_map_transfer(now_ms, map_source, &mut events);

        if let Some(event) = self
            .discovery
            .poll(now_ms, self.users.len() as u8, self.slots.slots().len() as u8)
        {
            let wire = match &event {
                DiscoveryEvent::RefreshGame { players, slots } => protocol::encode_refresh_game(self.host_counter, *players, *slots),
                _ => Vec::new(),
            };
            events.push(GameEvent::Discovery(event, wire));
        }

        events
    }

    /// Lazily resolve the map's file size on first tick, kick anyone who
    /// never reported having it past the grace period, and push the next
    /// fair-share chunk for whoever is mid-download.
    fn tick_map_transfer(&mut self, now_ms: u64, map_source: &dyn MapSource, events: &mut Vec<GameEvent>) {
        if self.map_transfer.is_none() {
            let Some(file_size) = map_source.file_size(&self.map.path) else {
                return;
            };
            self.map_transfer = Some(MapTransfer::new(HOST_UID, file_size, self.config.max_upload_bytes_per_second));
        }

        let uids: Vec<u8> = self.users.keys().copied().collect();
        for uid in uids {
            let map_ready = self.users.get(&uid).map(|u| u.map_ready).unwrap_or(true);
            if map_ready {
                self.map_missing_since_ms.remove(&uid);
                continue;
            }
            let since = *self.map_missing_since_ms.entry(uid).or_insert(now_ms);
            if now_ms.saturating_sub(since) >= self.config.lacks_map_kick_delay_secs * 1000 {
                if let Some(user) = self.users.get_mut(&uid) {
                    user.kick_reasons |= crate::user::KickReasons::MAP_MISSING;
                }
                events.push(GameEvent::Kick(uid, TimeoutError::MapMissing));
            }
        }

        let map_path = self.map.path.clone();
        let Some(transfer) = self.map_transfer.as_mut() else {
            return;
        };
        if let Some((uid, chunk, bytes)) = transfer.next_chunk(now_ms, |offset, len| {
            map_source.read_chunk(&map_path, offset, len).unwrap_or_default()
        }) {
            events.push(GameEvent::MapPart(uid, protocol::encode_map_part(&chunk, &bytes)));
        }
    }

    /// A client's `MAPSIZE` report: either "I already have it" (validated
    /// against the transfer's known file size) or "send me the rest from
    /// `offset`", which kicks off a chunked push.
    pub fn handle_map_size(&mut self, uid: u8, report: MapSizeReport, _now_ms: u64) -> Vec<GameEvent> {
        let mut events = Vec::new();
        match report {
            MapSizeReport::Have { size } => {
                let ready = self
                    .map_transfer
                    .as_ref()
                    .map(|t| t.validate_have_report(size))
                    .unwrap_or(false);
                if let Some(user) = self.users.get_mut(&uid) {
                    user.map_ready = ready;
                    user.download_pct = if ready { 100 } else { user.download_pct };
                }
                if ready {
                    self.map_missing_since_ms.remove(&uid);
                }
            }
            MapSizeReport::ContinueDownload { offset } => {
                let Some(transfer) = self.map_transfer.as_mut() else {
                    return events;
                };
                transfer.begin_download(uid, offset);
                events.push(GameEvent::StartDownload(uid, protocol::encode_start_download(HOST_UID)));
            }
        }
        events
    }

    /// Client acknowledged a MAPPART; returns `true` if a 1% boundary was
    /// crossed and the slot table's download percentage should be rebroadcast.
    pub fn ack_map_chunk(&mut self, uid: u8, chunk: &MapChunk) -> bool {
        let crossed = self
            .map_transfer
            .as_mut()
            .map(|t| t.ack_chunk(uid, chunk))
            .unwrap_or(false);
        if crossed {
            if let Some(pct) = self.map_transfer.as_ref().and_then(|t| t.download_pct(uid)) {
                if let Some(user) = self.users.get_mut(&uid) {
                    user.download_pct = pct;
                }
            }
        }
        crossed
    }

    pub fn nack_map_chunk(&mut self, uid: u8, offset: u64) {
        if let Some(transfer) = self.map_transfer.as_mut() {
            transfer.nack_chunk(uid, offset);
        }
    }

    /// Record a reconnect-capable user's GPS handshake outcome.
    pub fn register_reconnect(&mut self, uid: u8, gproxy_state: GproxyState, reconnect_key: u32) {
        self.reconnect.register(uid, gproxy_state, reconnect_key);
    }

    /// The socket dropped without a LEAVEGAME. Keep the slot pending
    /// reconnect instead of evicting, and pad the action history with empty
    /// frames so GProxy clients' own local buffers don't stall waiting for
    /// real traffic during the gap.
    pub fn disconnect_user(&mut self, uid: u8, now_ms: u64) {
        if let Some(user) = self.users.get_mut(&uid) {
            user.disconnected = true;
        }
        self.reconnect.mark_disconnected(uid, now_ms);
        for _ in 0..self.history.gproxy_empty_actions {
            self.action_engine.queue_action(uid, Vec::new());
        }
    }

    /// A `GPS_RECONNECT` presented on a fresh connection. On success, the
    /// caller replays the returned bytes to the rejoining socket and forgives
    /// `offset` missed keep-alives against the user's sync counter.
    pub fn reconnect_user(
        &mut self,
        uid: u8,
        reconnect_key: u32,
        last_received_packet: u64,
        now_ms: u64,
    ) -> Result<(Vec<&[u8]>, u32), ReconnectRejectReason> {
        let ticks_per_keepalive = self.config.latency_default_ms.max(1) as u64;
        let (replay, offset) = self.reconnect.reconnect(
            uid,
            reconnect_key,
            last_received_packet,
            &self.history,
            now_ms,
            ticks_per_keepalive,
        )?;
        if let Some(user) = self.users.get_mut(&uid) {
            user.disconnected = false;
            user.sync_counter_offset += offset;
        }
        Ok((replay, offset))
    }

    /// An `OUTGOING_KEEPALIVE` checksum report. Advances `sync_counter`,
    /// records the checksum, and once every connected user has reported at
    /// the current compare position, runs the majority check.
    pub fn on_outgoing_keepalive(&mut self, uid: u8, checksum: u32) -> Vec<GameEvent> {
        let mut events = Vec::new();
        if let Some(user) = self.users.get_mut(&uid) {
            user.sync_counter += 1;
        }
        self.lag_manager.record_checksum(uid, checksum);

        let position = self.lag_manager.current_position();
        let all_reported = !self.users.is_empty()
            && self.users.keys().all(|&u| self.lag_manager.has_checksum_at(u, position));
        if all_reported {
            let mismatched = self.lag_manager.check_desync(position);
            self.lag_manager.advance_compare_position();
            if !mismatched.is_empty() {
                self.history.mark_desynchronized();
                let wire = protocol::encode_desync_notify(&mismatched);
                events.push(GameEvent::Desynchronized(mismatched, wire));
            }
        }
        events
    }

    fn tick_lobby(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        let lobby_age_ms = now_ms.saturating_sub(self.created_at_ms);
        if self.owner.is_none() && lobby_age_ms >= self.config.lobby_timeout_secs * 1000 {
            self.end_game(events);
            return;
        }
        if self.owner.is_some() {
            let owner_absent_ms = now_ms.saturating_sub(self.last_owner_seen_ms);
            if owner_absent_ms >= self.config.lobby_owner_timeout_secs * 1000 {
                self.end_game(events);
            }
        }
    }

    fn tick_countdown(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        let Some(started) = self.countdown_started_at_ms else {
            return;
        };
        if self.countdown_start_pending {
            self.countdown_start_pending = false;
            events.push(GameEvent::CountdownStart(protocol::encode_countdown_start()));
        }
        let elapsed = now_ms.saturating_sub(started);
        let ticks_elapsed = elapsed / self.config.countdown_tick_ms.max(1);
        if ticks_elapsed >= self.config.countdown_ticks as u64 {
            events.push(GameEvent::CountdownEnd(protocol::encode_countdown_end()));
            self.phase = GamePhase::Loading;
            self.loading_started_at_ms = Some(now_ms);
            self.loaded_uids.clear();

            // Virtual occupants never report GAMELOADED_SELF; present them
            // as already loaded the moment loading starts.
            let virtual_uids: Vec<u8> = self
                .slots
                .slots()
                .iter()
                .filter(|s| s.slot_type == SlotType::Virtual)
                .map(|s| s.uid)
                .collect();
            for uid in virtual_uids {
                self.loaded_uids.insert(uid);
                let wire = protocol::encode_game_loaded_others(uid);
                self.history.loading_virtual_buffer.extend_from_slice(&wire);
                events.push(GameEvent::GameLoadedOthers(uid, wire));
            }
        }
    }

    fn tick_loading(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        let Some(started) = self.loading_started_at_ms else {
            self.loading_started_at_ms = Some(now_ms);
            return;
        };
        if now_ms.saturating_sub(started) >= self.config.loading_timeout_secs * 1000 {
            for (&uid, user) in self.users.iter_mut() {
                if !user.finished_loading {
                    user.kick_reasons |= crate::user::KickReasons::HIGH_PING;
                    events.push(GameEvent::Kick(uid, TimeoutError::LoadingTimeout));
                }
            }
        }

        match self.config.loading_mode {
            LoadingMode::Standard => {
                if self.all_loaded() {
                    let real_uids: Vec<u8> = self
                        .loaded_uids
                        .iter()
                        .copied()
                        .filter(|uid| self.users.contains_key(uid))
                        .collect();
                    for uid in real_uids {
                        let wire = protocol::encode_game_loaded_others(uid);
                        self.history.loading_real_buffer.extend_from_slice(&wire);
                        events.push(GameEvent::GameLoadedOthers(uid, wire));
                    }
                    self.phase = GamePhase::Playing;
                }
            }
            LoadingMode::LoadInGame => {
                if !self.loaded_uids.is_empty() {
                    self.phase = GamePhase::Playing;
                }
            }
        }
    }

    fn tick_playing(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        let playing_elapsed_ms = now_ms.saturating_sub(self.loading_started_at_ms.unwrap_or(now_ms));
        if playing_elapsed_ms >= self.config.playing_timeout_secs * 1000 {
            self.end_game(events);
            return;
        }

        self.action_engine.check_resume();
        let drained = self.action_engine.drain_ready(now_ms);
        for frame in drained {
            let bytes = frame.serialize(self.action_engine.latency_ms());
            self.history.append(bytes.clone());
            self.broadcast_counter += 1;
            events.push(GameEvent::Frame(bytes));
            match frame.callback() {
                FrameCallback::Leaver(uid) => {
                    events.push(GameEvent::PlayerLeaveOthers(uid, protocol::encode_player_leave_others(uid, 1)));
                }
                FrameCallback::Pause => self.action_engine.set_paused(true),
                FrameCallback::Resume => self.action_engine.set_paused(false),
                FrameCallback::None => {}
            }
        }

        let uids: Vec<u8> = self.users.keys().copied().collect();
        let mut newly_lagging = Vec::new();
        for uid in uids {
            let user = self.users.get_mut(&uid).unwrap();
            let (state, transition) = self.lag_manager.evaluate(
                self.broadcast_counter,
                user.normal_sync_counter(),
                user.lag_state,
            );
            user.lag_state = state;
            match transition {
                crate::lag_manager::LagTransition::EnteredLagging => newly_lagging.push(uid),
                crate::lag_manager::LagTransition::ExitedLagging { .. } => {
                    events.push(GameEvent::StopLag(uid, protocol::encode_stop_lag(uid)));
                }
                crate::lag_manager::LagTransition::None => {}
            }
        }
        if !newly_lagging.is_empty() {
            let wire = protocol::encode_start_lag(&newly_lagging);
            events.push(GameEvent::StartLag(wire));
        }

        if self.users.is_empty() {
            self.end_game(events);
        }
    }

    fn end_game(&mut self, events: &mut Vec<GameEvent>) {
        self.phase = GamePhase::Ended;
        if self.discovery_announced {
            let event = self.discovery.close_lobby();
            let wire = protocol::encode_decreate_game(self.host_counter);
            events.push(GameEvent::Discovery(event, wire));
        }
        events.push(GameEvent::GameEnded);
        self.delete_me = true;
    }

    pub fn open_discovery(&mut self, now_ms: u64) -> DiscoveryEvent {
        self.discovery.open_lobby(now_ms)
    }

    pub fn user_left(&mut self, uid: u8) {
        self.action_engine.attach_leaver_callback(uid);
        self.users.remove(&uid);
    }

    /// Serialize the slot table to the wire format a `Persistence`
    /// collaborator stores across a restart.
    pub fn snapshot_slots(&self) -> Vec<u8> {
        let snapshot: Vec<SlotSnapshot> = self.slots.slots().iter().map(SlotSnapshot::from).collect();
        serde_json::to_vec(&snapshot).expect("slot snapshot fields are all directly serializable")
    }

    /// Hand the current slot snapshot to a `Persistence` collaborator.
    pub fn save_via(&self, persistence: &dyn crate::collab::Persistence) {
        persistence.save_slots(self.host_counter, &self.snapshot_slots());
    }

    /// Parse a previously saved snapshot back into per-slot field rows,
    /// without touching `self` — the caller re-applies them through
    /// `SlotTable::virtual_fill`/`join` since a restored user still needs a
    /// live connection seated before it can resume play.
    pub fn parse_snapshot(bytes: &[u8]) -> Result<Vec<SlotSnapshot>, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// One slot's persisted fields. Deliberately a plain mirror of `Slot` rather
/// than deriving `Serialize`/`Deserialize` on `Slot` itself, so the wire
/// schema doesn't shift every time an in-memory field is added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub uid: u8,
    pub team: u8,
    pub color: u8,
    pub race_bits: u8,
    pub handicap: u8,
    pub occupied: bool,
}

impl From<&w3gs_common::slot::Slot> for SlotSnapshot {
    fn from(slot: &w3gs_common::slot::Slot) -> Self {
        SlotSnapshot {
            uid: slot.uid,
            team: slot.team,
            color: slot.color,
            race_bits: slot.race.bits(),
            handicap: slot.handicap,
            occupied: slot.status == SlotStatus::Occupied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use w3gs_common::slot::LayoutKind;

    use crate::collab::NoopCollaborators;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    fn sample_map() -> Map {
        Map::new(
            "Maps\\Test.w3x",
            0xDEAD_BEEF,
            [0u8; 20],
            0xC0FF_EE,
            128,
            128,
            0,
            LayoutKind::Melee,
            23,
            12,
        )
    }

    fn sample_game() -> Game {
        Game::new(1, 0x1234_5678, sample_map(), "Host", Some("Host".into()), GameConfig::default(), 0)
    }

    #[test]
    fn starts_in_lobby() {
        let g = sample_game();
        assert_eq!(g.phase, GamePhase::Lobby);
    }

    #[test]
    fn random_seed_is_assigned_at_construction() {
        // Two independently constructed games draw independent seeds; a
        // shared fixed default would make every instance collide.
        let seeds: std::collections::HashSet<u32> =
            (0..8).map(|_| sample_game().random_seed).collect();
        assert!(seeds.len() > 1);
    }

    #[test]
    fn countdown_then_loading_transition() {
        let mut g = sample_game();
        g.start_countdown(0).unwrap();
        let mut events = Vec::new();
        for t in 0..6 {
            events.extend(g.tick(t * g.config.countdown_tick_ms, &NoopCollaborators));
        }
        assert_eq!(g.phase, GamePhase::Loading);
        assert!(events.iter().any(|e| matches!(e, GameEvent::CountdownEnd(_))));
    }

    #[test]
    fn cannot_start_countdown_twice() {
        let mut g = sample_game();
        g.start_countdown(0).unwrap();
        assert!(g.start_countdown(0).is_err());
    }

    #[test]
    fn lobby_without_owner_times_out() {
        let mut g = Game::new(1, 1, sample_map(), "Host", None, GameConfig::default(), 0);
        let events = g.tick(g.config.lobby_timeout_secs * 1000, &NoopCollaborators);
        assert!(events.contains(&GameEvent::GameEnded));
    }

    #[test]
    fn standard_loading_waits_for_everyone() {
        let mut g = sample_game();
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        let u2 = User::new(2, 1, "B", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        g.join_user(2, u2, 1, 1).unwrap();
        g.phase = GamePhase::Loading;
        g.loading_started_at_ms = Some(0);
        g.gameloaded_self(1, 10);
        let events = g.tick(10, &NoopCollaborators);
        assert_eq!(g.phase, GamePhase::Loading);
        assert!(!events.iter().any(|e| matches!(e, GameEvent::GameLoadedOthers(_, _))));
        g.gameloaded_self(2, 20);
        let events2 = g.tick(20, &NoopCollaborators);
        assert_eq!(g.phase, GamePhase::Playing);
        assert!(events2.iter().any(|e| matches!(e, GameEvent::GameLoadedOthers(_, _))));
    }

    #[test]
    fn load_in_game_transitions_on_first_loader() {
        let mut cfg = GameConfig::default();
        cfg.loading_mode = LoadingMode::LoadInGame;
        let mut g = Game::new(1, 1, sample_map(), "Host", Some("Host".into()), cfg, 0);
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        g.phase = GamePhase::Loading;
        g.loading_started_at_ms = Some(0);
        g.gameloaded_self(1, 10);
        g.tick(10, &NoopCollaborators);
        assert_eq!(g.phase, GamePhase::Playing);
    }

    #[test]
    fn virtual_occupant_is_presented_as_already_loaded() {
        let mut g = sample_game();
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        g.slots.virtual_fill(1, 250, 0, 1).unwrap();
        g.start_countdown(0).unwrap();
        for t in 0..6 {
            g.tick(t * g.config.countdown_tick_ms, &NoopCollaborators);
        }
        assert_eq!(g.phase, GamePhase::Loading);
        assert!(g.loaded_uids.contains(&250));
        assert!(!g.history.loading_virtual_buffer.is_empty());

        g.gameloaded_self(1, 10);
        let events = g.tick(10, &NoopCollaborators);
        assert_eq!(g.phase, GamePhase::Playing);
        assert!(events.iter().any(|e| matches!(e, GameEvent::GameLoadedOthers(1, _))));
        assert!(!events.iter().any(|e| matches!(e, GameEvent::GameLoadedOthers(250, _))));
        assert!(!g.history.loading_real_buffer.is_empty());
    }

    #[test]
    fn playing_emits_empty_frames_on_cadence() {
        let mut g = sample_game();
        g.phase = GamePhase::Playing;
        g.loading_started_at_ms = Some(0);
        let events = g.tick(g.config.latency_default_ms as u64, &NoopCollaborators);
        assert!(events.iter().any(|e| matches!(e, GameEvent::Frame(_))));
    }

    #[test]
    fn playing_times_out_and_ends() {
        let mut g = sample_game();
        g.phase = GamePhase::Playing;
        g.loading_started_at_ms = Some(0);
        let events = g.tick(g.config.playing_timeout_secs * 1000, &NoopCollaborators);
        assert!(events.contains(&GameEvent::GameEnded));
    }

    #[test]
    fn pause_halts_cadence_and_resume_restarts_it() {
        let mut g = sample_game();
        g.phase = GamePhase::Playing;
        g.loading_started_at_ms = Some(0);
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        g.action_engine.set_remaining_pauses(1, 1);
        g.action_engine.queue_action(1, vec![0x01]);
        let latency = g.config.latency_default_ms as u64;

        let events = g.tick(latency, &NoopCollaborators);
        assert!(g.action_engine.is_paused());
        assert!(events.iter().any(|e| matches!(e, GameEvent::Frame(_))));

        let stalled = g.tick(latency * 2, &NoopCollaborators);
        assert!(g.action_engine.is_paused());
        assert!(!stalled.iter().any(|e| matches!(e, GameEvent::Frame(_))));

        g.action_engine.queue_action(1, vec![0x02]);
        let resumed = g.tick(latency * 3, &NoopCollaborators);
        assert!(!g.action_engine.is_paused());
        assert!(resumed.iter().any(|e| matches!(e, GameEvent::Frame(_))));
    }

    #[test]
    fn leaving_user_emits_player_leave_others_wire_frame() {
        let mut g = sample_game();
        g.phase = GamePhase::Playing;
        g.loading_started_at_ms = Some(0);
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        g.user_left(1);
        let latency = g.config.latency_default_ms as u64;
        let events = g.tick(latency, &NoopCollaborators);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::PlayerLeaveOthers(1, _))));
    }

    struct FixedMapSource {
        size: u64,
        chunk: Vec<u8>,
    }

    impl crate::collab::MapSource for FixedMapSource {
        fn resolve(&self, _path: &str) -> Option<Map> {
            None
        }
        fn read_chunk(&self, _path: &str, _offset: u64, len: usize) -> Option<Vec<u8>> {
            Some(self.chunk[..len.min(self.chunk.len())].to_vec())
        }
        fn file_size(&self, _path: &str) -> Option<u64> {
            Some(self.size)
        }
    }

    #[test]
    fn tick_drives_map_transfer_for_a_pending_download() {
        let mut g = sample_game();
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        let source = FixedMapSource { size: 10_000, chunk: vec![0xAB; 1442] };

        let events = g.tick(0, &source);
        assert!(g.map_transfer.is_some());
        assert!(!events.iter().any(|e| matches!(e, GameEvent::MapPart(_, _))));

        let events2 = g.handle_map_size(1, MapSizeReport::ContinueDownload { offset: 0 }, 0);
        assert!(events2.iter().any(|e| matches!(e, GameEvent::StartDownload(1, _))));

        let events3 = g.tick(1, &source);
        assert!(events3.iter().any(|e| matches!(e, GameEvent::MapPart(1, _))));
    }

    #[test]
    fn user_without_map_is_kicked_after_grace_period() {
        let mut g = sample_game();
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        let source = FixedMapSource { size: 10_000, chunk: vec![0xAB; 1442] };
        let grace_ms = g.config.lacks_map_kick_delay_secs * 1000;

        g.tick(0, &source);
        let events = g.tick(grace_ms, &source);
        assert!(events.iter().any(|e| matches!(e, GameEvent::Kick(1, TimeoutError::MapMissing))));
    }

    #[test]
    fn outgoing_keepalive_emits_desync_notice_on_checksum_mismatch() {
        let mut g = sample_game();
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        let u2 = User::new(2, 1, "B", 1, ip(), ip(), 23, 3);
        let u3 = User::new(3, 2, "C", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        g.join_user(2, u2, 0, 1).unwrap();
        g.join_user(3, u3, 0, 2).unwrap();

        g.on_outgoing_keepalive(1, 0xAA);
        g.on_outgoing_keepalive(2, 0xAA);
        let events = g.on_outgoing_keepalive(3, 0xBB);

        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::Desynchronized(mismatched, _) if mismatched == &vec![3])));
        assert!(g.history.desynchronized);
    }

    #[test]
    fn disconnect_then_reconnect_restores_offset_and_replays_history() {
        let mut g = sample_game();
        let u1 = User::new(1, 0, "A", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 0, 0).unwrap();
        g.register_reconnect(1, GproxyState::Legacy, 0xC0FFEE);
        g.history.append(vec![1, 2, 3]);
        g.history.append(vec![4, 5, 6]);

        g.disconnect_user(1, 100);
        assert!(g.users.get(&1).unwrap().disconnected);

        let (replay, offset) = g.reconnect_user(1, 0xC0FFEE, 0, 150).unwrap();
        assert!(!replay.is_empty());
        let _ = offset;
        assert!(!g.users.get(&1).unwrap().disconnected);
    }

    #[test]
    fn slot_snapshot_round_trips_through_persistence() {
        let mut g = sample_game();
        let u1 = User::new(1, 0, "Alice", 1, ip(), ip(), 23, 3);
        g.join_user(1, u1, 3, 5).unwrap();

        let persisted = std::sync::Mutex::new(None);
        struct Capturing<'a>(&'a std::sync::Mutex<Option<Vec<u8>>>);
        impl crate::collab::Persistence for Capturing<'_> {
            fn save_slots(&self, _game_id: u32, snapshot: &[u8]) {
                *self.0.lock().unwrap() = Some(snapshot.to_vec());
            }
            fn load_slots(&self, _game_id: u32) -> Option<Vec<u8>> {
                self.0.lock().unwrap().clone()
            }
        }
        use crate::collab::Persistence;
        let persistence = Capturing(&persisted);
        g.save_via(&persistence);

        let bytes = persistence.load_slots(g.host_counter).expect("snapshot was saved");
        let rows = Game::parse_snapshot(&bytes).unwrap();
        let occupied = rows.iter().find(|r| r.occupied).expect("one occupied slot");
        assert_eq!(occupied.team, 3);
        assert_eq!(occupied.color, 5);
    }

    #[test]
    fn first_tick_announces_the_lobby_and_ending_retracts_it() {
        let mut g = sample_game();
        let events = g.tick(0, &NoopCollaborators);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::Discovery(DiscoveryEvent::CreateGame, wire) if !wire.is_empty())));

        // A second tick, lobby still open, must not re-announce creation.
        let events2 = g.tick(1, &NoopCollaborators);
        assert!(!events2
            .iter()
            .any(|e| matches!(e, GameEvent::Discovery(DiscoveryEvent::CreateGame, _))));

        // No users ever joined; transitioning into Playing with an empty
        // roster ends the game on the very next tick.
        g.phase = GamePhase::Playing;
        g.loading_started_at_ms = Some(0);
        let events3 = g.tick(g.config.latency_default_ms as u64, &NoopCollaborators);
        assert!(events3
            .iter()
            .any(|e| matches!(e, GameEvent::Discovery(DiscoveryEvent::DecreateGame, wire) if !wire.is_empty())));
        assert!(events3.contains(&GameEvent::GameEnded));
    }
}
