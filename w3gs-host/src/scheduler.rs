// scheduler.rs — the bot's outer tick loop: walks every hosted Game once per
// pass, sweeping `delete_me` games before ticking the rest.
//
// Grounded on mattx86-myq2-rust's `sv_main.rs` `sv_frame`/`host_frame` pair:
// a single-threaded loop over a fixed client/game table, non-blocking, with
// a wall-clock budget check (`perf_threshold` here, the original `sv_fps`-
// derived frame budget there) logged rather than enforced — a slow tick
// runs to completion, it just gets flagged.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::collab::{MapSource, NoopCollaborators};
use crate::game::{Game, GameEvent};

/// IPs/names banned process-wide, consulted by every hosted game's
/// `connection::admit`. Shared with `RwLock` rather than per-game copies,
/// since a ban issued against one game should apply to the next lobby too.
#[derive(Default)]
pub struct BanList {
    ips: RwLock<Vec<IpAddr>>,
    names: RwLock<Vec<String>>,
}

impl BanList {
    pub fn ban_ip(&self, ip: IpAddr) {
        let mut ips = self.ips.write();
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }

    pub fn ban_name(&self, name: impl Into<String>) {
        let mut names = self.names.write();
        let name = name.into();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    pub fn banned_ips(&self) -> Vec<IpAddr> {
        self.ips.read().clone()
    }

    pub fn banned_names(&self) -> Vec<String> {
        self.names.read().clone()
    }
}

pub struct Scheduler {
    games: HashMap<u32, Game>,
    next_host_counter: u32,
    perf_threshold_ms: u64,
    map_source: Arc<dyn MapSource>,
    pub bans: BanList,
}

impl Scheduler {
    pub fn new(perf_threshold_ms: u64) -> Self {
        Scheduler {
            games: HashMap::new(),
            next_host_counter: 1,
            perf_threshold_ms,
            map_source: Arc::new(NoopCollaborators),
            bans: BanList::default(),
        }
    }

    pub fn with_map_source(perf_threshold_ms: u64, map_source: Arc<dyn MapSource>) -> Self {
        Scheduler {
            games: HashMap::new(),
            next_host_counter: 1,
            perf_threshold_ms,
            map_source,
            bans: BanList::default(),
        }
    }

    /// Seat a freshly-created game under a new host_counter and return it.
    pub fn host(&mut self, mut game: Game) -> u32 {
        let host_counter = self.next_host_counter;
        self.next_host_counter += 1;
        game.host_counter = host_counter;
        self.games.insert(host_counter, game);
        host_counter
    }

    pub fn get(&self, host_counter: u32) -> Option<&Game> {
        self.games.get(&host_counter)
    }

    pub fn get_mut(&mut self, host_counter: u32) -> Option<&mut Game> {
        self.games.get_mut(&host_counter)
    }

    pub fn unhost(&mut self, host_counter: u32) {
        if let Some(game) = self.games.get_mut(&host_counter) {
            game.delete_me = true;
        }
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Advance every hosted game by one outer tick: reap anything
    /// flagged `delete_me` from the previous pass first, then tick what
    /// remains. Returns each surviving game's emitted events keyed by
    /// host_counter.
    pub fn tick_all(&mut self, now_ms: u64) -> Vec<(u32, Vec<GameEvent>)> {
        let start = Instant::now();

        self.games.retain(|_, game| !game.delete_me);

        let mut results = Vec::with_capacity(self.games.len());
        for (&host_counter, game) in self.games.iter_mut() {
            let events = game.tick(now_ms, self.map_source.as_ref());
            if !events.is_empty() {
                results.push((host_counter, events));
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > self.perf_threshold_ms {
            tracing::warn!(
                elapsed_ms,
                threshold_ms = self.perf_threshold_ms,
                game_count = self.games.len(),
                "scheduler tick exceeded perf_threshold"
            );
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use w3gs_common::map::Map;
    use w3gs_common::slot::LayoutKind;

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

    fn sample_game(now_ms: u64) -> Game {
        Game::new(0, 0x1234, sample_map(), "Host", Some("Host".into()), GameConfig::default(), now_ms)
    }

    #[test]
    fn hosting_assigns_ascending_host_counters() {
        let mut s = Scheduler::new(30);
        let a = s.host(sample_game(0));
        let b = s.host(sample_game(0));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn unhost_is_reaped_on_next_tick() {
        let mut s = Scheduler::new(30);
        let id = s.host(sample_game(0));
        s.unhost(id);
        assert_eq!(s.len(), 1);
        s.tick_all(0);
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn tick_all_reports_events_for_active_games() {
        let mut s = Scheduler::new(30);
        let id = s.host(sample_game(0));
        s.get_mut(id).unwrap().start_countdown(0).unwrap();
        let results = s.tick_all(0);
        assert!(results.iter().any(|(h, _)| *h == id));
    }

    #[test]
    fn quiet_games_produce_no_result_entry() {
        let mut s = Scheduler::new(30);
        s.host(sample_game(0));
        let results = s.tick_all(0);
        assert!(results.is_empty());
    }

    #[test]
    fn ban_list_is_idempotent_and_shared_process_wide() {
        use std::net::Ipv4Addr;
        let s = Scheduler::new(30);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        s.bans.ban_ip(ip);
        s.bans.ban_ip(ip);
        assert_eq!(s.bans.banned_ips(), vec![ip]);
        s.bans.ban_name("Spoofer");
        assert_eq!(s.bans.banned_names(), vec!["Spoofer".to_string()]);
    }
}
