// discovery.rs — DiscoveryPublisher: timer-driven UDP LAN/WAN announcements.
//
// Grounded on mattx86-myq2-rust's `ServerTiming` (sv_main.rs): a small
// struct owning its own cadence state (`enabled`, last-fired timestamp)
// queried once per tick rather than driven by a dedicated timer thread,
// matching this crate's single-threaded cooperative scheduler.

use std::net::SocketAddr;

use w3gs_common::map::Map;
use w3gs_common::statstring;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    CreateGame,
    RefreshGame { players: u8, slots: u8 },
    GameInfo { to: Option<SocketAddr> },
    DecreateGame,
}

pub struct DiscoveryPublisher {
    refresh_interval_ms: u64,
    last_refresh_ms: u64,
    pub extra_addrs: Vec<SocketAddr>,
    lobby_open: bool,
}

impl DiscoveryPublisher {
    pub fn new(refresh_interval_ms: u64, extra_addrs: Vec<SocketAddr>) -> Self {
        DiscoveryPublisher {
            refresh_interval_ms,
            last_refresh_ms: 0,
            extra_addrs,
            lobby_open: false,
        }
    }

    pub fn open_lobby(&mut self, now_ms: u64) -> DiscoveryEvent {
        self.lobby_open = true;
        self.last_refresh_ms = now_ms;
        DiscoveryEvent::CreateGame
    }

    pub fn close_lobby(&mut self) -> DiscoveryEvent {
        self.lobby_open = false;
        DiscoveryEvent::DecreateGame
    }

    /// Called once per tick; returns a REFRESHGAME event if the interval has
    /// elapsed while the lobby remains open.
    pub fn poll(&mut self, now_ms: u64, players: u8, slots: u8) -> Option<DiscoveryEvent> {
        if !self.lobby_open {
            return None;
        }
        if now_ms.saturating_sub(self.last_refresh_ms) < self.refresh_interval_ms {
            return None;
        }
        self.last_refresh_ms = now_ms;
        Some(DiscoveryEvent::RefreshGame { players, slots })
    }

    /// Build the GAMEINFO stat string for a SEARCHGAME reply, or the extra
    /// discovery unicast fan-out.
    pub fn build_gameinfo_payload(
        &self,
        map: &Map,
        game_name: &str,
        host_name: &str,
    ) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&map.flags.to_le_bytes());
        raw.push(0);
        raw.extend_from_slice(&map.width.to_le_bytes());
        raw.extend_from_slice(&map.height.to_le_bytes());
        raw.extend_from_slice(&map.blizz_hash.to_le_bytes());
        raw.extend_from_slice(map.path.as_bytes());
        raw.push(0);
        raw.extend_from_slice(host_name.as_bytes());
        raw.push(0);

        let mut payload = Vec::new();
        payload.extend_from_slice(game_name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&statstring::encode(&raw));
        payload.push(0);
        payload
    }
}
