// user.rs — the User/Spectator data model.
//
// Grounded on mattx86-myq2-rust's `server.rs` client_t-equivalent struct
// layout (plain public fields, enum state, small helper methods) and on
// q_shared.rs's bitflags style for `kick_reasons`.

use bitflags::bitflags;
use std::collections::VecDeque;
use std::net::IpAddr;

use crate::rate_limiter::TokenBucket;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct KickReasons: u8 {
        const MAP_MISSING = 0x01;
        const HIGH_PING   = 0x02;
        const SPOOFER     = 0x04;
        const ABUSER      = 0x08;
        const ANTISHARE   = 0x10;
    }
}

pub const RTT_SAMPLE_CAPACITY: usize = 10;

#[derive(Debug, Default)]
pub struct RttRing {
    samples: VecDeque<u32>,
}

impl RttRing {
    pub fn push(&mut self, rtt_ms: u32) {
        if self.samples.len() == RTT_SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    pub fn average(&self) -> Option<u32> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|&v| v as u64).sum();
        Some((sum / self.samples.len() as u64) as u32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GproxyState {
    None,
    Legacy,
    Extended { version: u32 },
}

impl GproxyState {
    pub fn is_gproxy(self) -> bool {
        !matches!(self, GproxyState::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagState {
    Normal,
    Lagging,
}

/// A human participant holding a player/observer slot.
#[derive(Debug)]
pub struct User {
    pub uid: u8,
    pub slot_index: usize,
    pub name: String,
    pub host_counter_claimed: u32,
    pub external_ip: IpAddr,
    pub internal_ip_claimed: IpAddr,
    pub game_version_claimed: u32,

    pub sync_counter: u32,
    pub sync_counter_offset: u32,
    pub rtt_samples: RttRing,
    pub download_pct: u8,
    pub map_checked: bool,
    pub map_ready: bool,
    pub finished_loading: bool,
    pub started_lagging_ticks: Option<u64>,
    pub lag_state: LagState,
    pub kick_reasons: KickReasons,
    pub on_hold_actions: VecDeque<Vec<u8>>,
    pub gproxy_state: GproxyState,
    pub gproxy_reconnect_key: u32,
    pub gproxy_last_ack: u32,
    pub apm_bucket: Option<TokenBucket>,
    pub remaining_pauses: u32,
    pub disconnected: bool,
    pub delete_me: bool,
}

impl User {
    pub fn new(
        uid: u8,
        slot_index: usize,
        name: impl Into<String>,
        host_counter_claimed: u32,
        external_ip: IpAddr,
        internal_ip_claimed: IpAddr,
        game_version_claimed: u32,
        remaining_pauses: u32,
    ) -> Self {
        User {
            uid,
            slot_index,
            name: name.into(),
            host_counter_claimed,
            external_ip,
            internal_ip_claimed,
            game_version_claimed,
            sync_counter: 0,
            sync_counter_offset: 0,
            rtt_samples: RttRing::default(),
            download_pct: 0,
            map_checked: false,
            map_ready: false,
            finished_loading: false,
            started_lagging_ticks: None,
            lag_state: LagState::Normal,
            kick_reasons: KickReasons::empty(),
            on_hold_actions: VecDeque::new(),
            gproxy_state: GproxyState::None,
            gproxy_reconnect_key: 0,
            gproxy_last_ack: 0,
            apm_bucket: None,
            remaining_pauses,
            disconnected: false,
            delete_me: false,
        }
    }

    /// `normal_sync_counter = sync_counter + sync_counter_offset`.
    pub fn normal_sync_counter(&self) -> u32 {
        self.sync_counter + self.sync_counter_offset
    }

    pub fn should_kick(&self) -> bool {
        !self.kick_reasons.is_empty()
    }
}

/// An async observer: receives the broadcast, contributes nothing.
#[derive(Debug)]
pub struct Spectator {
    pub uid: u8,
    pub name: String,
    pub external_ip: IpAddr,
    pub history_cursor: usize,
    pub map_checked: bool,
    pub map_ready: bool,
    pub finished_loading: bool,
}

impl Spectator {
    pub fn new(uid: u8, name: impl Into<String>, external_ip: IpAddr) -> Self {
        Spectator {
            uid,
            name: name.into(),
            external_ip,
            history_cursor: 0,
            map_checked: false,
            map_ready: false,
            finished_loading: false,
        }
    }
}
