// reconnect.rs — ReconnectRegistry: GProxy Legacy/Extended reconnect
// handshakes replayed against GameHistory.
//
// Grounded on mattx86-myq2-rust's net_chan.rs reliable-transmit concept
// (sequence-numbered delivery with a resend-on-gap notion) generalized here
// to a whole-session replay keyed by GameHistory's packet counter instead of
// a single in-flight packet.

use std::collections::HashMap;

use crate::history::GameHistory;
use crate::user::GproxyState;
use w3gs_common::gps::GpsMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectRejectReason {
    UidMismatch,
    KeyMismatch,
    WindowExpired,
}

struct RegisteredUser {
    reconnect_key: u32,
    gproxy_state: GproxyState,
    disconnected_at_tick: Option<u64>,
}

pub struct ReconnectRegistry {
    users: HashMap<u8, RegisteredUser>,
    playing_timeout_ticks: u64,
}

impl ReconnectRegistry {
    pub fn new(playing_timeout_ticks: u64) -> Self {
        ReconnectRegistry {
            users: HashMap::new(),
            playing_timeout_ticks,
        }
    }

    /// Register a user's GPS_INIT handshake outcome: issues the
    /// 32-bit `reconnect_key` the caller should send back in GPS_ACK-style
    /// confirmation.
    pub fn register(&mut self, uid: u8, gproxy_state: GproxyState, reconnect_key: u32) {
        self.users.insert(
            uid,
            RegisteredUser {
                reconnect_key,
                gproxy_state,
                disconnected_at_tick: None,
            },
        );
    }

    pub fn mark_disconnected(&mut self, uid: u8, tick: u64) {
        if let Some(user) = self.users.get_mut(&uid) {
            user.disconnected_at_tick = Some(tick);
        }
    }

    pub fn is_awaiting_reconnect(&self, uid: u8) -> bool {
        self.users
            .get(&uid)
            .map(|u| u.disconnected_at_tick.is_some())
            .unwrap_or(false)
    }

    /// Handle a `GPS_RECONNECT` presented on a new connection. On success,
    /// returns the replay bytes to send and the `sync_counter_offset` to
    /// forgive missed keep-alives.
    pub fn reconnect<'a>(
        &mut self,
        uid: u8,
        reconnect_key: u32,
        last_received_packet: u64,
        history: &'a GameHistory,
        current_tick: u64,
        ticks_per_keepalive: u64,
    ) -> Result<(Vec<&'a [u8]>, u32), ReconnectRejectReason> {
        let Some(user) = self.users.get_mut(&uid) else {
            return Err(ReconnectRejectReason::UidMismatch);
        };
        if user.reconnect_key != reconnect_key {
            return Err(ReconnectRejectReason::KeyMismatch);
        }
        let Some(disconnected_at) = user.disconnected_at_tick else {
            return Err(ReconnectRejectReason::UidMismatch);
        };
        let window_ticks = match user.gproxy_state {
            GproxyState::Legacy => Some(self.playing_timeout_ticks),
            GproxyState::Extended { .. } => None,
            GproxyState::None => Some(0),
        };
        if let Some(window) = window_ticks {
            if current_tick.saturating_sub(disconnected_at) > window {
                return Err(ReconnectRejectReason::WindowExpired);
            }
        }

        let elapsed_ticks = current_tick.saturating_sub(disconnected_at);
        let missed_keepalives = if ticks_per_keepalive == 0 {
            0
        } else {
            (elapsed_ticks / ticks_per_keepalive) as u32
        };

        user.disconnected_at_tick = None;
        Ok((history.replay_since(last_received_packet), missed_keepalives))
    }

    pub fn gps_reject(reason: ReconnectRejectReason) -> GpsMessage {
        GpsMessage::Reject {
            reason: match reason {
                ReconnectRejectReason::UidMismatch => 1,
                ReconnectRejectReason::KeyMismatch => 2,
                ReconnectRejectReason::WindowExpired => 3,
            },
        }
    }
}
