// connection.rs — per-TCP-connection state machine and REQJOIN admission
// policy.
//
// Grounded on mattx86-myq2-rust's `server.rs` `ClientState` enum
// (Free/Zombie/Connected/Spawned) for the state-machine shape, and on
// `sv_main.rs`'s `svc_direct_connect` for the step-ordered admission-check
// idiom (validate in sequence, bail out with a specific rejection on the
// first failing check).

use std::net::IpAddr;

use w3gs_common::error::AdmissionError;

use crate::config::{CrossPlayMode, GameConfig, NameHandling};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyPhase {
    Lobby,
    Loading,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Seeking,
    Joined(LobbyPhase),
    Leaving,
}

/// What a freshly-accepted socket turns out to be, once its first message
/// classifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekerClassification {
    User,
    Spectator,
    VlanSearcher,
    UdpTunnel,
}

pub struct JoinRequest<'a> {
    pub host_counter: u32,
    pub entry_key: u32,
    pub name: &'a str,
    pub remote_ip: IpAddr,
    pub game_version: u32,
    pub is_loopback: bool,
}

pub struct AdmissionContext<'a> {
    pub expected_host_counter: u32,
    pub expected_entry_key: Option<u32>,
    pub host_game_version: u32,
    pub live_names: &'a [String],
    pub same_ip_count: u32,
    pub loopback_count: u32,
    pub game_phase: LobbyPhase,
    pub has_free_slot: bool,
    pub has_pending_reconnect_slot: bool,
    pub banned_ips: &'a [IpAddr],
    pub banned_names: &'a [String],
}

/// A sanitized/validated name, or the verdict that admission must stop here.
pub enum NameOutcome {
    Use(String),
    Reject(AdmissionError),
}

fn sanitize_name(name: &str, handler: NameHandling) -> NameOutcome {
    let has_banned_char = name.is_empty() || name.bytes().any(|b| b < 0x20 || b == b'|');
    if !has_banned_char {
        return NameOutcome::Use(name.to_string());
    }
    match handler {
        NameHandling::Deny => NameOutcome::Reject(AdmissionError::Banned),
        NameHandling::Allow => NameOutcome::Use(name.to_string()),
        NameHandling::Censor => {
            let censored: String = name
                .chars()
                .map(|c| if c.is_control() || c == '|' { '_' } else { c })
                .collect();
            let censored = if censored.is_empty() {
                "Player".to_string()
            } else {
                censored
            };
            NameOutcome::Use(censored)
        }
    }
}

/// Run the six-step REQJOIN admission policy. Returns the
/// (possibly sanitized) name to seat on success.
pub fn admit(
    request: &JoinRequest,
    ctx: &AdmissionContext,
    config: &GameConfig,
) -> Result<String, AdmissionError> {
    // 1. host_counter
    if request.host_counter != ctx.expected_host_counter {
        return Err(AdmissionError::WrongHostCounter);
    }

    // 2. entry_key (LAN) or waived (Battle.net — None)
    if let Some(expected) = ctx.expected_entry_key {
        if expected != request.entry_key {
            return Err(AdmissionError::WrongEntryKey);
        }
    }

    // 3. name collision / sanitation
    if ctx.banned_ips.contains(&request.remote_ip) || ctx.banned_names.contains(&request.name.to_string()) {
        return Err(AdmissionError::Banned);
    }
    let name = match sanitize_name(request.name, config.unsafe_name_handler) {
        NameOutcome::Reject(e) => return Err(e),
        NameOutcome::Use(n) => n,
    };
    if ctx.live_names.iter().any(|n| n == &name) {
        return Err(AdmissionError::NameTaken);
    }

    // 4. IP-flood policy (loopback gets a higher allowance)
    let limit = if request.is_loopback {
        config.max_loopback
    } else {
        config.max_same_ip
    };
    let count = if request.is_loopback {
        ctx.loopback_count
    } else {
        ctx.same_ip_count
    };
    if count >= limit {
        return Err(AdmissionError::IpFlood);
    }

    // 5. game version compatibility
    let version_ok = match config.cross_play_mode {
        CrossPlayMode::Strict => request.game_version == ctx.host_game_version,
        CrossPlayMode::Lenient => request.game_version.abs_diff(ctx.host_game_version) <= 5,
    };
    if !version_ok {
        return Err(AdmissionError::VersionMismatch);
    }

    // 6. in-progress join policy
    if ctx.game_phase == LobbyPhase::Playing {
        let admits_players = config.enable_join_players_in_progress && ctx.has_pending_reconnect_slot;
        let admits_observers = config.enable_join_observers_in_progress;
        if !admits_players && !admits_observers {
            return Err(AdmissionError::LobbyClosed);
        }
    } else if !ctx.has_free_slot {
        return Err(AdmissionError::Full);
    }

    Ok(name)
}
