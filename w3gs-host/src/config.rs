// config.rs — the cvar-equivalent tunables for a hosted game.
//
// Grounded on mattx86-myq2-rust's cvar.rs (named, defaulted, externally
// settable knobs read once at game creation) but expressed as a single
// serde-derived struct rather than a string-keyed registry, since the
// teacher's registry exists to serve console `set` commands this crate does
// not carry; `clap`/file config in w3gs-botd populates this struct instead.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameHandling {
    Censor,
    Deny,
    Allow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncHandling {
    Notify,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaverHandling {
    Native,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossPlayMode {
    /// Only clients reporting the host's own game version are admitted.
    Strict,
    /// Any client within a tolerated version range is admitted.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingMode {
    Standard,
    LoadInGame,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub latency_min_ms: u32,
    pub latency_max_ms: u32,
    pub latency_default_ms: u32,
    pub sync_limit: u32,
    pub sync_limit_safe: u32,
    pub sync_limit_max_ms: u32,
    pub sync_limit_safe_min_ms: u32,

    pub lobby_timeout_secs: u64,
    pub lobby_owner_timeout_secs: u64,
    pub loading_timeout_secs: u64,
    pub playing_timeout_secs: u64,
    pub seeker_timeout_secs: u64,
    pub lacks_map_kick_delay_secs: u64,

    pub max_upload_bytes_per_second: u64,
    pub max_same_ip: u32,
    pub max_loopback: u32,

    #[serde(skip, default = "default_unsafe_name_handler")]
    pub unsafe_name_handler: NameHandling,
    #[serde(skip, default = "default_desync_handler")]
    pub desync_handler: DesyncHandling,
    #[serde(skip, default = "default_leaver_handler")]
    pub leaver_handler: LeaverHandling,
    #[serde(skip, default = "default_cross_play_mode")]
    pub cross_play_mode: CrossPlayMode,
    #[serde(skip, default = "default_loading_mode")]
    pub loading_mode: LoadingMode,

    pub enable_join_players_in_progress: bool,
    pub enable_join_observers_in_progress: bool,

    pub countdown_ticks: u32,
    pub countdown_tick_ms: u64,

    pub remaining_pauses_default: u32,
    pub gproxy_empty_actions: u32,

    pub discovery_refresh_secs: u64,
    pub discovery_extra_addrs: Vec<String>,

    pub perf_threshold_ms: u64,
}

fn default_unsafe_name_handler() -> NameHandling {
    NameHandling::Censor
}
fn default_desync_handler() -> DesyncHandling {
    DesyncHandling::Notify
}
fn default_leaver_handler() -> LeaverHandling {
    LeaverHandling::Native
}
fn default_cross_play_mode() -> CrossPlayMode {
    CrossPlayMode::Lenient
}
fn default_loading_mode() -> LoadingMode {
    LoadingMode::Standard
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            latency_min_ms: 10,
            latency_max_ms: 500,
            latency_default_ms: 100,
            sync_limit: 32,
            sync_limit_safe: 16,
            sync_limit_max_ms: 8000,
            sync_limit_safe_min_ms: 800,

            lobby_timeout_secs: 600,
            lobby_owner_timeout_secs: 120,
            loading_timeout_secs: 900,
            playing_timeout_secs: 18_000,
            seeker_timeout_secs: 5,
            lacks_map_kick_delay_secs: 60,

            max_upload_bytes_per_second: 1_000_000,
            max_same_ip: 8,
            max_loopback: 64,

            unsafe_name_handler: NameHandling::Censor,
            desync_handler: DesyncHandling::Notify,
            leaver_handler: LeaverHandling::Native,
            cross_play_mode: CrossPlayMode::Lenient,
            loading_mode: LoadingMode::Standard,

            enable_join_players_in_progress: false,
            enable_join_observers_in_progress: true,

            countdown_ticks: 5,
            countdown_tick_ms: 500,

            remaining_pauses_default: 3,
            gproxy_empty_actions: 0,

            discovery_refresh_secs: 5,
            discovery_extra_addrs: Vec::new(),

            perf_threshold_ms: 30,
        }
    }
}

impl GameConfig {
    /// The derived constraints latency governance must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.latency_default_ms < self.latency_min_ms
            || self.latency_default_ms > self.latency_max_ms
        {
            return Err("latency_default_ms out of [latency_min_ms, latency_max_ms]".into());
        }
        if self.sync_limit as u64 * self.latency_default_ms as u64 > self.sync_limit_max_ms as u64
        {
            return Err("sync_limit * latency exceeds sync_limit_max_ms".into());
        }
        if (self.sync_limit_safe as u64) * (self.latency_default_ms as u64)
            < self.sync_limit_safe_min_ms as u64
        {
            return Err("sync_limit_safe * latency below sync_limit_safe_min_ms".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_latency_default_out_of_range() {
        let mut cfg = GameConfig::default();
        cfg.latency_default_ms = 9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_sync_limit_exceeding_max_ms() {
        let mut cfg = GameConfig::default();
        cfg.sync_limit = 1000;
        assert!(cfg.validate().is_err());
    }
}
