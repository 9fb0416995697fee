// collab.rs — the external-collaborator interfaces.
//
// The core never resolves a map from disk, persists state, or relays chat
// to IRC/Discord/Battle.net itself; it calls out through these trait seams.
// Grounded on mattx86-myq2-rust's net.rs `OnceLock<Mutex<NetDispatch>>`
// dispatch-table pattern — here expressed as ordinary trait objects handed
// to the Game aggregate at construction, since each game owns its own
// collaborator set rather than sharing one process-wide table.

use w3gs_common::map::Map;

/// Resolves a map by path/hash and hands back its bytes for MapTransfer.
/// The default in-memory implementation below exists for tests only; a real
/// deployment backs this with an external map-repository HTTP downloader.
pub trait MapSource: Send + Sync {
    fn resolve(&self, path: &str) -> Option<Map>;
    fn read_chunk(&self, path: &str, offset: u64, len: usize) -> Option<Vec<u8>>;
    fn file_size(&self, path: &str) -> Option<u64>;
}

/// Persists/restores a SlotTable snapshot and ActionHistory ring across a
/// save-game restart.
pub trait Persistence: Send + Sync {
    fn save_slots(&self, game_id: u32, snapshot: &[u8]);
    fn load_slots(&self, game_id: u32) -> Option<Vec<u8>>;
}

/// Forwards lobby/in-game chat to an external bridge (IRC, Discord, Battle.net
/// realm channel).
pub trait ChatRelay: Send + Sync {
    fn relay_chat(&self, game_id: u32, uid: u8, text: &str);
    fn relay_system(&self, game_id: u32, text: &str);
}

/// Consumes action payloads for out-of-band statistics extraction (DotA,
/// W3MMD) without the core itself interpreting them.
pub trait StatsExtractor: Send + Sync {
    fn observe_action(&self, game_id: u32, uid: u8, action_bytes: &[u8]);
    fn observe_game_over(&self, game_id: u32);
}

/// A collaborator set that does nothing; used by tests and as the bot
/// binary's default until real collaborators are wired in.
#[derive(Default)]
pub struct NoopCollaborators;

impl MapSource for NoopCollaborators {
    fn resolve(&self, _path: &str) -> Option<Map> {
        None
    }
    fn read_chunk(&self, _path: &str, _offset: u64, _len: usize) -> Option<Vec<u8>> {
        None
    }
    fn file_size(&self, _path: &str) -> Option<u64> {
        None
    }
}

impl Persistence for NoopCollaborators {
    fn save_slots(&self, _game_id: u32, _snapshot: &[u8]) {}
    fn load_slots(&self, _game_id: u32) -> Option<Vec<u8>> {
        None
    }
}

impl ChatRelay for NoopCollaborators {
    fn relay_chat(&self, _game_id: u32, _uid: u8, _text: &str) {}
    fn relay_system(&self, _game_id: u32, _text: &str) {}
}

impl StatsExtractor for NoopCollaborators {
    fn observe_action(&self, _game_id: u32, _uid: u8, _action_bytes: &[u8]) {}
    fn observe_game_over(&self, _game_id: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_map_source_resolves_nothing() {
        let c = NoopCollaborators;
        assert!(c.resolve("Maps\\Test.w3x").is_none());
        assert!(c.file_size("Maps\\Test.w3x").is_none());
    }

    #[test]
    fn noop_persistence_round_trips_to_none() {
        let c = NoopCollaborators;
        c.save_slots(1, &[1, 2, 3]);
        assert!(c.load_slots(1).is_none());
    }
}
