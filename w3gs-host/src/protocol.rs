// protocol.rs — per-message wire encoders. Turns a `Game`'s outbound events
// into complete W3GS frames, each using the same `MessageWriter::begin`/
// `finish` pairing message.rs already defines for every other frame this
// workspace builds.
//
// Grounded on message.rs's writer and on mattx86-myq2-rust's `sv_main.rs`
// broadcast helpers (`sv_multicast`/`MSG_WriteByte` call chains): one small
// function per outbound message type, assembled from plain field writes
// rather than a derive-based wire-struct macro.

use std::net::IpAddr;

use w3gs_common::map::Map;
use w3gs_common::message::MessageWriter;
use w3gs_common::opcode::Opcode;
use w3gs_common::slot::{LayoutKind, Slot};

use crate::map_transfer::MapChunk;

/// SLOTINFO's body: slot count, then each slot's nine fields. Shared by the
/// standalone SLOTINFO broadcast and by SLOTINFOJOIN, which wraps it.
fn slot_info_body(slots: &[Slot]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + slots.len() * 9);
    body.push(slots.len() as u8);
    for s in slots {
        body.push(s.uid);
        body.push(s.download_pct);
        body.push(s.status as u8);
        body.push(s.computer as u8);
        body.push(s.team);
        body.push(s.color);
        body.push(s.race.bits());
        body.push(s.computer_difficulty as u8);
        body.push(s.handicap);
    }
    body
}

pub fn encode_slot_info(slots: &[Slot], random_seed: u32, layout: LayoutKind) -> Vec<u8> {
    let body = slot_info_body(slots);
    let mut w = MessageWriter::begin(Opcode::SlotInfo);
    w.write_u16(body.len() as u16);
    w.write_bytes(&body);
    w.write_u32(random_seed);
    w.write_u8(layout.as_byte());
    w.write_u8(slots.len() as u8);
    w.finish()
}

pub fn encode_slot_info_join(uid: u8, slots: &[Slot], random_seed: u32, layout: LayoutKind) -> Vec<u8> {
    let body = slot_info_body(slots);
    let mut w = MessageWriter::begin(Opcode::SlotInfoJoin);
    w.write_u16(body.len() as u16);
    w.write_bytes(&body);
    w.write_u32(random_seed);
    w.write_u8(layout.as_byte());
    w.write_u8(uid);
    w.finish()
}

pub fn encode_player_info(uid: u8, name: &str, external_ip: IpAddr) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::PlayerInfo);
    w.write_u32(uid as u32);
    w.write_u8(uid);
    w.write_cstring(name, 15);
    match external_ip {
        IpAddr::V4(v4) => w.write_bytes(&v4.octets()),
        IpAddr::V6(_) => w.write_bytes(&[0, 0, 0, 0]),
    };
    w.write_u16(6112);
    w.finish()
}

pub fn encode_map_check(map: &Map, game_version: u32) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::MapCheck);
    w.write_bytes(map.path.as_bytes());
    w.write_u8(0);
    w.write_bytes(&map.mapcheck_payload(game_version));
    w.finish()
}

pub fn encode_countdown_start() -> Vec<u8> {
    MessageWriter::begin(Opcode::CountdownStart).finish()
}

pub fn encode_countdown_end() -> Vec<u8> {
    MessageWriter::begin(Opcode::CountdownEnd).finish()
}

pub fn encode_game_loaded_others(uid: u8) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::GameLoadedOthers);
    w.write_u8(uid);
    w.finish()
}

/// `reason` is the same REJECTJOIN-style code space: 1 means a normal
/// LEAVEGAME, higher values cover kicks (map missing, high ping, ...).
pub fn encode_player_leave_others(uid: u8, reason: u32) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::PlayerLeaveOthers);
    w.write_u8(uid);
    w.write_u32(reason);
    w.finish()
}

pub fn encode_start_lag(uids: &[u8]) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::StartLag);
    w.write_u8(uids.len() as u8);
    for &uid in uids {
        w.write_u8(uid);
        w.write_u32(0);
    }
    w.finish()
}

pub fn encode_stop_lag(uid: u8) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::StopLag);
    w.write_u8(uid);
    w.write_u32(0);
    w.finish()
}

pub fn encode_reject_join(reject_code: u32) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::RejectJoin);
    w.write_u32(reject_code);
    w.finish()
}

pub fn encode_map_part(chunk: &MapChunk, bytes: &[u8]) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::MapPart);
    w.write_u8(chunk.from_uid);
    w.write_u8(chunk.to_uid);
    w.write_u32(0);
    w.write_u32(chunk.start_offset as u32);
    w.write_u32(chunk.crc32);
    w.write_bytes(bytes);
    w.finish()
}

pub fn encode_start_download(host_uid: u8) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::StartDownload);
    w.write_u32(1);
    w.write_u8(host_uid);
    w.finish()
}

/// Notifies every user that the uids in `mismatched` diverged from the
/// checksum majority at the last compared keep-alive position.
pub fn encode_desync_notify(mismatched: &[u8]) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::ChatFromHost);
    w.write_u8(mismatched.len() as u8);
    w.write_bytes(mismatched);
    w.finish()
}

/// Announces a freshly opened lobby to the LAN/WAN discovery channel.
pub fn encode_create_game(host_counter: u32, game_version: u32) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::CreateGame);
    w.write_u32(game_version);
    w.write_u32(host_counter);
    w.finish()
}

/// Periodic lobby-state heartbeat so discovery listeners keep an accurate
/// player/slot count without re-sending the full GAMEINFO stat string.
pub fn encode_refresh_game(host_counter: u32, players: u8, slots: u8) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::RefreshGame);
    w.write_u32(host_counter);
    w.write_u32(players as u32);
    w.write_u32(slots as u32);
    w.finish()
}

/// Retracts a lobby that closed (countdown started, or the host shut down)
/// before it ever transitioned into a normal game-ended teardown.
pub fn encode_decreate_game(host_counter: u32) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::DecreateGame);
    w.write_u32(host_counter);
    w.finish()
}

/// The SEARCHGAME reply / unsolicited discovery broadcast: `gameinfo_payload`
/// is `DiscoveryPublisher::build_gameinfo_payload`'s stat-string encoding.
pub fn encode_game_info(host_counter: u32, entry_key: u32, game_version: u32, gameinfo_payload: &[u8], slots_total: u8) -> Vec<u8> {
    let mut w = MessageWriter::begin(Opcode::GameInfo);
    w.write_u32(game_version);
    w.write_u32(host_counter);
    w.write_u32(entry_key);
    w.write_bytes(gameinfo_payload);
    w.write_u32(slots_total as u32);
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use w3gs_common::message::{split_frame, Decoded};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
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

    #[test]
    fn slot_info_round_trips_as_a_valid_frame() {
        let slots = vec![Slot::empty(); 2];
        let bytes = encode_slot_info(&slots, 0xC0FFEE, LayoutKind::Melee);
        match split_frame(&bytes) {
            Decoded::Message((op, _), consumed) => {
                assert_eq!(op, Opcode::SlotInfo);
                assert_eq!(consumed, bytes.len());
            }
            _ => panic!("expected a decoded SLOTINFO frame"),
        }
    }

    #[test]
    fn slot_info_join_carries_the_assigned_uid() {
        let slots = vec![Slot::empty()];
        let bytes = encode_slot_info_join(7, &slots, 1, LayoutKind::Melee);
        assert_eq!(*bytes.last().unwrap(), 7);
    }

    #[test]
    fn player_info_truncates_and_null_terminates_the_name() {
        let bytes = encode_player_info(1, "Alice", ip());
        match split_frame(&bytes) {
            Decoded::Message((op, _), _) => assert_eq!(op, Opcode::PlayerInfo),
            _ => panic!(),
        }
    }

    #[test]
    fn map_check_carries_the_scripts_hash_for_modern_clients() {
        let bytes = encode_map_check(&sample_map(), 23);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::MapCheck);
                // "Maps\Test.w3x\0" + 28-byte mapcheck payload.
                assert_eq!(payload.len(), "Maps\\Test.w3x".len() + 1 + 28);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn start_lag_encodes_every_lagging_uid() {
        let bytes = encode_start_lag(&[1, 2, 3]);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::StartLag);
                assert_eq!(payload[0], 3);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn map_part_carries_the_chunk_bytes() {
        let chunk = MapChunk {
            from_uid: 0,
            to_uid: 2,
            start_offset: 0,
            crc32: 0xAABBCCDD,
            len: 3,
        };
        let bytes = encode_map_part(&chunk, &[1, 2, 3]);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::MapPart);
                assert_eq!(&payload[payload.len() - 3..], &[1, 2, 3]);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn desync_notify_carries_the_mismatched_uids() {
        let bytes = encode_desync_notify(&[4]);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::ChatFromHost);
                assert_eq!(payload, &[1, 4]);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn create_game_carries_the_host_counter() {
        let bytes = encode_create_game(7, 23);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::CreateGame);
                assert_eq!(u32::from_le_bytes(payload[4..8].try_into().unwrap()), 7);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn refresh_game_carries_player_and_slot_counts() {
        let bytes = encode_refresh_game(7, 2, 12);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::RefreshGame);
                assert_eq!(u32::from_le_bytes(payload[4..8].try_into().unwrap()), 2);
                assert_eq!(u32::from_le_bytes(payload[8..12].try_into().unwrap()), 12);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn decreate_game_carries_the_host_counter() {
        let bytes = encode_decreate_game(7);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::DecreateGame);
                assert_eq!(u32::from_le_bytes(payload[0..4].try_into().unwrap()), 7);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn game_info_embeds_the_stat_string_payload() {
        let pub_ = crate::discovery::DiscoveryPublisher::new(5000, vec![]);
        let stat = pub_.build_gameinfo_payload(&sample_map(), "My Game", "Host");
        let bytes = encode_game_info(7, 0x1234, 23, &stat, 12);
        match split_frame(&bytes) {
            Decoded::Message((op, payload), _) => {
                assert_eq!(op, Opcode::GameInfo);
                assert!(payload.len() > stat.len());
            }
            _ => panic!(),
        }
    }
}
