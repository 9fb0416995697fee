// dispatch.rs — inbound W3GS message routing: turns a decoded
// `(Opcode, payload)` pair into the right `Game`/`ActionEngine` call.
//
// Grounded on connection.rs's step-ordered admission policy (REQJOIN's own
// dispatch) and on mattx86-myq2-rust's sv_main.rs `svc_*` table: a plain
// match over the opcode, each arm calling straight into the aggregate method
// that already owns that piece of state, rather than a derive-based command
// bus.

use std::net::IpAddr;

use w3gs_common::error::AdmissionError;
use w3gs_common::message::MessageReader;
use w3gs_common::opcode::Opcode;

use crate::collab::ChatRelay;
use crate::connection::{admit, AdmissionContext, JoinRequest};
use crate::game::{Game, GameEvent, HOST_UID};
use crate::map_transfer::{MapChunk, MapSizeReport};
use crate::protocol;
use crate::user::User;

/// What the caller (the socket loop) should do with a REQJOIN attempt.
pub enum DispatchOutcome {
    /// Admission succeeded: `uid` is now seated; `welcome` is the
    /// SLOTINFOJOIN/PLAYERINFO/MAPCHECK sequence to send only to them.
    Admitted { uid: u8, welcome: Vec<u8> },
    /// Admission failed: send `wire` (a REJECTJOIN frame) then close.
    Rejected { wire: Vec<u8>, reason: AdmissionError },
}

pub struct InboundJoin<'a> {
    pub uid: u8,
    pub request: JoinRequest<'a>,
}

/// The first open slot's team/color, for a join that doesn't request a
/// specific seat. Team 0 throughout: multi-team assignment is a lobby UI
/// concern the wire dispatcher doesn't make on the client's behalf.
fn first_open_color(slots: &[w3gs_common::slot::Slot]) -> Option<u8> {
    let used: std::collections::HashSet<u8> = slots
        .iter()
        .filter(|s| s.status == w3gs_common::slot::SlotStatus::Occupied)
        .map(|s| s.color)
        .collect();
    (0..slots.len() as u8).find(|c| !used.contains(c))
}

/// Run REQJOIN admission and, on success, seat the user and assemble the
/// private welcome sequence. The SLOTINFO broadcast to every other user is
/// left to the next `Game::tick` call, which already notices the dirty slot
/// table.
pub fn handle_join(game: &mut Game, join: &InboundJoin, ctx: &AdmissionContext, internal_ip: IpAddr) -> DispatchOutcome {
    let name = match admit(&join.request, ctx, &game.config) {
        Ok(name) => name,
        Err(e) => {
            return DispatchOutcome::Rejected {
                wire: protocol::encode_reject_join(e.reject_code()),
                reason: e,
            }
        }
    };

    let Some(color) = first_open_color(game.slots.slots()) else {
        return DispatchOutcome::Rejected {
            wire: protocol::encode_reject_join(AdmissionError::Full.reject_code()),
            reason: AdmissionError::Full,
        };
    };

    let user = User::new(
        join.uid,
        0,
        name,
        join.request.host_counter,
        join.request.remote_ip,
        internal_ip,
        join.request.game_version,
        game.config.remaining_pauses_default,
    );
    if let Err(e) = game.join_user(join.uid, user, 0, color) {
        return DispatchOutcome::Rejected {
            wire: protocol::encode_reject_join(e.reject_code()),
            reason: e,
        };
    }

    let slot_info_join = protocol::encode_slot_info_join(join.uid, game.slots.slots(), game.random_seed, game.map.layout);
    let player_info = protocol::encode_player_info(join.uid, &game.users[&join.uid].name, join.request.remote_ip);
    game.history.lobby_buffer.extend_from_slice(&slot_info_join);
    game.history.lobby_buffer.extend_from_slice(&player_info);

    let mut welcome = slot_info_join;
    welcome.extend(player_info);
    welcome.extend(protocol::encode_map_check(&game.map, join.request.game_version));
    DispatchOutcome::Admitted { uid: join.uid, welcome }
}

/// Route one decoded post-join frame from `uid` to the aggregate call that
/// owns it. Returns whatever events that call produced; the caller relays
/// them the same way it relays a tick's events.
pub fn handle_message(
    game: &mut Game,
    uid: u8,
    opcode: Opcode,
    payload: &[u8],
    now_ms: u64,
    chat_relay: &dyn ChatRelay,
) -> Vec<GameEvent> {
    match opcode {
        Opcode::OutgoingAction => {
            game.action_engine.queue_action(uid, payload.to_vec());
            Vec::new()
        }
        Opcode::OutgoingKeepAlive => {
            let mut r = MessageReader::new(payload);
            match r.read_u32() {
                Ok(checksum) => game.on_outgoing_keepalive(uid, checksum),
                Err(_) => Vec::new(),
            }
        }
        Opcode::GameLoadedSelf => {
            game.gameloaded_self(uid, now_ms);
            Vec::new()
        }
        Opcode::MapSize => {
            let mut r = MessageReader::new(payload);
            let (Ok(flag), Ok(value)) = (r.read_u32(), r.read_u32()) else {
                return Vec::new();
            };
            let report = if flag == 1 {
                MapSizeReport::Have { size: value as u64 }
            } else {
                MapSizeReport::ContinueDownload { offset: value as u64 }
            };
            game.handle_map_size(uid, report, now_ms)
        }
        Opcode::MapPartOk => {
            let mut r = MessageReader::new(payload);
            let (Ok(_to), Ok(_from), Ok(ack_size)) = (r.read_u8(), r.read_u8(), r.read_u32()) else {
                return Vec::new();
            };
            let chunk = MapChunk { from_uid: HOST_UID, to_uid: uid, start_offset: ack_size as u64, crc32: 0, len: 0 };
            game.ack_map_chunk(uid, &chunk);
            Vec::new()
        }
        Opcode::MapPartErr => {
            let mut r = MessageReader::new(payload);
            let (Ok(_to), Ok(_from), Ok(offset)) = (r.read_u8(), r.read_u8(), r.read_u32()) else {
                return Vec::new();
            };
            game.nack_map_chunk(uid, offset as u64);
            Vec::new()
        }
        Opcode::ChatToHost => {
            let text = String::from_utf8_lossy(payload).into_owned();
            chat_relay.relay_chat(game.host_counter, uid, &text);
            Vec::new()
        }
        Opcode::LeaveGame => {
            game.user_left(uid);
            Vec::new()
        }
        _ => Vec::new(),
    }
}
