// opcode.rs — W3GS opcode table.
// Grounded on mattx86-myq2-rust's server.rs constant block (SvcOps-style
// enum of wire opcodes) and examples/original_source/src/protocol/game_protocol.h
// (GameProtocol::Magic), which is the authoritative numbering for this wire
// format.

/// The one-byte magic that starts every W3GS frame.
pub const W3GS_HEADER: u8 = 0xF7;

/// The magic that starts a GProxy (GPS) sub-frame, carried inside the same
/// TCP byte stream before the game has negotiated a real W3GS session.
pub const GPS_HEADER: u8 = 0x59;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    PingFromHost = 0x01,
    SlotInfoJoin = 0x04,
    RejectJoin = 0x05,
    PlayerInfo = 0x06,
    PlayerLeaveOthers = 0x07,
    GameLoadedOthers = 0x08,
    SlotInfo = 0x09,
    CountdownStart = 0x0A,
    CountdownEnd = 0x0B,
    IncomingAction = 0x0C,
    ChatFromHost = 0x0F,
    StartLag = 0x10,
    StopLag = 0x11,
    ReqJoin = 0x1E,
    LeaveGame = 0x21,
    GameLoadedSelf = 0x23,
    OutgoingAction = 0x26,
    OutgoingKeepAlive = 0x27,
    ChatToHost = 0x28,
    SearchGame = 0x2F,
    GameInfo = 0x30,
    CreateGame = 0x31,
    RefreshGame = 0x32,
    DecreateGame = 0x33,
    MapCheck = 0x3D,
    StartDownload = 0x3F,
    MapSize = 0x42,
    MapPart = 0x43,
    MapPartOk = 0x44,
    MapPartErr = 0x45,
    PongToHost = 0x46,
    IncomingAction2 = 0x48,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match b {
            0x01 => PingFromHost,
            0x04 => SlotInfoJoin,
            0x05 => RejectJoin,
            0x06 => PlayerInfo,
            0x07 => PlayerLeaveOthers,
            0x08 => GameLoadedOthers,
            0x09 => SlotInfo,
            0x0A => CountdownStart,
            0x0B => CountdownEnd,
            0x0C => IncomingAction,
            0x0F => ChatFromHost,
            0x10 => StartLag,
            0x11 => StopLag,
            0x1E => ReqJoin,
            0x21 => LeaveGame,
            0x23 => GameLoadedSelf,
            0x26 => OutgoingAction,
            0x27 => OutgoingKeepAlive,
            0x28 => ChatToHost,
            0x2F => SearchGame,
            0x30 => GameInfo,
            0x31 => CreateGame,
            0x32 => RefreshGame,
            0x33 => DecreateGame,
            0x3D => MapCheck,
            0x3F => StartDownload,
            0x42 => MapSize,
            0x43 => MapPart,
            0x44 => MapPartOk,
            0x45 => MapPartErr,
            0x46 => PongToHost,
            0x48 => IncomingAction2,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for opcodes a client is allowed to send the host.
    pub fn is_client_to_host(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            ReqJoin
                | LeaveGame
                | GameLoadedSelf
                | OutgoingAction
                | OutgoingKeepAlive
                | ChatToHost
                | MapSize
                | PongToHost
                | MapPartOk
                | MapPartErr
        )
    }
}

/// GProxy sub-opcodes: carried inside a GPS_HEADER frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GpsOpcode {
    Init = 1,
    Reconnect = 2,
    Ack = 3,
    Reject = 4,
    SupportExtended = 5,
    ChangeGame = 6,
    UdpAck = 7,
}

impl GpsOpcode {
    pub fn from_u8(b: u8) -> Option<GpsOpcode> {
        use GpsOpcode::*;
        Some(match b {
            1 => Init,
            2 => Reconnect,
            3 => Ack,
            4 => Reject,
            5 => SupportExtended,
            6 => ChangeGame,
            7 => UdpAck,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_opcodes() {
        let all = [
            Opcode::PingFromHost,
            Opcode::SlotInfoJoin,
            Opcode::RejectJoin,
            Opcode::PlayerInfo,
            Opcode::PlayerLeaveOthers,
            Opcode::GameLoadedOthers,
            Opcode::SlotInfo,
            Opcode::CountdownStart,
            Opcode::CountdownEnd,
            Opcode::IncomingAction,
            Opcode::ChatFromHost,
            Opcode::StartLag,
            Opcode::StopLag,
            Opcode::ReqJoin,
            Opcode::LeaveGame,
            Opcode::GameLoadedSelf,
            Opcode::OutgoingAction,
            Opcode::OutgoingKeepAlive,
            Opcode::ChatToHost,
            Opcode::SearchGame,
            Opcode::GameInfo,
            Opcode::CreateGame,
            Opcode::RefreshGame,
            Opcode::DecreateGame,
            Opcode::MapCheck,
            Opcode::StartDownload,
            Opcode::MapSize,
            Opcode::MapPart,
            Opcode::MapPartOk,
            Opcode::MapPartErr,
            Opcode::PongToHost,
            Opcode::IncomingAction2,
        ];
        for op in all {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(Opcode::from_u8(0xEE), None);
    }

    #[test]
    fn client_to_host_classification() {
        assert!(Opcode::ReqJoin.is_client_to_host());
        assert!(Opcode::OutgoingAction.is_client_to_host());
        assert!(!Opcode::SlotInfo.is_client_to_host());
        assert!(!Opcode::IncomingAction.is_client_to_host());
    }

    #[test]
    fn gps_opcode_roundtrip() {
        assert_eq!(GpsOpcode::from_u8(1), Some(GpsOpcode::Init));
        assert_eq!(GpsOpcode::from_u8(7), Some(GpsOpcode::UdpAck));
        assert_eq!(GpsOpcode::from_u8(0), None);
    }
}
