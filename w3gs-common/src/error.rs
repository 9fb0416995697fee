// error.rs — the error taxonomy, as typed Results instead of the original
// ERR_FATAL/ERR_DROP/ERR_QUIT integer codes (common.rs `com_error`). Every
// operation returns Ok(value) or Err(ErrorKind); the Game aggregate funnels
// Err into either a logged warning or a state transition, never a panic.

use thiserror::Error;

/// A malformed or out-of-state W3GS frame. Policy: close the offending
/// connection; other connections are unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame length {0} is shorter than the 4-byte header")]
    TooShort(u16),
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("opcode 0x{0:02x} is not valid in the current connection state")]
    UnexpectedOpcode(u8),
    #[error("frame declared length {declared} but buffer only had {available}")]
    Truncated { declared: usize, available: usize },
}

/// REQJOIN admission was refused. Policy: reply REJECTJOIN(code), then
/// close. Logged once per unique (ip, name) to avoid spam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("name already taken")]
    NameTaken,
    #[error("wrong host counter")]
    WrongHostCounter,
    #[error("wrong entry key")]
    WrongEntryKey,
    #[error("game is full")]
    Full,
    #[error("address or name is banned")]
    Banned,
    #[error("too many connections from this address")]
    IpFlood,
    #[error("client game version is not compatible with this game")]
    VersionMismatch,
    #[error("the lobby is no longer accepting joins")]
    LobbyClosed,
}

impl AdmissionError {
    /// The REJECTJOIN wire reason code.
    pub fn reject_code(self) -> u32 {
        match self {
            AdmissionError::WrongHostCounter => 0x07,
            AdmissionError::WrongEntryKey => 0x1b,
            AdmissionError::Full => 0x09,
            AdmissionError::NameTaken => 0x08,
            AdmissionError::Banned => 0x0f,
            AdmissionError::IpFlood => 0x10,
            AdmissionError::VersionMismatch => 0x1c,
            AdmissionError::LobbyClosed => 0x0a,
        }
    }
}

/// Map hash mismatch or keep-alive checksum desync. Policy: kick affected
/// users; the game continues unless `desync_handler == Drop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("reported map size/hash does not match the host's copy")]
    MapMismatch,
    #[error("keep-alive checksums diverged across users at sync position {0}")]
    Desync(u32),
}

/// A tick-sampled timeout fired. Policy: deterministic kick/terminate at
/// expiry tick; never interrupts mid-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeoutError {
    #[error("user exceeded the high-ping autokick threshold")]
    HighPing,
    #[error("user never reported having the map")]
    MapMissing,
    #[error("lobby timed out with no owner action")]
    LobbyTimeout,
    #[error("loading phase exceeded loading_timeout")]
    LoadingTimeout,
    #[error("playing phase exceeded playing_timeout")]
    PlayingTimeout,
}

/// Socket-level failure or an ungraceful disconnect. Policy: treat as a
/// leave; if the user had GProxy, keep the slot pending reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("socket error")]
    SocketError,
    #[error("connection closed without a LEAVEGAME message")]
    UngracefulClose,
}

/// A resource limit was hit. Policy: throttle, don't kick, unless the
/// configured handler for that resource says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("too many concurrent map transfers")]
    TooManyTransfers,
    #[error("APM quota exceeded")]
    ApmQuotaExceeded,
}

/// An error severe enough to end the game. Policy: terminate, notify all
/// users, transition to Ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("map file became unreadable or corrupt mid-game")]
    MapFileCorrupt,
    #[error("the listening socket for this game died")]
    ListenerDied,
}
