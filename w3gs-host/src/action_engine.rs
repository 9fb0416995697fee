// action_engine.rs — the authoritative action sequencer.
//
// Grounded on mattx86-myq2-rust's sv_main.rs `sv_calc_pings`/`sv_frame`
// per-tick-drain idiom: a cadence bound by elapsed time since the last
// broadcast, walked once per outer tick, with deferred per-user state
// (here: pause quota, APM bucket) consulted inline rather than recomputed.
// The pending-frame queue itself has no direct analogue in a game loop that
// never defers a not-yet-broadcast frame; it is modeled as a `VecDeque`, the
// natural Rust substitute for a C-style intrusive linked list.

use std::collections::{HashMap, VecDeque};

use crate::rate_limiter::TokenBucket;
use w3gs_common::crc32::action_checksum;

/// The UDP-safe sub-packet ceiling: 1460-byte link MTU minus an 8-byte W3GS
/// header.
pub const MAX_SUBPACKET_BYTES: usize = 1452;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCallback {
    None,
    Pause,
    Resume,
    /// A user's departure notice, deferred to the last frame that still
    /// carries one of their actions.
    Leaver(u8),
}

#[derive(Debug, Default)]
pub struct QueuedActionsFrame {
    sub_packets: Vec<Vec<(u8, Vec<u8>)>>,
    callback: FrameCallback,
}

impl Default for FrameCallback {
    fn default() -> Self {
        FrameCallback::None
    }
}

impl QueuedActionsFrame {
    fn new() -> Self {
        QueuedActionsFrame {
            sub_packets: vec![Vec::new()],
            callback: FrameCallback::None,
        }
    }

    fn subpacket_size(actions: &[(u8, Vec<u8>)]) -> usize {
        actions.iter().map(|(_, b)| 1 + b.len()).sum()
    }

    fn push_action(&mut self, uid: u8, bytes: Vec<u8>) {
        let entry_len = 1 + bytes.len();
        let last = self.sub_packets.last().expect("always at least one sub-packet");
        if Self::subpacket_size(last) + entry_len > MAX_SUBPACKET_BYTES && !last.is_empty() {
            self.sub_packets.push(Vec::new());
        }
        self.sub_packets.last_mut().unwrap().push((uid, bytes));
    }

    pub fn sub_packet_count(&self) -> usize {
        self.sub_packets.len()
    }

    pub fn contains_uid(&self, uid: u8) -> bool {
        self.sub_packets
            .iter()
            .any(|sp| sp.iter().any(|(u, _)| *u == uid))
    }

    pub fn callback(&self) -> FrameCallback {
        self.callback
    }

    /// Serialize this frame into wire bytes: one `INCOMING_ACTION2`
    /// sub-packet per non-terminal sub-frame, then `INCOMING_ACTION(latency)`
    /// for the terminal one. Each carries a CRC-32-derived 16-bit checksum.
    pub fn serialize(&self, latency_ms: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let last_index = self.sub_packets.len() - 1;
        for (i, sp) in self.sub_packets.iter().enumerate() {
            let mut body = Vec::new();
            for (uid, bytes) in sp {
                body.push(*uid);
                body.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                body.extend_from_slice(bytes);
            }
            let checksum = action_checksum(&body);
            out.extend_from_slice(&checksum.to_le_bytes());
            if i == last_index {
                out.extend_from_slice(&(latency_ms as u16).to_le_bytes());
            }
            out.extend_from_slice(&body);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApmMode {
    Restrict,
    Kick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    Queued,
    DroppedByApmQuota,
    KickForApmQuota,
    PauseDenied,
}

/// How many of a user's most recent distinct action payloads are retained
/// for repeat-command detection.
const RECENT_COMMAND_CAPACITY: usize = 4;

pub struct ActionEngine {
    pending: VecDeque<QueuedActionsFrame>,
    latency_ms: u32,
    last_broadcast_ms: u64,
    equalizer_offsets: HashMap<u8, usize>,
    remaining_pauses: HashMap<u8, u32>,
    apm_buckets: HashMap<u8, TokenBucket>,
    apm_mode: ApmMode,
    recent_commands: HashMap<u8, VecDeque<Vec<u8>>>,
    /// Set by the caller once a drained frame's callback is `Pause`/`Resume`
    /// (see `Game::tick_playing`); while `true`, `drain_ready` stops
    /// advancing the game clock entirely, per the pause-screen semantics.
    paused: bool,
}

impl ActionEngine {
    pub fn new(latency_ms: u32) -> Self {
        ActionEngine {
            pending: VecDeque::from([QueuedActionsFrame::new()]),
            latency_ms,
            last_broadcast_ms: 0,
            equalizer_offsets: HashMap::new(),
            remaining_pauses: HashMap::new(),
            apm_buckets: HashMap::new(),
            apm_mode: ApmMode::Restrict,
            recent_commands: HashMap::new(),
            paused: false,
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// A resume command is sniffed and recorded on its frame the moment it's
    /// queued (see `queue_action`), not when that frame eventually drains —
    /// so a paused engine must scan for one before `drain_ready` would
    /// otherwise refuse to ever drain it.
    pub fn check_resume(&mut self) {
        if self.paused && self.pending.iter().any(|f| f.callback == FrameCallback::Resume) {
            self.paused = false;
        }
    }

    /// Record `bytes` as `uid`'s latest action payload and report whether it
    /// repeats one already held in their short-term ring. Chat/slot-command
    /// repeat detection, distinct from the APM token bucket.
    pub fn note_repeat(&mut self, uid: u8, bytes: &[u8]) -> bool {
        let ring = self.recent_commands.entry(uid).or_default();
        let repeats = ring.iter().any(|seen| seen.as_slice() == bytes);
        if ring.len() == RECENT_COMMAND_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(bytes.to_vec());
        repeats
    }

    pub fn set_remaining_pauses(&mut self, uid: u8, count: u32) {
        self.remaining_pauses.insert(uid, count);
    }

    pub fn set_apm_bucket(&mut self, uid: u8, bucket: TokenBucket, mode: ApmMode) {
        self.apm_mode = mode;
        self.apm_buckets.insert(uid, bucket);
    }

    pub fn set_equalizer_offset(&mut self, uid: u8, offset_frames: usize) {
        self.equalizer_offsets.insert(uid, offset_frames);
    }

    fn ensure_depth(&mut self, depth: usize) {
        while self.pending.len() <= depth {
            self.pending.push_back(QueuedActionsFrame::new());
        }
    }

    fn active_index_for(&self, uid: u8) -> usize {
        let offset = self.equalizer_offsets.get(&uid).copied().unwrap_or(0);
        self.pending.len().saturating_sub(1) + offset
    }

    /// Queue one `OUTGOING_ACTION` payload from `uid`.
    pub fn queue_action(&mut self, uid: u8, bytes: Vec<u8>) -> QueueOutcome {
        if let Some(bucket) = self.apm_buckets.get_mut(&uid) {
            if !bucket.try_consume(1.0) {
                return match self.apm_mode {
                    ApmMode::Restrict => QueueOutcome::DroppedByApmQuota,
                    ApmMode::Kick => QueueOutcome::KickForApmQuota,
                };
            }
        }

        let first_byte = bytes.first().copied();
        let index = self.active_index_for(uid);
        self.ensure_depth(index);

        match first_byte {
            Some(0x01) => {
                let remaining = self.remaining_pauses.entry(uid).or_insert(0);
                if *remaining == 0 {
                    return QueueOutcome::PauseDenied;
                }
                *remaining -= 1;
                self.pending[index].callback = FrameCallback::Pause;
            }
            Some(0x02) => {
                self.pending[index].callback = FrameCallback::Resume;
            }
            _ => {}
        }

        self.pending[index].push_action(uid, bytes);
        QueueOutcome::Queued
    }

    /// Attach a deferred leaver notice to the latest pending frame still
    /// containing `uid`'s actions, or the active frame if none do, so a
    /// leave announcement never arrives before the actions it follows.
    pub fn attach_leaver_callback(&mut self, uid: u8) {
        let target = self
            .pending
            .iter()
            .rposition(|f| f.contains_uid(uid))
            .unwrap_or_else(|| self.pending.len() - 1);
        self.pending[target].callback = FrameCallback::Leaver(uid);
    }

    /// Drain every pending frame whose cadence has arrived; always leaves at
    /// least one active frame behind. Emits an empty frame when nothing was
    /// queued, so clocks keep advancing even on silent ticks.
    pub fn drain_ready(&mut self, now_ms: u64) -> Vec<QueuedActionsFrame> {
        if self.paused {
            return Vec::new();
        }
        let mut drained = Vec::new();
        while self.pending.len() > 1 && now_ms.saturating_sub(self.last_broadcast_ms) >= self.latency_ms as u64 {
            let frame = self.pending.pop_front().unwrap();
            drained.push(frame);
            self.last_broadcast_ms = now_ms;
        }
        if drained.is_empty() && now_ms.saturating_sub(self.last_broadcast_ms) >= self.latency_ms as u64 {
            drained.push(std::mem::replace(&mut self.pending[0], QueuedActionsFrame::new()));
            self.last_broadcast_ms = now_ms;
        }
        drained
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    pub fn set_latency_ms(&mut self, latency_ms: u32) {
        self.latency_ms = latency_ms;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
