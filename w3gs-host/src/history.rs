// history.rs — GameHistory: the append-only record of bytes broadcast since
// the game started, backing GProxy reconnect replay.
//
// Grounded on mattx86-myq2-rust's net_queue.rs `PacketQueue` for the
// "append, then read a range" shape, but backed by a plain growable `Vec`
// rather than a bounded channel: history must never drop entries, since a
// GProxy reconnector can ask for any suffix still within the replay window.

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub packet_counter: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct GameHistory {
    /// Initial SLOTINFOJOIN/PLAYERINFO bytes sent before loading starts;
    /// replayed verbatim to any very-late Spectator join.
    pub lobby_buffer: Vec<u8>,
    /// Real GAMELOADED_OTHERS announcements, queued until loading completes.
    pub loading_real_buffer: Vec<u8>,
    /// Synthetic GAMELOADED_OTHERS for fake/virtual users and users
    /// presented as "already loaded".
    pub loading_virtual_buffer: Vec<u8>,
    pub default_latency_ms: u32,
    pub gproxy_empty_actions: u32,
    pub desynchronized: bool,

    entries: Vec<HistoryEntry>,
    next_packet_counter: u64,
}

impl GameHistory {
    pub fn new(default_latency_ms: u32, gproxy_empty_actions: u32) -> Self {
        GameHistory {
            default_latency_ms,
            gproxy_empty_actions,
            ..Default::default()
        }
    }

    /// Append a broadcast frame's wire bytes, assigning the next monotonic
    /// packet counter.
    pub fn append(&mut self, bytes: Vec<u8>) -> u64 {
        let counter = self.next_packet_counter;
        self.next_packet_counter += 1;
        self.entries.push(HistoryEntry {
            packet_counter: counter,
            bytes,
        });
        counter
    }

    pub fn current_packet_counter(&self) -> u64 {
        self.next_packet_counter
    }

    /// The replay range `(last_received_packet + 1 .. current)` for a
    /// reconnecting GProxy user. Empty when already caught up.
    pub fn replay_since(&self, last_received_packet: u64) -> Vec<&[u8]> {
        self.entries
            .iter()
            .filter(|e| e.packet_counter > last_received_packet)
            .map(|e| e.bytes.as_slice())
            .collect()
    }

    pub fn mark_desynchronized(&mut self) {
        self.desynchronized = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
