// map_transfer.rs — chunked map push with global fair-share pacing.
//
// Grounded on rate_limiter.rs (itself grounded on
// examples/original_source/src/rate_limiter.h) for the shared upload-budget
// bucket, and on mattx86-myq2-rust's crc.rs for the per-chunk checksum.

use std::collections::HashMap;

use w3gs_common::crc32::crc32_block;

use crate::rate_limiter::TokenBucket;

pub const MAX_CHUNK_BYTES: usize = 1442;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapSizeReport {
    /// flag = 1: client claims to already have the map.
    Have { size: u64 },
    /// flag = 3: client wants the download continued from `offset`.
    ContinueDownload { offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapChunk {
    pub from_uid: u8,
    pub to_uid: u8,
    pub start_offset: u64,
    pub crc32: u32,
    pub len: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    last_sent_offset: u64,
    download_pct: u8,
}

pub struct MapTransfer {
    host_uid: u8,
    file_size: u64,
    budget: TokenBucket,
    cursors: HashMap<u8, Cursor>,
}

impl MapTransfer {
    pub fn new(host_uid: u8, file_size: u64, max_bytes_per_second: u64) -> Self {
        MapTransfer {
            host_uid,
            file_size,
            // One tick (~1000ms) worth of budget refilled per second-scale tick.
            budget: TokenBucket::new(1000, max_bytes_per_second as f64, max_bytes_per_second as f64),
            cursors: HashMap::new(),
        }
    }

    /// Validate a client's `MAPSIZE` flag=1 report against the host's file
    /// size; `true` means the client is map-ready.
    pub fn validate_have_report(&self, size: u64) -> bool {
        size == self.file_size
    }

    pub fn begin_download(&mut self, to_uid: u8, resume_offset: u64) {
        self.cursors.insert(
            to_uid,
            Cursor {
                last_sent_offset: resume_offset,
                download_pct: percent_of(resume_offset, self.file_size),
            },
        );
    }

    pub fn is_downloading(&self, uid: u8) -> bool {
        self.cursors.contains_key(&uid)
    }

    pub fn download_pct(&self, uid: u8) -> Option<u8> {
        self.cursors.get(&uid).map(|c| c.download_pct)
    }

    /// Advance `now_ms` and return the next chunk for the user with the
    /// lowest `last_sent_offset` (ascending-offset fairness), bounded by
    /// the shared per-second byte budget. Returns `None` when
    /// either no one is downloading or the budget is exhausted this tick.
    pub fn next_chunk(&mut self, now_ms: u64, read: impl FnOnce(u64, usize) -> Vec<u8>) -> Option<(u8, MapChunk, Vec<u8>)> {
        self.budget.refill(now_ms);

        let uid = *self
            .cursors
            .iter()
            .filter(|(_, c)| c.last_sent_offset < self.file_size)
            .min_by_key(|(_, c)| c.last_sent_offset)
            .map(|(uid, _)| uid)?;

        let cursor = *self.cursors.get(&uid)?;
        let remaining = self.file_size - cursor.last_sent_offset;
        let len = remaining.min(MAX_CHUNK_BYTES as u64) as usize;
        if !self.budget.try_consume(len as f64) {
            return None;
        }

        let bytes = read(cursor.last_sent_offset, len);
        let crc = crc32_block(&bytes);
        let chunk = MapChunk {
            from_uid: self.host_uid,
            to_uid: uid,
            start_offset: cursor.last_sent_offset,
            crc32: crc,
            len,
        };
        Some((uid, chunk, bytes))
    }

    /// Client acknowledged receipt up to `chunk.start_offset + chunk.len`;
    /// returns `true` if this crossed a new 1% boundary, the trigger for a
    /// SLOTINFO download-progress update.
    pub fn ack_chunk(&mut self, uid: u8, chunk: &MapChunk) -> bool {
        let Some(cursor) = self.cursors.get_mut(&uid) else {
            return false;
        };
        let old_pct = cursor.download_pct;
        cursor.last_sent_offset = chunk.start_offset + chunk.len as u64;
        cursor.download_pct = percent_of(cursor.last_sent_offset, self.file_size);
        cursor.download_pct != old_pct
    }

    /// Client reported a corrupt chunk; rewind to re-send from `offset`.
    pub fn nack_chunk(&mut self, uid: u8, offset: u64) {
        if let Some(cursor) = self.cursors.get_mut(&uid) {
            cursor.last_sent_offset = offset;
        }
    }

    pub fn is_complete(&self, uid: u8) -> bool {
        self.cursors
            .get(&uid)
            .map(|c| c.last_sent_offset >= self.file_size)
            .unwrap_or(false)
    }
}

fn percent_of(offset: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((offset.min(total) * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn have_report_matches_file_size() {
        let mt = MapTransfer::new(1, 4096, 1_000_000);
        assert!(mt.validate_have_report(4096));
        assert!(!mt.validate_have_report(100));
    }

    #[test]
    fn one_byte_final_chunk_completes_transfer() {
        let mut mt = MapTransfer::new(1, 10, 1_000_000);
        mt.begin_download(2, 9);
        let (_, chunk, bytes) = mt.next_chunk(0, |_offset, len| vec![0xAB; len]).unwrap();
        assert_eq!(chunk.len, 1);
        assert_eq!(bytes.len(), 1);
        mt.ack_chunk(2, &chunk);
        assert!(mt.is_complete(2));
    }

    #[test]
    fn ascending_offset_fairness_picks_slowest_first() {
        let mut mt = MapTransfer::new(1, 10_000, 1_000_000);
        mt.begin_download(2, 5000);
        mt.begin_download(3, 1000);
        let (uid, _, _) = mt.next_chunk(0, |_o, len| vec![0u8; len]).unwrap();
        assert_eq!(uid, 3);
    }

    #[test]
    fn nack_rewinds_the_cursor() {
        let mut mt = MapTransfer::new(1, 10_000, 1_000_000);
        mt.begin_download(2, 5000);
        mt.nack_chunk(2, 4000);
        assert_eq!(mt.download_pct(2).unwrap(), 40);
    }

    #[test]
    fn budget_exhaustion_returns_none() {
        let mut mt = MapTransfer::new(1, 10_000, 1);
        mt.begin_download(2, 0);
        assert!(mt.next_chunk(0, |_o, len| vec![0u8; len]).is_none());
    }

    #[test]
    fn percent_crosses_boundary_on_ack() {
        let mut mt = MapTransfer::new(1, 100, 1_000_000);
        mt.begin_download(2, 0);
        let chunk = MapChunk {
            from_uid: 1,
            to_uid: 2,
            start_offset: 0,
            crc32: 0,
            len: 5,
        };
        assert!(mt.ack_chunk(2, &chunk));
    }
}
