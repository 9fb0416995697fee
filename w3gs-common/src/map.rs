// map.rs — the Map descriptor and version-aware MAPCHECK
// hash selection.
//
// Grounded on mattx86-myq2-rust's crc.rs/md4.rs pairing (a block-checksum
// type plus a content-hash type living side by side) and on its `server.rs`
// struct style: plain public fields, a constructor, and small derived
// accessors rather than a builder.

use crate::slot::LayoutKind;

/// Map protocol versions diverge at 1.23: earlier clients' MAPCHECK omits the
/// scripts SHA-1.
pub const SCRIPTS_HASH_MIN_VERSION: u32 = 23;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Map {
    pub path: String,
    pub crc32: u32,
    pub scripts_sha1: [u8; 20],
    pub blizz_hash: u32,
    pub width: u16,
    pub height: u16,
    pub flags: u32,
    pub layout: LayoutKind,
    pub min_game_version: u32,
    pub slot_count: usize,
}

impl Map {
    pub fn new(
        path: impl Into<String>,
        crc32: u32,
        scripts_sha1: [u8; 20],
        blizz_hash: u32,
        width: u16,
        height: u16,
        flags: u32,
        layout: LayoutKind,
        min_game_version: u32,
        slot_count: usize,
    ) -> Self {
        Map {
            path: path.into(),
            crc32,
            scripts_sha1,
            blizz_hash,
            width,
            height,
            flags,
            layout,
            min_game_version,
            slot_count,
        }
    }

    /// True when a client claiming `game_version` must receive the scripts
    /// SHA-1 as part of MAPCHECK.
    pub fn sends_scripts_hash_to(&self, game_version: u32) -> bool {
        game_version >= SCRIPTS_HASH_MIN_VERSION
    }

    /// Assemble the MAPCHECK payload body for a client claiming
    /// `game_version`: CRC-32, blizz-hash, and (1.23+) the scripts SHA-1.
    pub fn mapcheck_payload(&self, game_version: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(28);
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.blizz_hash.to_le_bytes());
        if self.sends_scripts_hash_to(game_version) {
            out.extend_from_slice(&self.scripts_sha1);
        }
        out
    }
}

/// Compute the scripts SHA-1 a `MapSource` collaborator should fill into
/// `Map::scripts_sha1` after reading a map's `war3map.j`/common.j/blizzard.j
/// bytes off disk.
pub fn compute_scripts_sha1(scripts_bytes: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let digest = Sha1::digest(scripts_bytes);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}
