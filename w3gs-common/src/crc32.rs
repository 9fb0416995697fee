// crc32.rs — CRC-32 helpers for map chunks, keep-alive sync checks, and the
// 16-bit CRC prefix carried by every W3GS action sub-packet.
//
// Grounded on mattx86-myq2-rust's crc.rs, which delegates the same way to
// the `crc` crate instead of hand-rolling a table.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32_CALC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 over a full block (map file chunks, map file integrity checks).
pub fn crc32_block(data: &[u8]) -> u32 {
    CRC32_CALC.checksum(data)
}

/// The 16-bit action-frame checksum prefixing every INCOMING_ACTION(2)
/// sub-packet: low 16 bits of the CRC-32 over the concatenated action bytes.
pub fn action_checksum(data: &[u8]) -> u16 {
    (crc32_block(data) & 0xffff) as u16
}
