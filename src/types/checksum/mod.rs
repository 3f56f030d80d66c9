#![forbid(unsafe_code)]

use crc32fast::Hasher;

/// Checksum of one WAL log record: kind, transaction id and payload.
pub fn record_crc32(kind: u32, txn_id: u64, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&kind.to_le_bytes());
    hasher.update(&txn_id.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
