use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::primitives::bytes::le;
use crate::types::checksum::record_crc32;
use crate::types::{PageIdx, Result, StorageError, PAGE_SIZE};

const LOG_MAGIC: &[u8; 8] = b"LISTWAL\0";
const LOG_VERSION_MAJOR: u16 = 1;
const LOG_VERSION_MINOR: u16 = 0;
pub(crate) const LOG_HEADER_SIZE: usize = 32;
const FRAME_HEADER_SIZE: usize = 24;

const RECORD_PAGE_UPDATE: u32 = 1;
const RECORD_COMMIT: u32 = 2;

/// One durable log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum WalRecord {
    /// Shadow page `shadow` holds the new image of `original` in `path`.
    PageUpdate {
        path: PathBuf,
        original: PageIdx,
        shadow: PageIdx,
    },
    /// Everything logged earlier under the same transaction is durable.
    Commit,
}

/// A page update belonging to a committed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CommittedUpdate {
    pub(crate) path: PathBuf,
    pub(crate) original: PageIdx,
    pub(crate) shadow: PageIdx,
}

/// Append-only record log with a fixed header and crc32-checked frames.
///
/// Frame layout: `kind:u32 frame_no:u32 crc:u32 txn:u64 payload_len:u32`
/// followed by the payload.
#[derive(Debug)]
pub(crate) struct WalLog {
    file: File,
    next_frame_number: u32,
    sync_enabled: bool,
}

impl WalLog {
    pub(crate) fn open(path: &Path, sync_enabled: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut log = Self {
            file,
            next_frame_number: 1,
            sync_enabled,
        };
        if log.file.metadata()?.len() == 0 {
            log.write_header()?;
        } else {
            log.validate_header()?;
        }
        Ok(log)
    }

    pub(crate) fn append(&mut self, txn_id: u64, record: &WalRecord) -> Result<()> {
        let (kind, payload) = match record {
            WalRecord::PageUpdate {
                path,
                original,
                shadow,
            } => {
                let path = path
                    .to_str()
                    .ok_or(StorageError::Invalid("WAL only logs UTF-8 file paths"))?;
                let mut payload = Vec::with_capacity(12 + path.len());
                payload.extend_from_slice(&original.to_le_bytes());
                payload.extend_from_slice(&shadow.to_le_bytes());
                payload.extend_from_slice(&(path.len() as u32).to_le_bytes());
                payload.extend_from_slice(path.as_bytes());
                (RECORD_PAGE_UPDATE, payload)
            }
            WalRecord::Commit => (RECORD_COMMIT, Vec::new()),
        };

        let mut header = [0u8; FRAME_HEADER_SIZE];
        le::put_u32(&mut header, 0, kind);
        le::put_u32(&mut header, 4, self.next_frame_number);
        le::put_u32(&mut header, 8, record_crc32(kind, txn_id, &payload));
        le::put_u64(&mut header, 12, txn_id);
        le::put_u32(&mut header, 20, payload.len() as u32);

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&header)?;
        self.file.write_all(&payload)?;
        self.next_frame_number = self
            .next_frame_number
            .checked_add(1)
            .ok_or_else(|| StorageError::Corruption("WAL frame number overflow".into()))?;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        if self.sync_enabled {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        self.file.set_len(LOG_HEADER_SIZE as u64)?;
        self.file.seek(SeekFrom::End(0))?;
        self.next_frame_number = 1;
        self.sync()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Page updates of every committed transaction, in commit order.
    ///
    /// A torn final frame ends the scan; damage before the tail is corruption.
    pub(crate) fn committed_updates(&mut self) -> Result<Vec<CommittedUpdate>> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;

        let mut committed = Vec::new();
        let mut pending: HashMap<u64, Vec<CommittedUpdate>> = HashMap::new();
        let mut expected_frame = 1u32;
        let mut pos = LOG_HEADER_SIZE;

        while pos < bytes.len() {
            if bytes.len() - pos < FRAME_HEADER_SIZE {
                warn!(offset = pos, "wal.log.torn_header");
                break;
            }
            let kind = le::get_u32(&bytes, pos);
            let frame_number = le::get_u32(&bytes, pos + 4);
            let checksum = le::get_u32(&bytes, pos + 8);
            let txn_id = le::get_u64(&bytes, pos + 12);
            let payload_len = le::get_u32(&bytes, pos + 20) as usize;
            let payload_start = pos + FRAME_HEADER_SIZE;
            let Some(payload_end) = payload_start
                .checked_add(payload_len)
                .filter(|end| *end <= bytes.len())
            else {
                warn!(offset = pos, "wal.log.torn_payload");
                break;
            };
            let payload = &bytes[payload_start..payload_end];
            if record_crc32(kind, txn_id, payload) != checksum {
                if payload_end == bytes.len() {
                    warn!(offset = pos, "wal.log.torn_checksum");
                    break;
                }
                return Err(StorageError::Corruption(format!(
                    "WAL frame {frame_number} checksum mismatch"
                )));
            }
            if frame_number != expected_frame {
                return Err(StorageError::Corruption(format!(
                    "WAL frame {frame_number} out of sequence (expected {expected_frame})"
                )));
            }
            expected_frame += 1;

            match kind {
                RECORD_PAGE_UPDATE => {
                    let update = decode_page_update(payload)?;
                    pending.entry(txn_id).or_default().push(update);
                }
                RECORD_COMMIT => {
                    if let Some(updates) = pending.remove(&txn_id) {
                        committed.extend(updates);
                    }
                }
                other => {
                    return Err(StorageError::Corruption(format!(
                        "unknown WAL record kind {other}"
                    )))
                }
            }
            pos = payload_end;
        }

        self.next_frame_number = expected_frame;
        Ok(committed)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = [0u8; LOG_HEADER_SIZE];
        header[..LOG_MAGIC.len()].copy_from_slice(LOG_MAGIC);
        header[8..10].copy_from_slice(&LOG_VERSION_MAJOR.to_le_bytes());
        header[10..12].copy_from_slice(&LOG_VERSION_MINOR.to_le_bytes());
        le::put_u32(&mut header, 12, PAGE_SIZE as u32);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn validate_header(&mut self) -> Result<()> {
        let mut header = [0u8; LOG_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut header)?;
        if &header[..LOG_MAGIC.len()] != LOG_MAGIC {
            return Err(StorageError::Corruption("invalid WAL magic".into()));
        }
        let major = u16::from_le_bytes([header[8], header[9]]);
        let minor = u16::from_le_bytes([header[10], header[11]]);
        if major != LOG_VERSION_MAJOR || minor != LOG_VERSION_MINOR {
            return Err(StorageError::Corruption(format!(
                "unsupported WAL version {major}.{minor}"
            )));
        }
        let page_size = le::read_u32_checked(&header, 12)?;
        if page_size as usize != PAGE_SIZE {
            return Err(StorageError::Corruption(format!(
                "WAL page size {page_size} differs from {PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

fn decode_page_update(payload: &[u8]) -> Result<CommittedUpdate> {
    let original = le::read_u32_checked(payload, 0)?;
    let shadow = le::read_u32_checked(payload, 4)?;
    let path_len = le::read_u32_checked(payload, 8)? as usize;
    let path_bytes = payload
        .get(12..12 + path_len)
        .ok_or_else(|| StorageError::Corruption("WAL page update path truncated".into()))?;
    let path = std::str::from_utf8(path_bytes)
        .map_err(|_| StorageError::Corruption("WAL page update path is not UTF-8".into()))?;
    Ok(CommittedUpdate {
        path: PathBuf::from(path),
        original,
        shadow,
    })
}
