#![forbid(unsafe_code)]
//! Little-endian field helpers shared by the page formats.

pub mod le {
    //! Fixed-offset little-endian accessors.
    //!
    //! The unchecked variants are for offsets computed from a page layout and
    //! panic on a short slice; the `read_*_checked` variants are for decoding
    //! bytes that came from disk.

    use crate::types::{Result, StorageError};

    /// Reads a `u32` at `off`.
    pub fn get_u32(src: &[u8], off: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&src[off..off + 4]);
        u32::from_le_bytes(bytes)
    }

    /// Writes a `u32` at `off`.
    pub fn put_u32(dst: &mut [u8], off: usize, v: u32) {
        dst[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads a `u64` at `off`.
    pub fn get_u64(src: &[u8], off: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&src[off..off + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Writes a `u64` at `off`.
    pub fn put_u64(dst: &mut [u8], off: usize, v: u64) {
        dst[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads a `u32` at `off`, failing on a short buffer.
    pub fn read_u32_checked(src: &[u8], off: usize) -> Result<u32> {
        let end = off
            .checked_add(4)
            .ok_or_else(|| StorageError::Corruption("u32 read offset overflow".into()))?;
        if end > src.len() {
            return Err(StorageError::Corruption(format!(
                "u32 at offset {off} exceeds buffer of {} bytes",
                src.len()
            )));
        }
        Ok(get_u32(src, off))
    }

    /// Reads a `u64` at `off`, failing on a short buffer.
    pub fn read_u64_checked(src: &[u8], off: usize) -> Result<u64> {
        let end = off
            .checked_add(8)
            .ok_or_else(|| StorageError::Corruption("u64 read offset overflow".into()))?;
        if end > src.len() {
            return Err(StorageError::Corruption(format!(
                "u64 at offset {off} exceeds buffer of {} bytes",
                src.len()
            )));
        }
        Ok(get_u64(src, off))
    }
}
