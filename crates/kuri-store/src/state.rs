//! State file: `current_term` and `voted_for`.
//!
//! Fixed 28-byte layout, little-endian, packed:
//!
//! ```text
//! | magic(4) | version(4) | crc32(4) | current_term(8) | voted_for(4) | pad(4) |
//! ```
//!
//! The CRC covers `current_term ++ voted_for` (12 bytes). `voted_for` is an
//! i32 with -1 meaning "no vote". The file is rewritten whole on each save
//! via temp file + rename, so a crash leaves either the old or the new state.

use crate::error::{Result, StoreError};
use crate::store::{write_atomic, Store};
use crate::{FORMAT_VERSION, STATE_MAGIC};
use bytes::{Buf, BufMut, BytesMut};

const STATE_LEN: usize = 28;

impl Store {
    /// Persist `current_term` and `voted_for`.
    ///
    /// Must complete before any RPC reply that discloses the term change or
    /// the vote.
    pub fn save_state(&self, current_term: u64, voted_for: Option<u32>) -> Result<()> {
        let voted: i32 = match voted_for {
            Some(id) => id as i32,
            None => -1,
        };

        let mut body = BytesMut::with_capacity(12);
        body.put_u64_le(current_term);
        body.put_i32_le(voted);
        let crc = crc32fast::hash(&body);

        let mut buf = BytesMut::with_capacity(STATE_LEN);
        buf.put_u32_le(STATE_MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(crc);
        buf.put_slice(&body);
        buf.put_u32_le(0); // pad

        write_atomic(&self.state_path(), &buf, self.sync_writes())
    }

    /// Load `(current_term, voted_for)`.
    ///
    /// Returns [`StoreError::NotFound`] when no state file exists (fresh
    /// node), [`StoreError::Io`] on a short read, and
    /// [`StoreError::Corruption`] on magic/version/CRC mismatch.
    pub fn load_state(&self) -> Result<(u64, Option<u32>)> {
        let data = match std::fs::read(self.state_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };
        if data.len() != STATE_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("state file is {} bytes, expected {}", data.len(), STATE_LEN),
            )
            .into());
        }

        let mut buf = &data[..];
        let magic = buf.get_u32_le();
        let version = buf.get_u32_le();
        let crc = buf.get_u32_le();
        if magic != STATE_MAGIC {
            return Err(StoreError::corruption("state file magic mismatch"));
        }
        if version != FORMAT_VERSION {
            return Err(StoreError::corruption(format!(
                "state file version {version} unsupported"
            )));
        }

        let body = &data[12..24];
        if crc32fast::hash(body) != crc {
            return Err(StoreError::corruption("state file checksum mismatch"));
        }

        let current_term = buf.get_u64_le();
        let voted = buf.get_i32_le();
        let voted_for = if voted < 0 { None } else { Some(voted as u32) };
        Ok((current_term, voted_for))
    }
}
