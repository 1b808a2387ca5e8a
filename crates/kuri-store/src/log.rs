//! Log file: header plus append-only entry records.
//!
//! ```text
//! header: | magic(4) | version(4) | base_index(8) | base_term(8) |
//! record: | record_len(4) | crc32(4) | term(8) | index(8) | cmd_len(4) | command(cmd_len) |
//! ```
//!
//! `record_len` is the full record size including the 28-byte record header.
//! The CRC covers `term ++ index ++ cmd_len ++ command`. Appends are O(1) at
//! end of file; truncation rewinds to just past the last surviving record and
//! `ftruncate`s, preserving the header. The `(base_index, base_term)` in the
//! header is the compaction point; it only changes through [`Store::rewrite_log`].

use crate::error::{Result, StoreError};
use crate::store::{write_atomic, Store};
use crate::{FORMAT_VERSION, LOG_MAGIC};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Read, Seek, SeekFrom, Write};

const HEADER_LEN: u64 = 24;
const RECORD_HEADER_LEN: usize = 28;

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub term: u64,
    pub index: u64,
    pub payload: Bytes,
}

/// Log file metadata: compaction base plus entry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogInfo {
    pub base_index: u64,
    pub base_term: u64,
    pub count: u64,
}

struct RecordHeader {
    record_len: u32,
    crc: u32,
    term: u64,
    index: u64,
    cmd_len: u32,
}

fn record_crc(term: u64, index: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&term.to_le_bytes());
    hasher.update(&index.to_le_bytes());
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

fn encode_record(term: u64, index: u64, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + payload.len());
    buf.put_u32_le((RECORD_HEADER_LEN + payload.len()) as u32);
    buf.put_u32_le(record_crc(term, index, payload));
    buf.put_u64_le(term);
    buf.put_u64_le(index);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf
}

impl Store {
    /// Write a fresh header when the file is empty, then count records.
    pub(crate) fn init_log(&mut self) -> Result<()> {
        let len = self.log_file.metadata()?.len();
        if len == 0 {
            let mut header = BytesMut::with_capacity(HEADER_LEN as usize);
            header.put_u32_le(LOG_MAGIC);
            header.put_u32_le(FORMAT_VERSION);
            header.put_u64_le(0); // base_index
            header.put_u64_le(0); // base_term
            self.log_file.write_all(&header)?;
            if self.sync_writes() {
                self.log_file.sync_data()?;
            }
            self.log_count = 0;
            return Ok(());
        }

        self.log_count = self.count_records()?;
        Ok(())
    }

    fn read_log_header(&mut self) -> Result<(u64, u64)> {
        self.log_file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_LEN as usize];
        self.log_file.read_exact(&mut header)?;

        let mut buf = &header[..];
        let magic = buf.get_u32_le();
        let version = buf.get_u32_le();
        if magic != LOG_MAGIC {
            return Err(StoreError::corruption("log file magic mismatch"));
        }
        if version != FORMAT_VERSION {
            return Err(StoreError::corruption(format!(
                "log file version {version} unsupported"
            )));
        }
        Ok((buf.get_u64_le(), buf.get_u64_le()))
    }

    /// Read the next record header at the current position.
    ///
    /// Returns `None` at a clean end of file; a partial header also ends the
    /// scan (a torn append that never made it to a reply).
    fn next_record_header(&mut self) -> Result<Option<RecordHeader>> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < RECORD_HEADER_LEN {
            let n = self.log_file.read(&mut header[filled..])?;
            if n == 0 {
                return Ok(None);
            }
            filled += n;
        }

        let mut buf = &header[..];
        Ok(Some(RecordHeader {
            record_len: buf.get_u32_le(),
            crc: buf.get_u32_le(),
            term: buf.get_u64_le(),
            index: buf.get_u64_le(),
            cmd_len: buf.get_u32_le(),
        }))
    }

    fn count_records(&mut self) -> Result<u64> {
        self.read_log_header()?;
        let mut count = 0;
        while let Some(rec) = self.next_record_header()? {
            if (rec.record_len as usize) < RECORD_HEADER_LEN {
                break;
            }
            let skip = rec.record_len as i64 - RECORD_HEADER_LEN as i64;
            self.log_file.seek(SeekFrom::Current(skip))?;
            count += 1;
        }
        Ok(count)
    }

    /// Append one entry record at end of file.
    pub fn append_entry(&mut self, term: u64, index: u64, payload: &[u8]) -> Result<()> {
        self.log_file.seek(SeekFrom::End(0))?;
        let record = encode_record(term, index, payload);
        self.log_file.write_all(&record)?;
        if self.sync_writes() {
            self.log_file.sync_data()?;
        }
        self.log_count += 1;
        Ok(())
    }

    /// Remove every record with `index > after_index`, preserving the header.
    pub fn truncate_after(&mut self, after_index: u64) -> Result<()> {
        self.read_log_header()?;
        let mut keep_end = HEADER_LEN;
        let mut count = 0;

        while let Some(rec) = self.next_record_header()? {
            if (rec.record_len as usize) < RECORD_HEADER_LEN {
                return Err(StoreError::corruption(format!(
                    "log record length {} below header size",
                    rec.record_len
                )));
            }
            if rec.index > after_index {
                break;
            }
            let skip = rec.record_len as i64 - RECORD_HEADER_LEN as i64;
            keep_end = self.log_file.seek(SeekFrom::Current(skip))?;
            count += 1;
        }

        self.log_file.set_len(keep_end)?;
        if self.sync_writes() {
            self.log_file.sync_data()?;
        }
        self.log_count = count;
        Ok(())
    }

    /// Read every record in file order, verifying checksums.
    ///
    /// Fails with [`StoreError::Corruption`] at the first bad record; nothing
    /// past a corrupt record is trusted.
    pub fn read_log(&mut self) -> Result<Vec<LogRecord>> {
        self.read_log_header()?;
        let mut records = Vec::with_capacity(self.log_count as usize);

        while let Some(rec) = self.next_record_header()? {
            if (rec.record_len as usize) < RECORD_HEADER_LEN
                || rec.record_len as u64 != RECORD_HEADER_LEN as u64 + rec.cmd_len as u64
            {
                return Err(StoreError::corruption(format!(
                    "log record at index {} has inconsistent length",
                    rec.index
                )));
            }

            let mut payload = vec![0u8; rec.cmd_len as usize];
            self.log_file.read_exact(&mut payload)?;

            if record_crc(rec.term, rec.index, &payload) != rec.crc {
                tracing::warn!(index = rec.index, "log record failed checksum");
                return Err(StoreError::corruption(format!(
                    "log record at index {} failed checksum",
                    rec.index
                )));
            }

            records.push(LogRecord {
                term: rec.term,
                index: rec.index,
                payload: Bytes::from(payload),
            });
        }
        Ok(records)
    }

    /// `(base_index, base_term, count)` from the header plus the running count.
    pub fn log_info(&mut self) -> Result<LogInfo> {
        let (base_index, base_term) = self.read_log_header()?;
        Ok(LogInfo {
            base_index,
            base_term,
            count: self.log_count,
        })
    }

    /// Atomically replace the whole log file: new compaction base, given
    /// records. Used after snapshot create (drop the compacted prefix) and
    /// snapshot install (drop everything).
    pub fn rewrite_log(&mut self, base_index: u64, base_term: u64, records: &[LogRecord]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(
            HEADER_LEN as usize
                + records
                    .iter()
                    .map(|r| RECORD_HEADER_LEN + r.payload.len())
                    .sum::<usize>(),
        );
        buf.put_u32_le(LOG_MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u64_le(base_index);
        buf.put_u64_le(base_term);
        for rec in records {
            buf.extend_from_slice(&encode_record(rec.term, rec.index, &rec.payload));
        }

        let path = self.log_path();
        write_atomic(&path, &buf, true)?;

        // The rename replaced the inode under the old handle; reopen.
        self.log_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;
        self.log_count = records.len() as u64;
        tracing::debug!(base_index, count = records.len(), "log rewritten");
        Ok(())
    }
}
