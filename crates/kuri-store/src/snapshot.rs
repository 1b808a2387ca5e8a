//! Snapshot file: metadata header plus opaque state bytes.
//!
//! ```text
//! | magic(4) | version(4) | crc32(4) | pad(4) | last_index(8) | last_term(8) | state_len(8) | state... |
//! ```
//!
//! The CRC covers `last_index ++ last_term` (16 bytes). The file is written
//! through a temp file with an fsync before the atomic rename; a crash leaves
//! either the previous snapshot or the new one, never a torn header.

use crate::error::{Result, StoreError};
use crate::store::{write_atomic, Store};
use crate::{FORMAT_VERSION, SNAPSHOT_MAGIC};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const SNAPSHOT_HEADER_LEN: usize = 40;

/// Snapshot metadata: the log position the state bytes cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub last_index: u64,
    pub last_term: u64,
}

/// A loaded snapshot: metadata plus the full state bytes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub data: Bytes,
}

fn meta_crc(last_index: u64, last_term: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&last_index.to_le_bytes());
    hasher.update(&last_term.to_le_bytes());
    hasher.finalize()
}

impl Store {
    /// True when a snapshot file with at least a full header exists.
    pub fn snapshot_exists(&self) -> bool {
        std::fs::metadata(self.snapshot_path())
            .map(|m| m.len() >= SNAPSHOT_HEADER_LEN as u64)
            .unwrap_or(false)
    }

    /// Write a snapshot atomically, replacing any previous one.
    pub fn write_snapshot(&self, last_index: u64, last_term: u64, state: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(SNAPSHOT_HEADER_LEN + state.len());
        buf.put_u32_le(SNAPSHOT_MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(meta_crc(last_index, last_term));
        buf.put_u32_le(0); // pad
        buf.put_u64_le(last_index);
        buf.put_u64_le(last_term);
        buf.put_u64_le(state.len() as u64);
        buf.put_slice(state);

        // Snapshots always sync before the rename; losing one after the log
        // prefix was dropped would lose committed state.
        write_atomic(&self.snapshot_path(), &buf, true)
    }

    /// Read and validate only the snapshot header.
    pub fn snapshot_meta(&self) -> Result<SnapshotMeta> {
        let data = self.read_snapshot_file()?;
        Ok(parse_header(&data)?.0)
    }

    /// Read the full snapshot: metadata plus state bytes.
    pub fn read_snapshot(&self) -> Result<Snapshot> {
        let data = self.read_snapshot_file()?;
        let (meta, state_len) = parse_header(&data)?;

        let state = &data[SNAPSHOT_HEADER_LEN..];
        if state.len() as u64 != state_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "snapshot state is {} bytes, header says {}",
                    state.len(),
                    state_len
                ),
            )
            .into());
        }

        Ok(Snapshot {
            meta,
            data: Bytes::copy_from_slice(state),
        })
    }

    fn read_snapshot_file(&self) -> Result<Vec<u8>> {
        match std::fs::read(self.snapshot_path()) {
            Ok(data) if data.len() >= SNAPSHOT_HEADER_LEN => Ok(data),
            Ok(_) => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "snapshot file shorter than header",
            )
            .into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_header(data: &[u8]) -> Result<(SnapshotMeta, u64)> {
    let mut buf = &data[..SNAPSHOT_HEADER_LEN];
    let magic = buf.get_u32_le();
    let version = buf.get_u32_le();
    let crc = buf.get_u32_le();
    let _pad = buf.get_u32_le();
    let last_index = buf.get_u64_le();
    let last_term = buf.get_u64_le();
    let state_len = buf.get_u64_le();

    if magic != SNAPSHOT_MAGIC {
        return Err(StoreError::corruption("snapshot magic mismatch"));
    }
    if version != FORMAT_VERSION {
        return Err(StoreError::corruption(format!(
            "snapshot version {version} unsupported"
        )));
    }
    if meta_crc(last_index, last_term) != crc {
        return Err(StoreError::corruption("snapshot header checksum mismatch"));
    }

    Ok((
        SnapshotMeta {
            last_index,
            last_term,
        },
        state_len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        assert!(!store.snapshot_exists());
        store.write_snapshot(10, 3, b"state-bytes").unwrap();
        assert!(store.snapshot_exists());

        let meta = store.snapshot_meta().unwrap();
        assert_eq!(
            meta,
            SnapshotMeta {
                last_index: 10,
                last_term: 3
            }
        );

        let snap = store.read_snapshot().unwrap();
        assert_eq!(snap.meta, meta);
        assert_eq!(snap.data, Bytes::from_static(b"state-bytes"));
    }

    #[test]
    fn test_snapshot_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store.write_snapshot(5, 2, b"").unwrap();
        let snap = store.read_snapshot().unwrap();
        assert_eq!(snap.meta.last_index, 5);
        assert!(snap.data.is_empty());
    }

    #[test]
    fn test_snapshot_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store.write_snapshot(5, 1, b"old").unwrap();
        store.write_snapshot(20, 4, b"new").unwrap();

        let snap = store.read_snapshot().unwrap();
        assert_eq!(snap.meta.last_index, 20);
        assert_eq!(snap.data, Bytes::from_static(b"new"));
    }

    #[test]
    fn test_snapshot_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        assert!(matches!(
            store.snapshot_meta(),
            Err(crate::StoreError::NotFound)
        ));
    }

    #[test]
    fn test_snapshot_detects_tampered_meta() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();
        store.write_snapshot(10, 3, b"s").unwrap();

        let path = dir.path().join("raft_snapshot.dat");
        let mut data = std::fs::read(&path).unwrap();
        data[16..24].copy_from_slice(&999u64.to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(
            store.snapshot_meta(),
            Err(crate::StoreError::Corruption { .. })
        ));
    }
}
