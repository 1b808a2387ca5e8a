//! kuri-store: durable storage for the kuri Raft core.
//!
//! Three files in one directory:
//! - `raft_state.dat` — current term and vote, rewritten atomically
//! - `raft_log.dat` — header plus append-only CRC-checked entry records
//! - `raft_snapshot.dat` — snapshot metadata plus opaque state bytes
//!
//! All layouts are little-endian and packed. Every record and header carries
//! a CRC32 (polynomial 0xEDB88320); loads fail with [`StoreError::Corruption`]
//! on any magic, version, or checksum mismatch.
//!
//! Writes that replace a whole file (state, snapshot, log rewrite) go through
//! a temp file and an atomic rename. Log appends are O(1) at end of file.

pub mod error;
pub mod log;
pub mod snapshot;
pub mod state;
mod store;

pub use error::{Result, StoreError};
pub use log::{LogInfo, LogRecord};
pub use snapshot::{Snapshot, SnapshotMeta};
pub use store::Store;

/// Magic/version constants shared by the file formats.
pub const STATE_MAGIC: u32 = 0x5241_4654; // "RAFT"
pub const LOG_MAGIC: u32 = 0x524C_4F47; // "RLOG"
pub const SNAPSHOT_MAGIC: u32 = 0x5253_4E50; // "RSNP"
pub const FORMAT_VERSION: u32 = 1;
