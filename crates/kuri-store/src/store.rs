//! The `Store` handle: one directory, three files.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) const STATE_FILE: &str = "raft_state.dat";
pub(crate) const LOG_FILE: &str = "raft_log.dat";
pub(crate) const SNAPSHOT_FILE: &str = "raft_snapshot.dat";
const TEMP_SUFFIX: &str = ".tmp";

/// Handle to a node's durable storage directory.
///
/// Opened once at node creation. The log file stays open for the lifetime of
/// the store; state and snapshot files are rewritten whole on each save.
pub struct Store {
    dir: PathBuf,
    sync_writes: bool,
    pub(crate) log_file: File,
    pub(crate) log_count: u64,
}

impl Store {
    /// Open (or create) storage in `dir`.
    ///
    /// Creates the directory and an empty log file with a fresh header when
    /// none exists. With `sync_writes` set, every mutating call fsyncs before
    /// returning, which is required for the Raft durability contract.
    pub fn open(dir: impl Into<PathBuf>, sync_writes: bool) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(LOG_FILE))?;

        let mut store = Store {
            dir,
            sync_writes,
            log_file,
            log_count: 0,
        };
        store.init_log()?;
        Ok(store)
    }

    /// The data directory this store was opened on.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn sync_writes(&self) -> bool {
        self.sync_writes
    }

    pub(crate) fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub(crate) fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub(crate) fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Flush pending log writes to disk regardless of the `sync_writes` flag.
    pub fn sync(&mut self) -> Result<()> {
        self.log_file.sync_data()?;
        Ok(())
    }
}

/// Write `data` to `path` atomically: temp file, optional fsync, rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8], sync: bool) -> Result<()> {
    let tmp_path = {
        let mut os = path.as_os_str().to_owned();
        os.push(TEMP_SUFFIX);
        PathBuf::from(os)
    };

    let mut file = File::create(&tmp_path)?;
    if let Err(e) = file.write_all(data).and_then(|_| {
        if sync {
            file.sync_data()
        } else {
            Ok(())
        }
    }) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}
