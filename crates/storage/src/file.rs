//! File-backed storage - one record per file
//!
//! Each record lives in its own `<seq>.rec` file inside the store
//! directory. Writes go to a temporary file first, are fsynced, renamed
//! into place, and the directory is fsynced, so a record is either fully
//! present or absent after a crash.
//!
//! # Layout
//!
//! ```text
//! <dir>/00000000000000000042.rec    record 42
//! <dir>/00000000000000000043.rec    record 43
//! ```
//!
//! Zero-padded names keep lexical and numeric order aligned, which makes
//! directory listings readable during incident debugging. Files with other
//! extensions are ignored.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::{Storage, StorageError};

/// File extension for record files
const RECORD_EXT: &str = "rec";

/// File extension for in-flight writes
const TMP_EXT: &str = "tmp";

/// Durable record store with one file per record
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // Leftover temp files are writes that never committed.
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == TMP_EXT) {
                tracing::warn!(path = %path.display(), "removing uncommitted record file");
                let _ = fs::remove_file(&path);
            }
        }

        Ok(Self { dir })
    }

    /// The directory backing this store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id:020}.{RECORD_EXT}"))
    }

    fn tmp_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id:020}.{TMP_EXT}"))
    }

    /// Fsync the store directory so a rename is durable
    fn sync_dir(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, id: u64) -> Result<Option<Bytes>, StorageError> {
        let mut file = match File::open(self.record_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Some(Bytes::from(buf)))
    }

    fn set(&self, id: u64, value: &[u8]) -> Result<(), StorageError> {
        let tmp = self.tmp_path(id);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(value)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, self.record_path(id))?;
        self.sync_dir()?;
        Ok(())
    }

    fn delete(&self, id: u64) -> Result<(), StorageError> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.sync_dir()?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<u64>, StorageError> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|e| e == RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<u64>() {
                Ok(id) => keys.push(id),
                Err(_) => {
                    tracing::debug!(path = %path.display(), "ignoring foreign file in store directory");
                }
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("dir", &self.dir)
            .finish()
    }
}

#[cfg(test)]
#[path = "file_test.rs"]
mod file_test;
