// Path: crates/mmr/src/backend/file.rs
//! A flat file of 32-byte words.
//!
//! Word 0 holds the leaf length as a big-endian `u64` in its first eight
//! bytes. Node `p` is word `p + 1`. An all-zero word is an unwritten node.

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use strata_api::mmr::MmrDb;
use strata_api::storage::StorageError;
use strata_types::Hash32;

/// Size of one word in the accumulator file.
pub const WORD_SIZE: u64 = 32;

fn io(e: std::io::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// An [`MmrDb`] persisted in a single exclusively-locked file.
pub struct FileMmrDb {
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for FileMmrDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMmrDb").field("path", &self.path).finish()
    }
}

fn read_word(file: &mut File, index: u64) -> Result<Option<[u8; 32]>, StorageError> {
    let len = file.metadata().map_err(io)?.len();
    let offset = index * WORD_SIZE;
    if offset + WORD_SIZE > len {
        return Ok(None);
    }
    let mut word = [0u8; 32];
    file.seek(SeekFrom::Start(offset)).map_err(io)?;
    file.read_exact(&mut word).map_err(io)?;
    Ok(Some(word))
}

fn write_word(file: &mut File, index: u64, word: &[u8; 32]) -> Result<(), StorageError> {
    file.seek(SeekFrom::Start(index * WORD_SIZE)).map_err(io)?;
    file.write_all(word).map_err(io)
}

fn length_word(length: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    for (dst, src) in word.iter_mut().zip(length.to_be_bytes()) {
        *dst = src;
    }
    word
}

impl FileMmrDb {
    /// Opens or creates the accumulator file and locks it for this process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io)?;
        file.try_lock_exclusive().map_err(|e| {
            StorageError::Backend(format!("accumulator file {} is locked: {}", path.display(), e))
        })?;
        if file.metadata().map_err(io)?.len() < WORD_SIZE {
            write_word(&mut file, 0, &length_word(0))?;
            file.sync_all().map_err(io)?;
        }
        tracing::info!(target: "mmr", path = %path.display(), "opened accumulator file");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// The file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MmrDb for FileMmrDb {
    async fn get(&self, pos: u64) -> Result<Option<Hash32>, StorageError> {
        let mut file = self.file.lock();
        Ok(read_word(&mut file, pos + 1)?
            .filter(|w| w.iter().any(|b| *b != 0))
            .map(Hash32))
    }

    async fn set(&self, value: Hash32, pos: u64) -> Result<(), StorageError> {
        let mut file = self.file.lock();
        write_word(&mut file, pos + 1, value.as_bytes())?;
        file.sync_data().map_err(io)
    }

    async fn bulk_set(&self, nodes: &BTreeMap<u64, Hash32>) -> Result<(), StorageError> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock();
        for (pos, value) in nodes {
            write_word(&mut file, pos + 1, value.as_bytes())?;
        }
        file.sync_data().map_err(io)
    }

    async fn get_leaf_length(&self) -> Result<u64, StorageError> {
        let mut file = self.file.lock();
        let word = read_word(&mut file, 0)?.unwrap_or([0u8; 32]);
        let mut bytes = [0u8; 8];
        for (dst, src) in bytes.iter_mut().zip(word) {
            *dst = src;
        }
        Ok(u64::from_be_bytes(bytes))
    }

    async fn set_leaf_length(&self, length: u64) -> Result<u64, StorageError> {
        let mut file = self.file.lock();
        write_word(&mut file, 0, &length_word(length))?;
        file.sync_data().map_err(io)?;
        Ok(length)
    }

    async fn get_nodes(&self) -> Result<BTreeMap<u64, Hash32>, StorageError> {
        let mut file = self.file.lock();
        let words = file.metadata().map_err(io)?.len() / WORD_SIZE;
        let mut out = BTreeMap::new();
        for index in 1..words {
            if let Some(word) = read_word(&mut file, index)? {
                if word.iter().any(|b| *b != 0) {
                    out.insert(index - 1, Hash32(word));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nodes_and_length_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmr.dat");
        {
            let db = FileMmrDb::open(&path).unwrap();
            assert_eq!(db.get_leaf_length().await.unwrap(), 0);
            let nodes: BTreeMap<u64, Hash32> = [(0, Hash32([1; 32])), (2, Hash32([3; 32]))].into();
            db.bulk_set(&nodes).await.unwrap();
            db.set_leaf_length(2).await.unwrap();
        }
        let db = FileMmrDb::open(&path).unwrap();
        assert_eq!(db.get_leaf_length().await.unwrap(), 2);
        assert_eq!(db.get(0).await.unwrap(), Some(Hash32([1; 32])));
        assert_eq!(db.get(1).await.unwrap(), None);
        assert_eq!(db.get(9).await.unwrap(), None);
        assert_eq!(db.get_nodes().await.unwrap().len(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * WORD_SIZE);
    }

    #[tokio::test]
    async fn second_open_is_refused_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmr.dat");
        let _held = FileMmrDb::open(&path).unwrap();
        assert!(FileMmrDb::open(&path).is_err());
    }
}
