//! `ChunkStore` implementation.
//!
//! All operations are blocking filesystem calls; async callers run them on
//! `tokio::task::spawn_blocking`.

use std::fs::{self, File, ReadDir};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use mnstore_types::ChunkId;
use tracing::{debug, instrument};

use crate::{Result, StorageError};

/// Hex characters per shard directory name.
const SHARD_WIDTH: usize = 3;

/// Depth of the shard tree below the base directory.
const SHARD_LEVELS: usize = 2;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content-addressed chunk storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    base: PathBuf,
    mode: u32,
}

fn create_dirs(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}

impl ChunkStore {
    /// Open (creating if needed) a store at `base`. New directories get
    /// permission bits `mode`.
    pub fn new<P: AsRef<Path>>(base: P, mode: u32) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        create_dirs(&base, mode)?;
        Ok(Self { base, mode })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `base/hex[0:3]/hex[3:6]/hex`.
    pub fn path_for(&self, id: &ChunkId) -> PathBuf {
        let hex = id.to_hex();
        self.base
            .join(&hex[..SHARD_WIDTH])
            .join(&hex[SHARD_WIDTH..2 * SHARD_WIDTH])
            .join(hex)
    }

    /// Write `data` under `id`. The bytes are written to a hidden sibling
    /// file and renamed into place.
    #[instrument(skip(self, data), fields(chunk_id = %id.short(), len = data.len()), level = "debug")]
    pub fn put(&self, id: &ChunkId, data: &[u8]) -> Result<()> {
        let path = self.path_for(id);
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidEntry(path.display().to_string()))?;
        create_dirs(parent, self.mode)?;

        let temp_path = parent.join(format!(
            ".{}.{}.{}.tmp",
            id.to_hex(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let write = || -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Read the whole chunk.
    pub fn get(&self, id: &ChunkId) -> Result<Vec<u8>> {
        fs::read(self.path_for(id)).map_err(|e| not_found_or_io(e, id))
    }

    /// Read up to `length` bytes starting at `offset`. Fewer bytes are
    /// returned when the chunk ends first.
    pub fn get_range(&self, id: &ChunkId, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut file = File::open(self.path_for(id)).map_err(|e| not_found_or_io(e, id))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(length);
        file.take(length as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Remove a chunk. Removing an absent chunk is not an error.
    pub fn delete(&self, id: &ChunkId) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, id: &ChunkId) -> bool {
        fs::metadata(self.path_for(id)).is_ok()
    }

    /// True only if the chunk is present and its bytes hash to `id`.
    pub fn verify(&self, id: &ChunkId) -> Result<bool> {
        let data = self.get(id)?;
        let ok = id.matches(&data);
        if !ok {
            debug!(chunk_id = %id.short(), "stored chunk fails verification");
        }
        Ok(ok)
    }

    /// Lazily enumerate every stored chunk id.
    pub fn index(&self) -> Result<ChunkIndex> {
        Ok(ChunkIndex {
            stack: vec![fs::read_dir(&self.base)?],
        })
    }
}

fn not_found_or_io(e: io::Error, id: &ChunkId) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(*id)
    } else {
        StorageError::Io(e)
    }
}

/// Iterator over the ids in a [`ChunkStore`], walking the shard tree
/// depth-first.
#[derive(Debug)]
pub struct ChunkIndex {
    stack: Vec<ReadDir>,
}

impl ChunkIndex {
    fn visit(&mut self, entry: fs::DirEntry, depth: usize) -> Option<Result<ChunkId>> {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => return Some(Err(e.into())),
        };
        let name = entry.file_name().to_string_lossy().into_owned();

        if depth < SHARD_LEVELS {
            if !file_type.is_dir() {
                return Some(Err(StorageError::InvalidEntry(path.display().to_string())));
            }
            match fs::read_dir(&path) {
                Ok(rd) => self.stack.push(rd),
                Err(e) => return Some(Err(e.into())),
            }
            return None;
        }

        // Leftover from an interrupted write.
        if name.starts_with('.') && name.ends_with(".tmp") {
            return None;
        }
        if !file_type.is_file() {
            return Some(Err(StorageError::InvalidEntry(path.display().to_string())));
        }
        Some(
            ChunkId::from_hex(&name)
                .map_err(|_| StorageError::InvalidEntry(path.display().to_string())),
        )
    }
}

impl Iterator for ChunkIndex {
    type Item = Result<ChunkId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.stack.len().checked_sub(1)?;
            let top = self.stack.last_mut()?;
            match top.next() {
                None => {
                    self.stack.pop();
                    if self.stack.is_empty() {
                        return None;
                    }
                }
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(entry)) => {
                    if let Some(item) = self.visit(entry, depth) {
                        return Some(item);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ChunkStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = ChunkStore::new(dir.path().join("chunks"), 0o700).expect("store");
        (dir, store)
    }

    #[test]
    fn test_put_get_verify_delete() {
        let (_dir, store) = store();
        let data = b"some chunk bytes".to_vec();
        let id = ChunkId::of(&data);

        store.put(&id, &data).expect("put");
        assert_eq!(store.get(&id).expect("get"), data);
        assert!(store.verify(&id).expect("verify"));
        assert!(store.exists(&id));

        store.delete(&id).expect("delete");
        assert!(!store.exists(&id));
        assert!(matches!(store.get(&id), Err(StorageError::NotFound(_))));
        store.delete(&id).expect("second delete is a no-op");
    }

    #[test]
    fn test_path_layout() {
        let (_dir, store) = store();
        let id = ChunkId::of(b"layout");
        let hex = id.to_hex();
        let expected = store
            .base()
            .join(&hex[0..3])
            .join(&hex[3..6])
            .join(&hex);
        assert_eq!(store.path_for(&id), expected);
    }

    #[test]
    fn test_get_range() {
        let (_dir, store) = store();
        let data: Vec<u8> = (0..=255).collect();
        let id = ChunkId::of(&data);
        store.put(&id, &data).expect("put");
        assert_eq!(store.get_range(&id, 10, 5).expect("range"), vec![10, 11, 12, 13, 14]);
        assert_eq!(store.get_range(&id, 250, 100).expect("tail").len(), 6);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (_dir, store) = store();
        let id = ChunkId::of(b"original");
        store.put(&id, b"tampered").expect("put");
        assert!(!store.verify(&id).expect("verify"));
    }

    #[test]
    fn test_put_overwrites() {
        let (_dir, store) = store();
        let id = ChunkId::of(b"v2");
        store.put(&id, b"v1").expect("put v1");
        store.put(&id, b"v2").expect("put v2");
        assert_eq!(store.get(&id).expect("get"), b"v2");
    }

    #[test]
    fn test_index_lists_all() {
        let (_dir, store) = store();
        let mut ids: Vec<ChunkId> = (0..20u8)
            .map(|i| {
                let data = vec![i; 10];
                let id = ChunkId::of(&data);
                store.put(&id, &data).expect("put");
                id
            })
            .collect();
        let mut listed: Vec<ChunkId> = store
            .index()
            .expect("index")
            .collect::<Result<_>>()
            .expect("entries");
        ids.sort();
        listed.sort();
        assert_eq!(ids, listed);
    }

    #[test]
    fn test_index_empty() {
        let (_dir, store) = store();
        assert_eq!(store.index().expect("index").count(), 0);
    }

    #[test]
    fn test_index_rejects_stray_file() {
        let (_dir, store) = store();
        let id = ChunkId::of(b"x");
        store.put(&id, b"x").expect("put");
        fs::write(store.base().join("stray.txt"), b"?").expect("write stray");
        let results: Vec<_> = store.index().expect("index").collect();
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StorageError::InvalidEntry(_)))));
    }

    #[test]
    fn test_index_rejects_bad_filename() {
        let (_dir, store) = store();
        let shard = store.base().join("abc").join("def");
        fs::create_dir_all(&shard).expect("mkdir");
        fs::write(shard.join("not-a-chunk"), b"?").expect("write");
        let results: Vec<_> = store.index().expect("index").collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(StorageError::InvalidEntry(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_mode() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = store();
        let id = ChunkId::of(b"mode");
        store.put(&id, b"mode").expect("put");
        let shard = store.path_for(&id);
        let parent = shard.parent().expect("parent");
        let mode = fs::metadata(parent).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
