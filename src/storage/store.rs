//! Lazy, bounded-cache file handles with durable piece writes.
use super::layout::Layout;
use super::{StorageError, StorageResult};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Open file handles beyond this count are closed, oldest-used first.
pub const DEFAULT_HANDLE_CACHE: usize = 32;

struct CachedFile {
    file: File,
    last_used: u64,
}

/// Writes verified pieces to disk according to a [`Layout`], opening file
/// handles lazily and keeping at most `handle_cache_cap` open at once.
pub struct Store {
    root: PathBuf,
    layout: Layout,
    handles: HashMap<usize, CachedFile>,
    handle_cache_cap: usize,
    clock: u64,
    completed_pieces: usize,
    total_pieces: usize,
}

impl Store {
    pub fn new(root: PathBuf, layout: Layout, total_pieces: usize) -> Self {
        Store {
            root,
            layout,
            handles: HashMap::new(),
            handle_cache_cap: DEFAULT_HANDLE_CACHE,
            clock: 0,
            completed_pieces: 0,
            total_pieces,
        }
    }

    fn full_path(&self, span_idx: usize) -> PathBuf {
        self.root.join(&self.layout.spans()[span_idx].path)
    }

    fn open(&self, span_idx: usize) -> StorageResult<File> {
        let path = self.full_path(span_idx);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io { path: parent.to_path_buf(), source })?;
        }
        let span_len = self.layout.spans()[span_idx].end - self.layout.spans()[span_idx].start;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| StorageError::Io { path: path.clone(), source })?;
        if file.metadata().map(|m| m.len() as i64).unwrap_or(0) < span_len {
            file.set_len(span_len as u64).map_err(|source| StorageError::Io { path, source })?;
        }
        Ok(file)
    }

    fn handle(&mut self, span_idx: usize) -> StorageResult<&File> {
        if !self.handles.contains_key(&span_idx) {
            if self.handles.len() >= self.handle_cache_cap {
                self.evict_oldest();
            }
            let file = self.open(span_idx)?;
            self.handles.insert(span_idx, CachedFile { file, last_used: self.clock });
        }
        self.clock += 1;
        let entry = self.handles.get_mut(&span_idx).expect("just inserted or present");
        entry.last_used = self.clock;
        Ok(&entry.file)
    }

    fn evict_oldest(&mut self) {
        if let Some((&idx, _)) = self.handles.iter().min_by_key(|(_, c)| c.last_used) {
            self.handles.remove(&idx);
        }
    }

    /// Writes a verified piece's bytes to every file span it overlaps and
    /// fsyncs each touched file before returning.
    pub fn write_piece(&mut self, piece_index: u32, piece_length: i64, data: &[u8]) -> StorageResult<()> {
        let global_offset = Layout::piece_global_offset(piece_index, piece_length);
        let writes = self.layout.writes_for(global_offset, data.len());
        for (span_idx, offset_in_file, length) in writes {
            let chunk_start = (self.layout.spans()[span_idx].start + offset_in_file - global_offset).max(0) as usize;
            let chunk = &data[chunk_start..chunk_start + length];
            let path = self.full_path(span_idx);
            let file = self.handle(span_idx)?;
            file.write_at(chunk, offset_in_file as u64)
                .map_err(|source| StorageError::Io { path: path.clone(), source })?;
            file.sync_data().map_err(|source| StorageError::Io { path, source })?;
        }
        self.completed_pieces += 1;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.completed_pieces >= self.total_pieces
    }

    pub fn completed_pieces(&self) -> usize {
        self.completed_pieces
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::info::{FileDict, InfoDict};

    fn info() -> InfoDict {
        InfoDict {
            piece_length: 4,
            pieces: vec![0u8; 40],
            private: false,
            name: "t".to_string(),
            length: None,
            files: vec![
                FileDict { length: 3, path: vec!["a.bin".to_string()] },
                FileDict { length: 5, path: vec!["b.bin".to_string()] },
            ],
            is_directory: true,
        }
    }

    #[test]
    fn write_piece_persists_bytes_across_file_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::from_info(&info());
        let mut store = Store::new(dir.path().to_path_buf(), layout, 2);
        store.write_piece(0, 4, &[1, 2, 3, 4]).unwrap();
        let a = std::fs::read(dir.path().join("a.bin")).unwrap();
        assert_eq!(a, vec![1, 2, 3]);
        let b = std::fs::read(dir.path().join("b.bin")).unwrap();
        assert_eq!(&b[..1], &[4]);
    }

    #[test]
    fn completion_tracks_piece_count() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::from_info(&info());
        let mut store = Store::new(dir.path().to_path_buf(), layout, 2);
        assert!(!store.is_complete());
        store.write_piece(0, 4, &[0, 0, 0, 0]).unwrap();
        store.write_piece(1, 4, &[0, 0, 0, 0]).unwrap();
        assert!(store.is_complete());
    }

    #[test]
    fn handle_cache_evicts_oldest_when_over_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::from_info(&info());
        let mut store = Store::new(dir.path().to_path_buf(), layout, 2);
        store.handle_cache_cap = 1;
        store.handle(0).unwrap();
        store.handle(1).unwrap();
        assert_eq!(store.handles.len(), 1);
        assert!(store.handles.contains_key(&1));
    }
}
