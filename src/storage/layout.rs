//! Linear piece-space -> (file, file_offset, length) mapping, shared by
//! single-file and multi-file torrents.
use crate::torrent::info::InfoDict;
use std::path::PathBuf;

/// One file's byte span within the linear torrent-wide address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpan {
    pub path: PathBuf,
    pub start: i64,
    pub end: i64,
}

/// The set of files a torrent's content spans, in linear order.
pub struct Layout {
    spans: Vec<FileSpan>,
}

impl Layout {
    pub fn from_info(info: &InfoDict) -> Self {
        let mut spans = Vec::new();
        if !info.is_directory {
            spans.push(FileSpan {
                path: PathBuf::from(&info.name),
                start: 0,
                end: info.length.unwrap_or(0),
            });
        } else {
            let mut cursor = 0i64;
            for file in &info.files {
                let mut path = PathBuf::from(&info.name);
                for component in &file.path {
                    path = path.join(component);
                }
                spans.push(FileSpan {
                    path,
                    start: cursor,
                    end: cursor + file.length,
                });
                cursor += file.length;
            }
        }
        Layout { spans }
    }

    pub fn spans(&self) -> &[FileSpan] {
        &self.spans
    }

    /// The `(file_index, offset_within_file, length)` writes needed to
    /// place `data` (`data.len()` bytes) at the given torrent-wide byte
    /// offset. A write that crosses a file boundary is split across
    /// multiple entries.
    pub fn writes_for(&self, global_offset: i64, data_len: usize) -> Vec<(usize, i64, usize)> {
        let global_end = global_offset + data_len as i64;
        let mut writes = Vec::new();
        for (idx, span) in self.spans.iter().enumerate() {
            if span.end <= global_offset || span.start >= global_end {
                continue;
            }
            let overlap_start = global_offset.max(span.start);
            let overlap_end = global_end.min(span.end);
            writes.push((idx, overlap_start - span.start, (overlap_end - overlap_start) as usize));
        }
        writes
    }

    /// The torrent-wide byte offset of piece `index`'s first byte.
    pub fn piece_global_offset(piece_index: u32, piece_length: i64) -> i64 {
        piece_index as i64 * piece_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::info::FileDict;

    fn multi_file_info() -> InfoDict {
        InfoDict {
            piece_length: 4,
            pieces: vec![0u8; 20],
            private: false,
            name: "torrent".to_string(),
            length: None,
            files: vec![
                FileDict { length: 3, path: vec!["a.txt".to_string()] },
                FileDict { length: 5, path: vec!["sub".to_string(), "b.txt".to_string()] },
            ],
            is_directory: true,
        }
    }

    #[test]
    fn single_file_layout_has_one_span_covering_the_whole_length() {
        let info = InfoDict {
            piece_length: 4,
            pieces: vec![0u8; 20],
            private: false,
            name: "one.bin".to_string(),
            length: Some(10),
            files: vec![],
            is_directory: false,
        };
        let layout = Layout::from_info(&info);
        assert_eq!(layout.spans().len(), 1);
        assert_eq!(layout.spans()[0].end, 10);
    }

    #[test]
    fn multi_file_spans_are_contiguous() {
        let layout = Layout::from_info(&multi_file_info());
        assert_eq!(layout.spans()[0].start, 0);
        assert_eq!(layout.spans()[0].end, 3);
        assert_eq!(layout.spans()[1].start, 3);
        assert_eq!(layout.spans()[1].end, 8);
    }

    #[test]
    fn write_spanning_the_file_boundary_splits_into_two_entries() {
        let layout = Layout::from_info(&multi_file_info());
        let writes = layout.writes_for(2, 4);
        assert_eq!(writes, vec![(0, 2, 1), (1, 0, 3)]);
    }

    #[test]
    fn write_within_a_single_file_yields_one_entry() {
        let layout = Layout::from_info(&multi_file_info());
        let writes = layout.writes_for(3, 3);
        assert_eq!(writes, vec![(1, 0, 3)]);
    }
}
