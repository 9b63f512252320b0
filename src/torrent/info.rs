//! The `info` dict assembled by the metadata fetcher: piece layout and
//! single/multi-file structure, independent of any `.torrent` file.
use super::TorrentError;
use crate::bencode::BencodeValue;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub private: bool,
    pub name: String,
    pub length: Option<i64>,
    pub files: Vec<FileDict>,
    pub is_directory: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FileDict {
    pub length: i64,
    pub path: Vec<String>,
}

/// Splits the `pieces` string into its concatenated 20-byte SHA-1 hashes,
/// one per piece, in piece-index order.
#[tracing::instrument(level = "trace", skip(pieces_bytes))]
fn parse_pieces(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>, TorrentError> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    let num_pieces = pieces_bytes.len() / 20;
    let mut hashes = Vec::with_capacity(num_pieces);
    for i in 0..num_pieces {
        let start = i * 20;
        let mut hash_array = [0u8; 20];
        hash_array.copy_from_slice(&pieces_bytes[start..start + 20]);
        hashes.push(hash_array);
    }
    Ok(hashes)
}

fn parse_info_dict(dict: &BTreeMap<Vec<u8>, BencodeValue>) -> Result<InfoDict, TorrentError> {
    let piece_length = match dict.get(b"piece length".as_slice()) {
        Some(BencodeValue::Integer(i)) => *i,
        _ => return Err(TorrentError::MissingField("piece length".to_string())),
    };
    let pieces_bytes = match dict.get(b"pieces".as_slice()) {
        Some(BencodeValue::String(s)) => s.clone(),
        _ => return Err(TorrentError::MissingField("pieces".to_string())),
    };
    let private = matches!(dict.get(b"private".as_slice()), Some(BencodeValue::Integer(1)));
    let name = match dict.get(b"name".as_slice()) {
        Some(BencodeValue::String(s)) => String::from_utf8(s.clone())
            .map_err(|e| TorrentError::InvalidFormat(format!("invalid name (not UTF-8): {e}")))?,
        _ => return Err(TorrentError::MissingField("name".to_string())),
    };
    let length = match dict.get(b"length".as_slice()) {
        Some(BencodeValue::Integer(i)) => Some(*i),
        _ => None,
    };
    let files = match dict.get(b"files".as_slice()) {
        Some(BencodeValue::List(list)) => {
            let mut files_vec = Vec::with_capacity(list.len());
            for file_val in list {
                let BencodeValue::Dict(file_dict) = file_val else {
                    return Err(TorrentError::InvalidFormat("file entry not a dict".to_string()));
                };
                let length = match file_dict.get(b"length".as_slice()) {
                    Some(BencodeValue::Integer(i)) => *i,
                    _ => return Err(TorrentError::MissingField("file length".to_string())),
                };
                let path = match file_dict.get(b"path".as_slice()) {
                    Some(BencodeValue::List(path_list)) => {
                        let mut path_vec = Vec::with_capacity(path_list.len());
                        for p in path_list {
                            let BencodeValue::String(s) = p else {
                                return Err(TorrentError::InvalidFormat(
                                    "file path component not a string".to_string(),
                                ));
                            };
                            path_vec.push(String::from_utf8(s.clone()).map_err(|e| {
                                TorrentError::InvalidFormat(format!("invalid file path (not UTF-8): {e}"))
                            })?);
                        }
                        path_vec
                    }
                    _ => return Err(TorrentError::MissingField("file path".to_string())),
                };
                files_vec.push(FileDict { length, path });
            }
            files_vec
        }
        _ => Vec::new(),
    };
    let is_directory = !files.is_empty();
    Ok(InfoDict {
        piece_length,
        pieces: pieces_bytes,
        private,
        name,
        length,
        files,
        is_directory,
    })
}

impl InfoDict {
    /// Parses and SHA-1-hashes an `info` dict obtained from the metadata
    /// fetcher (or, equivalently, from a parsed `.torrent` file's `info`
    /// key), returning both the parsed layout and its piece hashes.
    pub fn from_bencode(value: &BencodeValue) -> Result<(InfoDict, Vec<[u8; 20]>), TorrentError> {
        let dict = value
            .as_dict()
            .ok_or_else(|| TorrentError::InvalidFormat("info is not a dictionary".to_string()))?;
        let info = parse_info_dict(dict)?;
        let pieces_hash = parse_pieces(&info.pieces)?;
        Ok((info, pieces_hash))
    }

    pub fn total_length(&self) -> i64 {
        if !self.is_directory {
            self.length.unwrap_or(0)
        } else {
            self.files.iter().map(|f| f.length).sum()
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces.len() / 20
    }

    pub fn piece_size(&self, index: usize) -> i64 {
        let n = self.num_pieces();
        if index >= n {
            return 0;
        }
        if index < n - 1 {
            self.piece_length
        } else {
            let full_pieces_length = (n - 1) as i64 * self.piece_length;
            let last = self.total_length() - full_pieces_length;
            if last <= 0 {
                self.piece_length
            } else {
                last
            }
        }
    }

    /// File paths (relative to the configured download directory) that
    /// overlap the byte range of the given piece.
    pub fn file_paths_for_piece(&self, index: usize) -> Vec<PathBuf> {
        if index >= self.num_pieces() {
            return Vec::new();
        }
        let piece_start = (index as i64) * self.piece_length;
        let piece_end = piece_start + self.piece_size(index);
        let mut current_data_position: i64 = 0;
        let mut result_paths = Vec::new();
        if !self.is_directory {
            result_paths.push(PathBuf::from(&self.name));
        } else {
            for file_info in &self.files {
                let file_start = current_data_position;
                let file_end = file_start + file_info.length;
                if file_end > piece_start && file_start < piece_end {
                    let mut full_path = PathBuf::from(&self.name);
                    for component in &file_info.path {
                        full_path = full_path.join(component);
                    }
                    result_paths.push(full_path);
                }
                current_data_position = file_end;
            }
        }
        result_paths
    }

    pub fn hash_matches(&self, index: usize, block_data: &[u8]) -> bool {
        self.pieces_hash_at(index).map(|h| sha1_of(block_data) == h).unwrap_or(false)
    }

    fn pieces_hash_at(&self, index: usize) -> Option<[u8; 20]> {
        let start = index * 20;
        if start + 20 > self.pieces.len() {
            return None;
        }
        let mut h = [0u8; 20];
        h.copy_from_slice(&self.pieces[start..start + 20]);
        Some(h)
    }
}

fn sha1_of(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder;

    fn sample_single_file() -> BencodeValue {
        let bytes = b"d6:lengthi10e4:name8:file.txt12:piece lengthi5e6:pieces40:aaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbe";
        decoder::decode_exact(bytes).unwrap()
    }

    #[test]
    fn parses_single_file_layout() {
        let (info, hashes) = InfoDict::from_bencode(&sample_single_file()).unwrap();
        assert_eq!(info.total_length(), 10);
        assert_eq!(info.num_pieces(), 2);
        assert_eq!(hashes.len(), 2);
        assert!(!info.is_directory);
    }

    #[test]
    fn last_piece_size_accounts_for_remainder() {
        let (info, _) = InfoDict::from_bencode(&sample_single_file()).unwrap();
        assert_eq!(info.piece_size(0), 5);
        assert_eq!(info.piece_size(1), 5);
    }

    #[test]
    fn file_paths_for_piece_covers_single_file() {
        let (info, _) = InfoDict::from_bencode(&sample_single_file()).unwrap();
        let paths = info.file_paths_for_piece(0);
        assert_eq!(paths, vec![PathBuf::from("file.txt")]);
    }

    #[test]
    fn out_of_range_piece_yields_no_paths() {
        let (info, _) = InfoDict::from_bencode(&sample_single_file()).unwrap();
        assert!(info.file_paths_for_piece(99).is_empty());
    }

    #[test]
    fn rejects_pieces_field_with_bad_length() {
        let bytes = b"d4:name1:a12:piece lengthi1e6:pieces3:abce";
        let value = decoder::decode_exact(bytes).unwrap();
        assert!(matches!(
            InfoDict::from_bencode(&value),
            Err(TorrentError::InvalidPiecesHashLength)
        ));
    }
}
