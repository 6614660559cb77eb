use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode, raw_dict_entry, Dict, Value};
use crate::constants::MAX_PIECE_LENGTH;
use bytes::Bytes;
use std::path::PathBuf;

/// A parsed torrent file.
///
/// Contains all metadata from a `.torrent` file, including file information,
/// piece hashes, and tracker URLs. Immutable once parsed; the download
/// engine shares it behind an `Arc`.
///
/// # Examples
///
/// ```no_run
/// use leech::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data)?;
///
/// println!("Torrent: {}", metainfo.info.name);
/// println!("Size: {} bytes", metainfo.info.total_length);
/// println!("Info hash: {}", metainfo.info_hash);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The info dictionary containing file and piece information.
    pub info: Info,
    /// The unique identifier for this torrent (hash of the info dictionary).
    pub info_hash: InfoHash,
    /// Primary tracker URL.
    pub announce: Option<String>,
    /// Multi-tier tracker list ([BEP-12](http://bittorrent.org/beps/bep_0012.html)).
    pub announce_list: Vec<Vec<String>>,
    /// Unix timestamp when the torrent was created.
    pub creation_date: Option<i64>,
    /// Optional comment about the torrent.
    pub comment: Option<String>,
    /// Name/version of the program that created the torrent.
    pub created_by: Option<String>,
    raw_info: Bytes,
}

/// The info dictionary from a torrent file.
///
/// Single-file and multi-file torrents are normalized to the same shape:
/// an ordered list of files laid end to end over the piece data.
#[derive(Debug, Clone)]
pub struct Info {
    /// Suggested name for the file or directory.
    pub name: String,
    /// Number of bytes per piece. Every piece but the last has this size.
    pub piece_length: u64,
    /// SHA-1 hash of each piece.
    pub pieces: Vec<[u8; 20]>,
    /// Files in the order their bytes appear in the piece data.
    pub files: Vec<File>,
    /// Total size of all files combined.
    pub total_length: u64,
    /// If true, clients should only use trackers in the metainfo.
    pub private: bool,
}

/// A file within a torrent.
///
/// For single-file torrents, there is one file with the torrent name.
/// For multi-file torrents, paths start with the torrent name as the root
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Path to the file (relative to the output directory).
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub length: u64,
    /// Byte offset within the torrent's piece data.
    pub offset: u64,
}

impl Metainfo {
    /// Parses a torrent file from raw bytes.
    ///
    /// The info hash is computed over the `info` dictionary exactly as it
    /// appears in `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The data is not valid bencode
    /// - Required fields are missing or have the wrong type
    /// - The pieces field length is not a multiple of 20
    /// - The number of pieces does not match the total length
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = decode(data)?;
        if value.as_dict().is_none() {
            return Err(MetainfoError::InvalidField("root"));
        }
        let raw_info = raw_dict_entry(data, b"info")?.ok_or(MetainfoError::MissingField("info"))?;
        Self::parse(&value, Bytes::copy_from_slice(raw_info))
    }

    /// Builds a metainfo from an already decoded value.
    ///
    /// The info hash is computed over the re-encoding of the `info` value,
    /// which matches the original bytes for any value the decoder produced.
    pub fn from_value(value: &Value) -> Result<Self, MetainfoError> {
        let info_value = value
            .as_dict()
            .ok_or(MetainfoError::InvalidField("root"))?
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;
        let raw_info = Bytes::from(encode(info_value));
        Self::parse(value, raw_info)
    }

    fn parse(value: &Value, raw_info: Bytes) -> Result<Self, MetainfoError> {
        let dict = value.as_dict().ok_or(MetainfoError::InvalidField("root"))?;
        let info_value = dict.get(b"info").ok_or(MetainfoError::MissingField("info"))?;
        let info = parse_info(info_value)?;
        let info_hash = InfoHash::from_info_bytes(&raw_info);

        let announce = dict
            .get(b"announce")
            .and_then(|v| v.as_str())
            .map(String::from);

        let announce_list = dict
            .get(b"announce-list")
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect::<Vec<_>>()
                        })
                    })
                    .filter(|tier| !tier.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let creation_date = dict.get(b"creation date").and_then(|v| v.as_integer());

        let comment = dict
            .get(b"comment")
            .and_then(|v| v.as_str())
            .map(String::from);

        let created_by = dict
            .get(b"created by")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            info,
            info_hash,
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
            raw_info,
        })
    }

    /// Returns the bencoded info dictionary the info hash was computed from.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// Returns all tracker URLs from both `announce` and `announce-list`.
    ///
    /// The primary tracker (from `announce`) comes first, followed by
    /// trackers from `announce-list` tier by tier. Duplicates are removed.
    pub fn trackers(&self) -> Vec<String> {
        let mut trackers = Vec::new();

        if let Some(ref announce) = self.announce {
            trackers.push(announce.clone());
        }

        for tier in &self.announce_list {
            for tracker in tier {
                if !trackers.contains(tracker) {
                    trackers.push(tracker.clone());
                }
            }
        }

        trackers
    }
}

impl Info {
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Byte offset of a piece within the concatenated file data.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length
    }

    /// Size of a piece; only the last piece may be shorter than `piece_length`.
    ///
    /// Returns 0 for an index past the end.
    pub fn piece_size(&self, index: u32) -> u64 {
        let start = self.piece_offset(index);
        if start >= self.total_length {
            return 0;
        }
        (self.total_length - start).min(self.piece_length)
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.pieces.get(index as usize)
    }
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    let dict = value.as_dict().ok_or(MetainfoError::InvalidField("info"))?;

    let name = dict
        .get(b"name")
        .ok_or(MetainfoError::MissingField("name"))?
        .as_str()
        .ok_or(MetainfoError::InvalidField("name"))?
        .to_string();

    let piece_length = get_length(dict, b"piece length", "piece length")?
        .ok_or(MetainfoError::MissingField("piece length"))?;
    if piece_length == 0 || piece_length > MAX_PIECE_LENGTH {
        return Err(MetainfoError::InvalidField("piece length"));
    }

    let pieces_bytes = dict
        .get(b"pieces")
        .ok_or(MetainfoError::MissingField("pieces"))?
        .as_bytes()
        .ok_or(MetainfoError::InvalidField("pieces"))?;

    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(chunk);
            arr
        })
        .collect();

    let private = dict
        .get(b"private")
        .and_then(|v| v.as_integer())
        .map(|v| v == 1)
        .unwrap_or(false);

    let (files, total_length) = if let Some(length) = get_length(dict, b"length", "length")? {
        let file = File {
            path: PathBuf::from(&name),
            length,
            offset: 0,
        };
        (vec![file], length)
    } else if let Some(files_value) = dict.get(b"files") {
        let files_list = files_value
            .as_list()
            .ok_or(MetainfoError::InvalidField("files"))?;
        if files_list.is_empty() {
            return Err(MetainfoError::InvalidField("files"));
        }

        let mut files = Vec::with_capacity(files_list.len());
        let mut offset = 0u64;

        for file_value in files_list {
            let file_dict = file_value
                .as_dict()
                .ok_or(MetainfoError::InvalidField("files"))?;

            let length = get_length(file_dict, b"length", "file length")?
                .ok_or(MetainfoError::MissingField("file length"))?;

            let path_list = file_dict
                .get(b"path")
                .ok_or(MetainfoError::MissingField("file path"))?
                .as_list()
                .ok_or(MetainfoError::InvalidField("file path"))?;
            if path_list.is_empty() {
                return Err(MetainfoError::InvalidField("file path"));
            }

            let mut path = PathBuf::from(&name);
            for component in path_list {
                let component = component
                    .as_str()
                    .ok_or(MetainfoError::InvalidField("file path"))?;
                path.push(component);
            }

            files.push(File {
                path,
                length,
                offset,
            });

            offset = offset
                .checked_add(length)
                .ok_or(MetainfoError::InvalidField("file length"))?;
        }

        (files, offset)
    } else {
        return Err(MetainfoError::MissingField("length or files"));
    };

    let expected = total_length.div_ceil(piece_length);
    if expected != pieces.len() as u64 {
        return Err(MetainfoError::PieceCountMismatch {
            expected: expected as usize,
            actual: pieces.len(),
        });
    }

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
        private,
    })
}

/// Reads an optional non-negative integer field.
fn get_length(dict: &Dict, key: &[u8], field: &'static str) -> Result<Option<u64>, MetainfoError> {
    match dict.get(key) {
        None => Ok(None),
        Some(value) => {
            let n = value.as_integer().ok_or(MetainfoError::InvalidField(field))?;
            u64::try_from(n)
                .map(Some)
                .map_err(|_| MetainfoError::InvalidField(field))
        }
    }
}
