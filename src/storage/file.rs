use crate::metainfo::File;

/// A contiguous region of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

/// Maps an absolute byte range of the torrent onto the files it covers.
///
/// `files` must be laid end to end in offset order. Zero-length files never
/// appear in the result. Bytes past the last file are silently dropped, so
/// callers check the range against the total length first.
pub fn file_spans(files: &[File], offset: u64, length: u64) -> Vec<FileSpan> {
    let mut spans = Vec::new();
    let mut remaining = length;
    let mut current = offset;

    let first = files.partition_point(|f| f.offset + f.length <= offset);
    for (file_index, file) in files.iter().enumerate().skip(first) {
        if remaining == 0 {
            break;
        }
        let file_end = file.offset + file.length;
        if current < file.offset || current >= file_end {
            continue;
        }

        let take = remaining.min(file_end - current);
        spans.push(FileSpan {
            file_index,
            file_offset: current - file.offset,
            length: take,
        });
        current += take;
        remaining -= take;
    }

    spans
}
