//! The `.fai` random-access index: building it from a FASTA file, reading it back,
//! and looking up entries by chromosome name.
//!
//! Compatible with samtools faidx: five tab-separated fields per record
//! (`name`, `length`, `offset`, `line_blen`, `line_len`), one record per sequence in
//! source-file order. A sequence's last line may be shorter than the rest; any other
//! mismatched line width is malformed input.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{MotifScanError, Result};

/// One record of the `.fai` file: byte offsets needed for O(1) sequence extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub length: u64,
    pub offset: u64,
    pub line_blen: u64,
    pub line_len: u64,
}

/// An ordered, name-indexed collection of `IndexEntry` records.
///
/// Insertion order is preserved (for reproducible per-chromosome scan order) alongside
/// a `HashMap` for O(1) name lookup.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: Vec<IndexEntry>,
    by_name: HashMap<String, usize>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, entry: IndexEntry) -> Result<()> {
        if self.by_name.contains_key(&entry.name) {
            return Err(MotifScanError::DuplicateName(entry.name));
        }
        self.by_name.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Entries in the order they appeared in the source FASTA.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Like `get`, but fails with `NameNotFound` instead of returning `None` — for
    /// callers (e.g. a future `--chrom` selector) that look up a single sequence by
    /// name rather than iterating every entry.
    pub fn require(&self, name: &str) -> Result<&IndexEntry> {
        self.get(name)
            .ok_or_else(|| MotifScanError::NameNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-progress state for the entry currently being accumulated while scanning the FASTA.
struct PendingEntry {
    name: String,
    length: u64,
    offset: u64,
    line_blen: u64,
    line_len: u64,
    /// Set once a sequence line shorter than `line_blen` has been seen; any further
    /// sequence line for this entry is then malformed.
    saw_short_line: bool,
}

impl PendingEntry {
    fn new(name: String) -> Self {
        PendingEntry {
            name,
            length: 0,
            offset: 0,
            line_blen: 0,
            line_len: 0,
            saw_short_line: false,
        }
    }

    fn into_entry(self) -> IndexEntry {
        IndexEntry {
            name: self.name,
            length: self.length,
            offset: self.offset,
            line_blen: self.line_blen,
            line_len: self.line_len,
        }
    }
}

fn header_name(line: &str, full_header: bool) -> String {
    let body = &line[1..];
    if full_header {
        body.to_string()
    } else {
        body.split_whitespace().next().unwrap_or("").to_string()
    }
}

/// Scan `fasta_path` sequentially and build an in-memory `Index`, without writing
/// anything to disk. Used both by `write_index` and directly when a fresh `.fai`
/// is needed before scanning.
pub fn build_index(fasta_path: &Path, full_header: bool) -> Result<Index> {
    let file = File::open(fasta_path).map_err(|source| MotifScanError::OpenFailed {
        path: fasta_path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let mut index = Index::new();
    let mut pending: Option<PendingEntry> = None;
    let mut offset: u64 = 0;
    let mut line_number: u64 = 0;
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let n = reader
            .read_until(b'\n', &mut raw)
            .map_err(|source| MotifScanError::OpenFailed {
                path: fasta_path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        line_number += 1;
        let line_bytes_len = raw.len() as u64;

        let has_nl = raw.ends_with(b"\n");
        let stripped = if has_nl { &raw[..raw.len() - 1] } else { &raw[..] };
        let stripped = if stripped.ends_with(b"\r") {
            &stripped[..stripped.len() - 1]
        } else {
            stripped
        };
        let line = std::str::from_utf8(stripped).map_err(|_| MotifScanError::MalformedFasta {
            line: line_number,
            reason: "non-UTF-8 line".to_string(),
        })?;

        if line.starts_with(';') {
            // comment, skip
        } else if line.starts_with('>') || line.starts_with('@') {
            if let Some(p) = pending.take() {
                index.push(p.into_entry())?;
            }
            pending = Some(PendingEntry::new(header_name(line, full_header)));
        } else {
            let entry = pending.as_mut().ok_or_else(|| MotifScanError::MalformedFasta {
                line: line_number,
                reason: "sequence line before any header".to_string(),
            })?;
            let seq_len = line.len() as u64;
            if seq_len == 0 {
                return Err(MotifScanError::MalformedFasta {
                    line: line_number,
                    reason: "empty sequence line".to_string(),
                });
            }
            if entry.line_blen == 0 {
                entry.offset = offset;
                entry.line_blen = seq_len;
                entry.line_len = line_bytes_len;
            } else {
                if entry.saw_short_line {
                    return Err(MotifScanError::MalformedFasta {
                        line: line_number,
                        reason: "sequence line after a short final line".to_string(),
                    });
                }
                if seq_len > entry.line_blen {
                    return Err(MotifScanError::MalformedFasta {
                        line: line_number,
                        reason: "sequence line longer than the entry's line width".to_string(),
                    });
                }
                if seq_len < entry.line_blen {
                    entry.saw_short_line = true;
                }
            }
            entry.length += seq_len;
        }
        offset += line_bytes_len;
    }

    if let Some(p) = pending.take() {
        index.push(p.into_entry())?;
    }
    Ok(index)
}

/// Write `index` out as a `.fai` file at `index_path`, one tab-separated record per entry
/// in source-FASTA order.
pub fn write_index_file(index: &Index, index_path: &Path) -> Result<()> {
    let file = File::create(index_path).map_err(|source| MotifScanError::OpenFailed {
        path: index_path.to_path_buf(),
        source,
    })?;
    let mut out = BufWriter::new(file);
    for entry in index.entries() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            entry.name, entry.length, entry.offset, entry.line_blen, entry.line_len
        )
        .map_err(|source| MotifScanError::OpenFailed {
            path: index_path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Build the index for `fasta_path` and persist it to `fasta_path` + `.fai`.
pub fn write_index(fasta_path: &Path, full_header: bool) -> Result<Index> {
    let index = build_index(fasta_path, full_header)?;
    let index_path = fai_path(fasta_path);
    write_index_file(&index, &index_path)?;
    Ok(index)
}

/// Parse an existing `.fai` file. Fewer than 5 tab-separated fields on any line is fatal.
pub fn read_index(index_path: &Path) -> Result<Index> {
    let file = File::open(index_path).map_err(|source| MotifScanError::OpenFailed {
        path: index_path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    let mut index = Index::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line_number = (line_no + 1) as u64;
        let line = line.map_err(|source| MotifScanError::OpenFailed {
            path: index_path.to_path_buf(),
            source,
        })?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 5 {
            return Err(MotifScanError::MalformedIndex {
                path: index_path.to_path_buf(),
                line: line_number,
            });
        }
        let parse_u64 = |s: &str| -> Result<u64> {
            s.parse::<u64>().map_err(|_| MotifScanError::MalformedIndex {
                path: index_path.to_path_buf(),
                line: line_number,
            })
        };
        let entry = IndexEntry {
            name: fields[0].to_string(),
            length: parse_u64(fields[1])?,
            offset: parse_u64(fields[2])?,
            line_blen: parse_u64(fields[3])?,
            line_len: parse_u64(fields[4])?,
        };
        index.push(entry)?;
    }
    Ok(index)
}

/// Path of the companion `.fai` index for a FASTA file.
pub fn fai_path(fasta_path: &Path) -> PathBuf {
    let mut s = fasta_path.as_os_str().to_os_string();
    s.push(".fai");
    PathBuf::from(s)
}

/// Load the index for `fasta_path`, building and persisting one if it doesn't exist yet.
pub fn open_index(fasta_path: &Path, full_header: bool) -> Result<Index> {
    let index_path = fai_path(fasta_path);
    if index_path.exists() {
        read_index(&index_path)
    } else {
        log::info!(
            "no index found at {}, building one",
            index_path.display()
        );
        write_index(fasta_path, full_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn write_fasta(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn single_entry_single_line() {
        let f = write_fasta(">c\nACGTACGT\n");
        let idx = build_index(f.path(), false).unwrap();
        assert_eq!(idx.len(), 1);
        let e = idx.get("c").unwrap();
        assert_eq!(e.length, 8);
        assert_eq!(e.line_blen, 8);
        assert_eq!(e.line_len, 9);
    }

    #[test]
    fn multi_line_entry_short_last_line() {
        let f = write_fasta(">c\nACGT\nACG\n");
        let idx = build_index(f.path(), false).unwrap();
        let e = idx.get("c").unwrap();
        assert_eq!(e.length, 7);
        assert_eq!(e.line_blen, 4);
        assert_eq!(e.line_len, 5);
    }

    #[test]
    fn mismatched_non_final_line_is_malformed() {
        let f = write_fasta(">c\nACGT\nAC\nACGT\n");
        let err = build_index(f.path(), false).unwrap_err();
        assert!(matches!(err, MotifScanError::MalformedFasta { .. }));
    }

    #[test]
    fn empty_line_inside_sequence_is_malformed() {
        let f = write_fasta(">c\nACGT\n\nACGT\n");
        let err = build_index(f.path(), false).unwrap_err();
        assert!(matches!(err, MotifScanError::MalformedFasta { .. }));
    }

    #[test]
    fn header_truncated_at_whitespace_unless_full_header() {
        let f = write_fasta(">c extra description\nACGT\n");
        let idx = build_index(f.path(), false).unwrap();
        assert!(idx.get("c").is_some());
        let idx_full = build_index(f.path(), true).unwrap();
        assert!(idx_full.get("c extra description").is_some());
    }

    #[test]
    fn duplicate_name_is_fatal() {
        let f = write_fasta(">c\nACGT\n>c\nTTTT\n");
        let err = build_index(f.path(), false).unwrap_err();
        assert!(matches!(err, MotifScanError::DuplicateName(_)));
    }

    #[test]
    fn comment_lines_advance_offset_but_are_skipped() {
        let f = write_fasta(";a comment\n>c\nACGT\n");
        let idx = build_index(f.path(), false).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn fai_round_trip() {
        let f = write_fasta(">a\nACGTACGT\n>b\nGGGGCCCC\nTT\n");
        let idx = build_index(f.path(), false).unwrap();
        let fai = NamedTempFile::new().unwrap();
        write_index_file(&idx, fai.path()).unwrap();
        let reread = read_index(fai.path()).unwrap();
        assert_eq!(reread.entries(), idx.entries());
    }

    #[test]
    fn require_fails_for_unknown_name() {
        let f = write_fasta(">c\nACGT\n");
        let idx = build_index(f.path(), false).unwrap();
        assert!(idx.require("c").is_ok());
        let err = idx.require("missing").unwrap_err();
        assert!(matches!(err, MotifScanError::NameNotFound(_)));
    }

    #[test]
    fn malformed_index_too_few_fields() {
        let fai = write_fasta("a\t8\t3\n");
        let err = read_index(fai.path()).unwrap_err();
        assert!(matches!(err, MotifScanError::MalformedIndex { .. }));
    }
}
