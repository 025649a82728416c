//! Memory-mapped FASTA access and per-entry sequence extraction.
//!
//! Sequence bytes for an entry are read directly out of the mapping and copied into
//! a freshly allocated buffer with every line-terminator byte filtered out in a single
//! pass, rather than adjusting a pointer into the mapping in place.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{MotifScanError, Result};
use crate::fasta_index::IndexEntry;

/// A read-only memory mapping of a FASTA file, held for the lifetime of scanning.
pub struct MappedFile {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| MotifScanError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        file.metadata().map_err(|source| MotifScanError::StatFailed {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: the mapping is read-only and the file is not truncated for the
        // lifetime of this `MappedFile`; callers only read through `extract_sequence`.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| MotifScanError::MapFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(MappedFile {
            mmap,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extract the raw (including line-terminator) byte range for `entry`, uppercased
    /// caller-side before matching.
    fn raw_slice(&self, entry: &IndexEntry) -> Result<&[u8]> {
        if entry.line_blen == 0 {
            return Ok(&self.mmap[0..0]);
        }
        let newlines_in_sequence = entry.length / entry.line_blen;
        let raw_len = newlines_in_sequence + entry.length;
        let start = entry.offset as usize;
        let end = start
            .checked_add(raw_len as usize)
            .filter(|&e| e <= self.mmap.len())
            .ok_or_else(|| MotifScanError::MalformedFasta {
                line: 0,
                reason: format!(
                    "entry {:?} extends past end of mapped file",
                    entry.name
                ),
            })?;
        Ok(&self.mmap[start..end])
    }

    /// Extract the full sequence body for `entry`: raw bytes with every line-terminator
    /// byte (`\n`, and `\r` when present) filtered out in one pass, uppercased.
    pub fn extract_sequence(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let raw = self.raw_slice(entry)?;
        let mut seq = Vec::with_capacity(entry.length as usize);
        for &b in raw {
            if b != b'\n' && b != b'\r' {
                seq.push(b.to_ascii_uppercase());
            }
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fasta_index::build_index;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn write_fasta(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn extracts_single_line_sequence() {
        let f = write_fasta(">c\nacgtacgt\n");
        let idx = build_index(f.path(), false).unwrap();
        let mapped = MappedFile::open(f.path()).unwrap();
        let entry = idx.get("c").unwrap();
        let seq = mapped.extract_sequence(entry).unwrap();
        assert_eq!(seq, b"ACGTACGT");
    }

    #[test]
    fn extracts_multi_line_sequence_without_newlines() {
        let f = write_fasta(">c\nACGT\nACGT\nAC\n");
        let idx = build_index(f.path(), false).unwrap();
        let mapped = MappedFile::open(f.path()).unwrap();
        let entry = idx.get("c").unwrap();
        let seq = mapped.extract_sequence(entry).unwrap();
        assert_eq!(seq, b"ACGTACGTAC");
        assert_eq!(seq.len() as u64, entry.length);
    }

    #[test]
    fn extracts_second_of_two_entries() {
        let f = write_fasta(">a\nACGT\n>b\nGGGGCCCC\n");
        let idx = build_index(f.path(), false).unwrap();
        let mapped = MappedFile::open(f.path()).unwrap();
        let entry = idx.get("b").unwrap();
        let seq = mapped.extract_sequence(entry).unwrap();
        assert_eq!(seq, b"GGGGCCCC");
    }
}
