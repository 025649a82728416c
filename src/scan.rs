//! Per-chromosome job construction and the matched-line output format.
//!
//! Each job extracts its chromosome's sequence, uppercases it, builds a fresh
//! automaton over the shared pattern set, and scans it. The output mutex is only
//! taken when more than one worker thread is in play; a single-threaded run writes
//! straight through.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::aho_corasick::AhoCorasick;
use crate::error::Result;
use crate::fasta_index::IndexEntry;
use crate::fasta_mmap::MappedFile;
use crate::motif::PatternSet;

/// Shared, read-only state every per-chromosome job closure captures.
pub struct ScanContext<W: Write + Send> {
    pub mapped: Arc<MappedFile>,
    pub patterns: Arc<PatternSet>,
    pub n_threads: usize,
    pub output: Arc<Mutex<W>>,
}

/// Run one chromosome's scan: extract its sequence, build a fresh automaton over
/// `ctx.patterns` (construction is cheap relative to scanning a whole chromosome), and
/// write one output line per hit. Locks `ctx.output` only when `ctx.n_threads > 1`.
pub fn scan_entry<W: Write + Send>(ctx: &ScanContext<W>, entry: &IndexEntry) -> Result<()> {
    let sequence = ctx.mapped.extract_sequence(entry)?;
    let automaton = AhoCorasick::from_patterns(ctx.patterns.patterns());

    let mut line = Vec::with_capacity(128);
    let mut locked = if ctx.n_threads > 1 {
        Some(ctx.output.lock().unwrap())
    } else {
        None
    };

    let mut write_hit = |id: u32, start: usize, word: &[u8]| -> Result<()> {
        line.clear();
        let strand = PatternSet::strand_of(id as usize);
        let _ = write!(
            &mut line,
            "{}\t{}\t{}\t.\t.\t{}\t{}\n",
            entry.name,
            start,
            start + word.len(),
            strand,
            std::str::from_utf8(word).unwrap_or(""),
        );
        match &mut locked {
            Some(guard) => guard.write_all(&line)?,
            None => ctx.output.lock().unwrap().write_all(&line)?,
        }
        Ok(())
    };

    let words: Vec<Vec<u8>> = ctx.patterns.patterns().map(|p| p.to_vec()).collect();
    let mut first_err: Option<crate::error::MotifScanError> = None;
    automaton.scan(&sequence, |id, start| {
        if first_err.is_some() {
            return;
        }
        if let Err(e) = write_hit(id, start, &words[id as usize]) {
            first_err = Some(e);
        }
    });
    drop(locked);
    if let Some(e) = first_err {
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fasta_index::build_index;
    use crate::motif::expand_motif;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn write_fasta(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    fn run(contents: &str, motif: &str, n_threads: usize) -> String {
        let f = write_fasta(contents);
        let index = build_index(f.path(), false).unwrap();
        let mapped = Arc::new(MappedFile::open(f.path()).unwrap());
        let patterns = Arc::new(expand_motif(motif).unwrap());
        let output = Arc::new(Mutex::new(Vec::new()));
        let ctx = ScanContext {
            mapped,
            patterns,
            n_threads,
            output: Arc::clone(&output),
        };
        for entry in index.entries() {
            scan_entry(&ctx, entry).unwrap();
        }
        let bytes = output.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn single_chromosome_palindromic_motif() {
        let out = run(">c\nACGTACGT\n", "ACGT", 1);
        let mut lines: Vec<&str> = out.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["c\t0\t4\t.\t.\t+\tACGT", "c\t4\t8\t.\t.\t+\tACGT"]);
    }

    #[test]
    fn reverse_complement_hit_reported_on_minus_strand() {
        let out = run(">c\nAAATTT\n", "AAA", 1);
        let mut lines: Vec<&str> = out.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["c\t0\t3\t.\t.\t+\tAAA", "c\t3\t6\t.\t.\t-\tTTT"]);
    }

    #[test]
    fn multithreaded_path_locks_output() {
        let out = run(">a\nACGT\n>b\nGGGG\n", "GG", 2);
        let mut lines: Vec<&str> = out.lines().filter(|l| l.starts_with('b')).collect();
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "b\t0\t2\t.\t.\t+\tGG",
                "b\t1\t3\t.\t.\t+\tGG",
                "b\t2\t4\t.\t.\t+\tGG",
            ]
        );
    }
}
