//! Library exports for motifscan
pub mod aho_corasick;
pub mod error;
pub mod fasta_index;
pub mod fasta_mmap;
pub mod motif;
pub mod scan;
pub mod thread_pool;
