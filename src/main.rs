use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use motifscan::error::MotifScanError;
use motifscan::fasta_index::open_index;
use motifscan::fasta_mmap::MappedFile;
use motifscan::motif::expand_motif;
use motifscan::scan::{scan_entry, ScanContext};
use motifscan::thread_pool::Pool;

/// Scan a FASTA reference for occurrences of an IUPAC motif.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// FASTA file to scan
    #[clap(short = 'f', long = "fasta", value_name = "PATH")]
    fasta: PathBuf,

    /// IUPAC motif to search for, e.g. ACGT or NNNGATC
    #[clap(short = 'm', long = "motif", value_name = "STRING")]
    motif: String,

    /// Number of worker threads [default: number of online CPUs]
    #[clap(short = 'p', long = "nthreads", value_name = "N")]
    nthreads: Option<usize>,

    /// Bounded-queue capacity handed to the thread pool
    #[clap(short = 'q', long = "queue-size", default_value_t = 16)]
    queue_size: usize,

    /// Keep the full FASTA header (not just the token before the first whitespace)
    #[clap(long = "full-header")]
    full_header: bool,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv)
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Wall-clock/CPU-time accounting for the end-of-run summary log line, in the same
/// shape as `pangenome-sweepga`'s `main.rs::TimingContext`.
struct TimingContext {
    start_time: Instant,
    start_cpu: f64,
}

impl TimingContext {
    fn new() -> Self {
        TimingContext {
            start_time: Instant::now(),
            start_cpu: Self::cpu_time(),
        }
    }

    fn cpu_time() -> f64 {
        unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            libc::getrusage(libc::RUSAGE_SELF, &mut usage);
            let user = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0;
            let system = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1_000_000.0;
            user + system
        }
    }

    /// `(wall_seconds, cpu_ratio)`, where `cpu_ratio` is total CPU seconds consumed
    /// across all worker threads divided by wall seconds elapsed (> 1.0 once more than
    /// one thread is busy concurrently).
    fn stats(&self) -> (f64, f64) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let cpu_used = Self::cpu_time() - self.start_cpu;
        let cpu_ratio = if elapsed > 0.0 { cpu_used / elapsed } else { 0.0 };
        (elapsed, cpu_ratio)
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn resolve_nthreads(requested: Option<usize>) -> usize {
    let cpus = num_cpus::get().max(1);
    match requested {
        Some(n) if n > 0 => n.min(cpus).max(1),
        _ => cpus,
    }
}

fn run(args: Args) -> Result<()> {
    let timing = TimingContext::new();
    let n_threads = resolve_nthreads(args.nthreads);
    info!(
        "scanning {} with motif {:?} using {} thread(s)",
        args.fasta.display(),
        args.motif,
        n_threads
    );

    let index =
        open_index(&args.fasta, args.full_header).with_context(|| {
            format!("failed to load or build index for {}", args.fasta.display())
        })?;
    info!("index ready: {} sequence(s)", index.len());

    let patterns = Arc::new(
        expand_motif(&args.motif).with_context(|| format!("invalid motif {:?}", args.motif))?,
    );
    debug!("motif expanded to {} concrete pattern(s)", patterns.len());

    let mapped = Arc::new(
        MappedFile::open(&args.fasta)
            .with_context(|| format!("failed to memory-map {}", args.fasta.display()))?,
    );

    let stdout = BufWriter::new(io::stdout());
    let ctx = Arc::new(ScanContext {
        mapped: Arc::clone(&mapped),
        patterns: Arc::clone(&patterns),
        n_threads,
        output: Arc::new(Mutex::new(stdout)),
    });

    let pool = Pool::new(n_threads);
    let queue = pool.queue::<()>(args.queue_size, true);

    for entry in index.entries() {
        debug!("dispatching scan job for {}", entry.name);
        let job_ctx = Arc::clone(&ctx);
        let job_entry = entry.clone();
        queue.dispatch(
            move || -> Result<(), MotifScanError> { scan_entry(&job_ctx, &job_entry) },
            false,
        )?;
    }

    queue.flush();
    let had_error = queue.has_error();
    queue.close();
    pool.shutdown();

    if had_error {
        anyhow::bail!("a worker reported an error while scanning");
    }

    let (elapsed, cpu_ratio) = timing.stats();
    info!("scan complete in {elapsed:.2}s (cpu ratio {cpu_ratio:.2}x)");
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(err) = run(args) {
        eprintln!("motifscan: error: {err:#}");
        std::process::exit(1);
    }
}
