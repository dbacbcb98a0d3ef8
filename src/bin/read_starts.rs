//! CLI binary for building read-start count files from BAM alignments

use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use dseg_rs::{
    bam::{bam_contigs, count_read_starts},
    counts::write_counts,
    utils::{get_num_cpus, prepare_output_path, validate_file_readable, Timer},
    DsegError, DsegResult,
};

#[derive(Parser)]
#[command(name = "read_starts")]
#[command(about = "Count read starts per position from an indexed BAM file")]
#[command(long_about = "
This tool counts, for every position of the selected contigs, the number of
reads whose leftmost aligned base falls there. Unmapped, secondary,
supplementary, QC-failed and duplicate reads are skipped, as are reads below
the minimum mapping quality.

The BAM index file (.bai) must be present next to the BAM file. The tool will
automatically look for files with .bam.bai or .bai extensions.

The output is a tab-separated file (gzipped if the name ends in .gz) with one
line per position: chromosome, 1-based position, read-start count. It is the
input format of dseg.
")]
struct Args {
    /// Path to the input BAM file
    #[arg(long, value_name = "FILE")]
    input_bam: PathBuf,

    /// Path to the output counts file
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Contig to count (repeatable; default all contigs in the header)
    #[arg(long = "chrom", value_name = "NAME")]
    chroms: Vec<String>,

    /// Minimum mapping quality for a read to count
    #[arg(long, default_value_t = 0)]
    min_mapq: u8,

    /// Number of contigs to count in parallel
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output file if it exists
    #[arg(short, long)]
    force: bool,
}

fn run() -> DsegResult<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting read-start counting");
    log::info!("BAM file: {:?}", args.input_bam);
    log::info!("Output file: {:?}", args.output);
    log::info!("Minimum mapping quality: {}", args.min_mapq);

    validate_file_readable(&args.input_bam)?;
    prepare_output_path(&args.output, args.force)?;

    let chroms = if args.chroms.is_empty() {
        bam_contigs(&args.input_bam)?
    } else {
        args.chroms.clone()
    };
    log::info!("Counting {} contig(s)", chroms.len());

    let tracks = {
        let _timer = Timer::new("Counting read starts");
        count_read_starts(&args.input_bam, &chroms, args.min_mapq, args.num_processes)?
    };

    let positions: usize = tracks.iter().map(|t| t.observations.len()).sum();
    let reads: u64 = tracks
        .iter()
        .flat_map(|t| t.observations.iter())
        .map(|o| u64::from(o.read_starts))
        .sum();
    log::info!("Counted {} read starts over {} positions", reads, positions);

    {
        let _timer = Timer::new("Writing counts");
        write_counts(&tracks, &args.output)?;
    }

    log::info!("Counts written to: {:?}", args.output);
    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: DsegError) -> ! {
    match error {
        DsegError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
            eprintln!("For BAM files, ensure the index file (.bai) is present.");
        }
        DsegError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check the contig names against the BAM header.");
        }
        DsegError::Htslib(ref e) => {
            eprintln!("Error: BAM processing error: {}", e);
            eprintln!("Please check that your BAM file is valid and has an index (.bai) file.");
        }
        DsegError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        DsegError::Csv(ref e) => {
            eprintln!("Error: Output error: {}", e);
        }
        DsegError::InvalidRecord { line, message } => {
            eprintln!("Error: Invalid record at line {}: {}", line, message);
        }
        DsegError::OutOfRange(msg) => {
            eprintln!("Error: {}", msg);
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
