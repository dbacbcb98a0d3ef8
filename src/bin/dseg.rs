//! CLI binary for D-segment detection from read-start count files

use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use dseg_rs::{
    counts::read_counts_by_chrom,
    model::ProbabilityModel,
    report::{round_score, write_report_file, write_segments_tsv},
    scanner::scan_chromosomes,
    utils::{get_num_cpus, prepare_output_path, validate_file_readable, Timer},
    DsegError, DsegResult, ModelConfig,
};

#[derive(Parser)]
#[command(name = "dseg")]
#[command(about = "Find elevated copy-number D-segments in read-start counts")]
#[command(long_about = "
dseg scans per-position read-start counts for runs of elevated copy number.

Each position's count (capped at 3) is scored as the log2 likelihood ratio of
an elevated versus a background state under a two-state hidden Markov model
with Poisson emissions. A single pass keeps the running maximum of the
cumulative score and reports every maximal run whose score reaches the
threshold log2(P(1->1) P(2->2) / (P(1->2) P(2->1))).

The input is a tab-separated file (optionally gzipped) with one line per
position: chromosome, 1-based position, read-start count. Each chromosome is
scanned independently.

The output report lists the model, the threshold, the D-segments as
(start,end,score) and read-start histograms over all positions and over
positions inside D-segments.
")]
struct Args {
    /// Path to the read-start counts file
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Path to the output report
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Also write segments as a TSV file
    #[arg(long, value_name = "FILE")]
    segments_tsv: Option<PathBuf>,

    /// Expected length of a background (normal copy number) run
    #[arg(long, default_value_t = ModelConfig::default().normal_length)]
    normal_length: u64,

    /// Expected length of an elevated copy number run
    #[arg(long, default_value_t = ModelConfig::default().elevated_length)]
    elevated_length: u64,

    /// Mean read starts per position in background regions
    #[arg(long, default_value_t = ModelConfig::default().normal_mean)]
    normal_mean: f64,

    /// Mean read starts per position in elevated regions
    #[arg(long, default_value_t = ModelConfig::default().elevated_mean)]
    elevated_mean: f64,

    /// Number of chromosomes to scan in parallel
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output files if they exist
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

    log::info!("Starting D-segment scan");
    log::info!("Counts file: {:?}", args.input);
    log::info!("Report file: {:?}", args.output);
    log::info!("Number of processes: {}", args.num_processes);

    validate_file_readable(&args.input)?;
    prepare_output_path(&args.output, args.force)?;
    if let Some(path) = &args.segments_tsv {
        prepare_output_path(path, args.force)?;
    }

    let config = ModelConfig {
        normal_length: args.normal_length,
        elevated_length: args.elevated_length,
        normal_mean: args.normal_mean,
        elevated_mean: args.elevated_mean,
    };
    let model = ProbabilityModel::from_config(&config)?;
    log::info!(
        "Model: normal length={}, elevated length={}, normal mean={}, elevated mean={}",
        config.normal_length,
        config.elevated_length,
        config.normal_mean,
        config.elevated_mean
    );
    log::info!("Score threshold: {:.4}", model.threshold()?);

    let tracks = {
        let _timer = Timer::new("Reading read-start counts");
        read_counts_by_chrom(&args.input)?
    };
    let total_positions: usize = tracks.iter().map(|t| t.observations.len()).sum();
    log::info!("Read {} positions on {} chromosome(s)", total_positions, tracks.len());

    if tracks.is_empty() {
        log::warn!("No positions found in the counts file");
    }

    let results = {
        let _timer = Timer::new("Scanning for D-segments");
        scan_chromosomes(&model, &tracks, args.num_processes)?
    };

    let segment_count: usize = results.iter().map(|r| r.result.segments.len()).sum();
    log::info!("Found {} D-segment(s)", segment_count);
    if let Some(best) = results
        .iter()
        .flat_map(|r| r.result.segments.iter())
        .map(|s| s.score)
        .reduce(f64::max)
    {
        log::info!("  Highest score: {:.1}", round_score(best));
    }

    {
        let _timer = Timer::new("Writing results");
        write_report_file(&args.output, &model, &results)?;
        if let Some(path) = &args.segments_tsv {
            write_segments_tsv(&results, path)?;
            log::info!("Segments written to: {:?}", path);
        }
    }

    log::info!("Report written to: {:?}", args.output);
    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: DsegError) -> ! {
    match error {
        DsegError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
        }
        DsegError::InvalidRecord { line, message } => {
            eprintln!("Error: Invalid counts record at line {}: {}", line, message);
            eprintln!("Expected tab-separated chromosome, position and read-start count.");
        }
        DsegError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check the segment lengths and Poisson means.");
        }
        DsegError::OutOfRange(msg) => {
            eprintln!("Error: Model lookup failed: {}", msg);
        }
        DsegError::Htslib(ref e) => {
            eprintln!("Error: HTSlib error: {}", e);
        }
        DsegError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        DsegError::Csv(ref e) => {
            eprintln!("Error: Data processing error: {}", e);
            eprintln!("Please check the counts file format.");
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
