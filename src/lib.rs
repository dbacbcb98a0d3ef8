//! # dseg - D-Segment Finder
//!
//! Detects regions of elevated copy number from per-position read-start
//! counts. A two-state hidden Markov model (background vs. elevated) turns
//! each observation into a log2 likelihood-ratio increment, and a single
//! streaming scan extracts the maximal-scoring runs whose score reaches a
//! threshold derived from the model's transition probabilities.

pub mod bam;
pub mod counts;
pub mod model;
pub mod report;
pub mod scanner;
pub mod utils;

/// Parameters for the Poisson-emission two-state model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub normal_length: u64,   // Expected length of a background run
    pub elevated_length: u64, // Expected length of an elevated run
    pub normal_mean: f64,     // Mean read starts per position in background
    pub elevated_mean: f64,   // Mean read starts per position when elevated
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            normal_length: 1_000_000,
            elevated_length: 10_000,
            normal_mean: 0.38,
            elevated_mean: 0.57,
        }
    }
}

/// Error types for the dseg library
#[derive(Debug, thiserror::Error)]
pub enum DsegError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTSlib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Key out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid record at line {line}: {message}")]
    InvalidRecord { line: u64, message: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type DsegResult<T> = Result<T, DsegError>;
