//! Single-pass D-segment scan over per-position read-start counts

use crate::counts::ChromTrack;
use crate::model::{Bucket, ProbabilityModel};
use crate::{DsegError, DsegResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Read-start count observed at a 1-based position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub position: u64,
    pub read_starts: u32,
}

impl Observation {
    pub fn new(position: u64, read_starts: u32) -> Self {
        Self {
            position,
            read_starts,
        }
    }
}

/// A maximal-scoring run of positions, `start..=end`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
    pub score: f64,
}

/// Per-bucket read-start counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStartHistogram {
    counts: [u64; Bucket::COUNT],
}

impl ReadStartHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, bucket: Bucket) {
        self.counts[bucket.index()] += 1;
    }

    pub fn get(&self, bucket: Bucket) -> u64 {
        self.counts[bucket.index()]
    }

    pub fn merge(&mut self, other: &ReadStartHistogram) {
        for (total, count) in self.counts.iter_mut().zip(other.counts.iter()) {
            *total += count;
        }
    }

    pub fn clear(&mut self) {
        self.counts = [0; Bucket::COUNT];
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, u64)> + '_ {
        Bucket::ALL.iter().map(move |bucket| (*bucket, self.get(*bucket)))
    }
}

/// Everything a completed scan produces
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub threshold: f64,
    pub segments: Vec<Segment>,
    pub all_positions: ReadStartHistogram,
    pub segment_positions: ReadStartHistogram,
    pub positions_scanned: u64,
}

/// Scan result for one chromosome
#[derive(Debug, Clone, PartialEq)]
pub struct ChromScanResult {
    pub chrom: String,
    pub result: ScanResult,
}

/// Accumulates per-position scores and cuts out segments whose running
/// maximum reaches the model threshold.
///
/// Positions must be fed in increasing order. Gaps are allowed; positions are
/// only used to stamp segment boundaries.
#[derive(Debug, Clone)]
pub struct SegmentScanner {
    scores: [f64; Bucket::COUNT],
    threshold: f64,
    cumulative_score: f64,
    running_maximum: f64,
    segment_start: u64,
    candidate_end: u64,
    window_counts: ReadStartHistogram,
    all_counts: ReadStartHistogram,
    segment_counts: ReadStartHistogram,
    segments: Vec<Segment>,
    positions_scanned: u64,
}

impl SegmentScanner {
    pub fn new(model: &ProbabilityModel) -> DsegResult<Self> {
        let scores = model.score_table()?;
        let threshold = model.threshold()?;

        if scores.iter().any(|score| score.is_nan()) {
            log::warn!("Model has zero emission or transition probabilities; affected scores are undefined");
        }
        if threshold.is_nan() {
            log::warn!("Model threshold is undefined; no segments will be reported");
        }
        log::debug!("Scanner threshold {:.4}, bucket scores {:?}", threshold, scores);

        Ok(Self {
            scores,
            threshold,
            cumulative_score: 0.0,
            running_maximum: 0.0,
            segment_start: 1,
            candidate_end: 1,
            window_counts: ReadStartHistogram::new(),
            all_counts: ReadStartHistogram::new(),
            segment_counts: ReadStartHistogram::new(),
            segments: Vec::new(),
            positions_scanned: 0,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Feed one observation. Returns the segment it closed, if any.
    pub fn observe(&mut self, position: u64, read_starts: u32) -> Option<Segment> {
        let bucket = Bucket::from_count(read_starts);
        self.all_counts.record(bucket);
        self.window_counts.record(bucket);
        self.positions_scanned += 1;

        self.cumulative_score += self.scores[bucket.index()];

        // Ties move the candidate end forward
        if self.cumulative_score >= self.running_maximum {
            self.running_maximum = self.cumulative_score;
            self.candidate_end = position;
        }

        if self.cumulative_score <= 0.0
            || self.cumulative_score <= self.running_maximum - self.threshold
        {
            let emitted = self.close_window();
            self.reset(position + 1);
            return emitted;
        }

        None
    }

    fn close_window(&mut self) -> Option<Segment> {
        // NaN on either side never qualifies
        let qualifies = self.running_maximum >= self.threshold;
        if !qualifies {
            return None;
        }

        let segment = Segment {
            start: self.segment_start,
            end: self.candidate_end,
            score: self.running_maximum,
        };
        log::debug!(
            "D-segment {}-{} score {:.3}",
            segment.start,
            segment.end,
            segment.score
        );
        self.segments.push(segment);
        self.segment_counts.merge(&self.window_counts);
        Some(segment)
    }

    fn reset(&mut self, next_position: u64) {
        self.cumulative_score = 0.0;
        self.running_maximum = 0.0;
        self.segment_start = next_position;
        self.candidate_end = next_position;
        self.window_counts.clear();
    }

    /// Flush the open window and return the results
    pub fn finish(mut self) -> ScanResult {
        if self.window_counts.total() > 0 {
            self.close_window();
        }

        ScanResult {
            threshold: self.threshold,
            segments: self.segments,
            all_positions: self.all_counts,
            segment_positions: self.segment_counts,
            positions_scanned: self.positions_scanned,
        }
    }

    /// Scan a complete sequence of observations
    pub fn scan<I>(model: &ProbabilityModel, observations: I) -> DsegResult<ScanResult>
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut scanner = Self::new(model)?;
        for observation in observations {
            scanner.observe(observation.position, observation.read_starts);
        }
        Ok(scanner.finish())
    }

    /// Scan a fallible stream, stopping at the first error
    pub fn try_scan<I>(model: &ProbabilityModel, observations: I) -> DsegResult<ScanResult>
    where
        I: IntoIterator<Item = DsegResult<Observation>>,
    {
        let mut scanner = Self::new(model)?;
        for observation in observations {
            let observation = observation?;
            scanner.observe(observation.position, observation.read_starts);
        }
        Ok(scanner.finish())
    }
}

/// Scan each chromosome with its own scanner, sharing the model across threads.
///
/// Results are returned in the order of `tracks`.
pub fn scan_chromosomes(
    model: &ProbabilityModel,
    tracks: &[ChromTrack],
    num_threads: usize,
) -> DsegResult<Vec<ChromScanResult>> {
    if tracks.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.clamp(1, tracks.len()))
        .build()
        .map_err(|e| DsegError::InvalidConfig(format!("Failed to start thread pool: {}", e)))?;

    pool.install(|| {
        tracks
            .par_iter()
            .map(|track| -> DsegResult<ChromScanResult> {
                let result = SegmentScanner::scan(model, track.observations.iter().copied())?;
                log::info!(
                    "{}: {} positions, {} D-segments",
                    track.chrom,
                    result.positions_scanned,
                    result.segments.len()
                );
                Ok(ChromScanResult {
                    chrom: track.chrom.clone(),
                    result,
                })
            })
            .collect()
    })
}
