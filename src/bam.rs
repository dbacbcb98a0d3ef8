//! Read-start counting from indexed BAM files

use crate::counts::ChromTrack;
use crate::scanner::Observation;
use crate::{DsegError, DsegResult};
use rayon::prelude::*;
use rust_htslib::bam::{IndexedReader, Read, Record};
use std::path::Path;

const FLAG_UNMAPPED: u16 = 0x4;
const FLAG_SECONDARY: u16 = 0x100;
const FLAG_QC_FAIL: u16 = 0x200;
const FLAG_DUPLICATE: u16 = 0x400;
const FLAG_SUPPLEMENTARY: u16 = 0x800;

const SKIP_FLAGS: u16 =
    FLAG_UNMAPPED | FLAG_SECONDARY | FLAG_QC_FAIL | FLAG_DUPLICATE | FLAG_SUPPLEMENTARY;

/// Whether a read contributes a read start
pub fn keep_read(flags: u16, mapq: u8, min_mapq: u8) -> bool {
    flags & SKIP_FLAGS == 0 && mapq >= min_mapq
}

/// Dense per-position read-start tally for one contig
#[derive(Debug, Clone)]
pub struct ReadStartTally {
    counts: Vec<u32>,
    outside: u64,
}

impl ReadStartTally {
    pub fn new(contig_length: usize) -> Self {
        Self {
            counts: vec![0; contig_length],
            outside: 0,
        }
    }

    /// Add a read whose leftmost aligned base is at 0-based `pos`
    pub fn add(&mut self, pos: i64) {
        match usize::try_from(pos).ok().and_then(|i| self.counts.get_mut(i)) {
            Some(count) => *count = count.saturating_add(1),
            None => self.outside += 1,
        }
    }

    /// Reads whose start fell outside the contig
    pub fn outside(&self) -> u64 {
        self.outside
    }

    /// Convert to a track covering positions `1..=contig_length`
    pub fn into_track(self, chrom: &str) -> ChromTrack {
        ChromTrack {
            chrom: chrom.to_string(),
            observations: self
                .counts
                .into_iter()
                .enumerate()
                .map(|(i, count)| Observation::new(i as u64 + 1, count))
                .collect(),
        }
    }
}

/// Counts read starts per position from an indexed BAM file
pub struct ReadStartCounter {
    bam_reader: IndexedReader,
    min_mapq: u8,
}

impl ReadStartCounter {
    pub fn new<P: AsRef<Path>>(bam_path: P, min_mapq: u8) -> DsegResult<Self> {
        let bam_path = bam_path.as_ref();

        // Check for BAI index file next to the BAM file
        let bai_path = bam_path.with_extension("bam.bai");
        let alt_bai_path = bam_path.with_extension("bai");

        let bam_reader = if bai_path.exists() {
            IndexedReader::from_path_and_index(bam_path, &bai_path)?
        } else if alt_bai_path.exists() {
            IndexedReader::from_path_and_index(bam_path, &alt_bai_path)?
        } else {
            return Err(DsegError::FileNotFound(format!(
                "BAM index file not found. Expected {} or {}",
                bai_path.display(),
                alt_bai_path.display()
            )));
        };

        Ok(ReadStartCounter {
            bam_reader,
            min_mapq,
        })
    }

    /// Contig names in header order
    pub fn contigs(&self) -> Vec<String> {
        self.bam_reader
            .header()
            .target_names()
            .iter()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect()
    }

    /// Count read starts at every position of `chrom`
    pub fn count_contig(&mut self, chrom: &str) -> DsegResult<ChromTrack> {
        let header = self.bam_reader.header();
        let tid = header
            .tid(chrom.as_bytes())
            .ok_or_else(|| DsegError::InvalidConfig(format!("Unknown chromosome: {}", chrom)))?;
        let length = header.target_len(tid).ok_or_else(|| {
            DsegError::InvalidConfig(format!("No length in BAM header for {}", chrom))
        })?;

        self.bam_reader.fetch((tid, 0i64, length as i64))?;

        let mut tally = ReadStartTally::new(length as usize);
        let mut skipped = 0u64;
        let mut record = Record::new();
        while let Some(result) = self.bam_reader.read(&mut record) {
            result?;
            if !keep_read(record.flags(), record.mapq(), self.min_mapq) {
                skipped += 1;
                continue;
            }
            tally.add(record.pos());
        }

        if tally.outside() > 0 {
            log::warn!(
                "{}: {} reads start outside the contig and were ignored",
                chrom,
                tally.outside()
            );
        }
        log::info!("{}: {} bp counted, {} reads filtered", chrom, length, skipped);

        Ok(tally.into_track(chrom))
    }
}

/// List the contigs of a BAM file
pub fn bam_contigs<P: AsRef<Path>>(bam_path: P) -> DsegResult<Vec<String>> {
    Ok(ReadStartCounter::new(bam_path, 0)?.contigs())
}

/// Count read starts for several contigs in parallel, one reader per contig.
///
/// Tracks are returned in the order of `chroms`.
pub fn count_read_starts(
    bam_path: &Path,
    chroms: &[String],
    min_mapq: u8,
    num_threads: usize,
) -> DsegResult<Vec<ChromTrack>> {
    if chroms.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.clamp(1, chroms.len()))
        .build()
        .map_err(|e| DsegError::InvalidConfig(format!("Failed to start thread pool: {}", e)))?;

    pool.install(|| {
        chroms
            .par_iter()
            .map(|chrom| -> DsegResult<ChromTrack> {
                let mut counter = ReadStartCounter::new(bam_path, min_mapq)?;
                counter.count_contig(chrom)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::NamedTempFile;

    #[test]
    fn test_keep_read_filters() {
        assert!(keep_read(0, 60, 0));
        assert!(keep_read(0x10, 60, 20)); // reverse strand is fine
        assert!(!keep_read(FLAG_UNMAPPED, 60, 0));
        assert!(!keep_read(FLAG_SECONDARY | 0x10, 60, 0));
        assert!(!keep_read(FLAG_SUPPLEMENTARY, 60, 0));
        assert!(!keep_read(FLAG_DUPLICATE, 60, 0));
        assert!(!keep_read(FLAG_QC_FAIL, 60, 0));
        assert!(!keep_read(0, 10, 20));
    }

    #[test]
    fn test_tally_into_track() {
        let mut tally = ReadStartTally::new(4);
        for pos in [0, 2, 2, 3, 3, 3, 3] {
            tally.add(pos);
        }
        tally.add(-1);
        tally.add(4);
        assert_eq!(tally.outside(), 2);

        let track = tally.into_track("chr20");
        assert_eq!(track.chrom, "chr20");
        assert_eq!(
            track.observations,
            vec![
                Observation::new(1, 1),
                Observation::new(2, 0),
                Observation::new(3, 2),
                Observation::new(4, 4),
            ]
        );
    }

    #[test]
    fn test_counter_index_detection() {
        let temp_bam = NamedTempFile::new().unwrap();

        let result = ReadStartCounter::new(temp_bam.path(), 0);
        if let Err(DsegError::FileNotFound(msg)) = result {
            assert!(msg.contains("BAM index file not found"));
            assert!(msg.contains(".bam.bai"));
        } else {
            panic!("Expected FileNotFound error");
        }
    }

    #[test]
    fn test_counter_rejects_invalid_bam() {
        let temp_bam = NamedTempFile::new().unwrap();
        let bai_path = temp_bam.path().with_extension("bai");
        let _temp_bai = File::create(&bai_path).unwrap();

        // Index is found, but neither file is real
        assert!(ReadStartCounter::new(temp_bam.path(), 0).is_err());

        std::fs::remove_file(bai_path).ok();
    }

    #[test]
    fn test_count_read_starts_without_contigs() {
        let tracks = count_read_starts(Path::new("/nonexistent.bam"), &[], 0, 2).unwrap();
        assert!(tracks.is_empty());
    }
}
