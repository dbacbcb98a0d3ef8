//! Read-start count files: `chrom<TAB>position<TAB>read_starts`, plain or gzipped

use crate::scanner::Observation;
use crate::utils::{create_output_writer, is_gzipped};
use crate::{DsegError, DsegResult};
use flate2::read::MultiGzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One line of a counts file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStartRecord {
    pub chrom: String,
    pub position: u64,
    pub read_starts: u32,
}

impl From<&ReadStartRecord> for Observation {
    fn from(record: &ReadStartRecord) -> Self {
        Observation::new(record.position, record.read_starts)
    }
}

/// Ordered observations for a single chromosome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromTrack {
    pub chrom: String,
    pub observations: Vec<Observation>,
}

impl ChromTrack {
    pub fn new(chrom: String) -> Self {
        Self {
            chrom,
            observations: Vec::new(),
        }
    }
}

/// Streaming reader over a counts file.
///
/// Yields records lazily and checks that positions strictly increase within
/// each chromosome.
pub struct CountsReader {
    records: csv::StringRecordsIntoIter<Box<dyn Read>>,
    previous: Option<(String, u64)>,
}

impl CountsReader {
    pub fn open<P: AsRef<Path>>(path: P) -> DsegResult<Self> {
        let file = File::open(&path)
            .map_err(|_| DsegError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

        let reader: Box<dyn Read> = if is_gzipped(&path)? {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        Ok(Self::from_reader(reader))
    }

    pub fn from_reader(reader: Box<dyn Read>) -> Self {
        let records = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();

        Self {
            records,
            previous: None,
        }
    }

    fn parse(&mut self, record: csv::StringRecord) -> DsegResult<ReadStartRecord> {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let invalid = |message: String| DsegError::InvalidRecord { line, message };

        if record.len() < 3 {
            return Err(invalid(format!(
                "expected chrom, position and read starts, found {} column(s)",
                record.len()
            )));
        }

        let chrom = record[0].to_string();
        let position = record[1]
            .parse::<u64>()
            .map_err(|_| invalid(format!("Invalid position: {}", &record[1])))?;
        if position == 0 {
            return Err(invalid("positions are 1-based; found 0".to_string()));
        }
        let read_starts = record[2]
            .parse::<u32>()
            .map_err(|_| invalid(format!("Invalid read start count: {}", &record[2])))?;

        if let Some((previous_chrom, previous_position)) = &self.previous {
            if *previous_chrom == chrom && position <= *previous_position {
                return Err(invalid(format!(
                    "position {} on {} does not follow {}",
                    position, chrom, previous_position
                )));
            }
        }
        self.previous = Some((chrom.clone(), position));

        Ok(ReadStartRecord {
            chrom,
            position,
            read_starts,
        })
    }
}

impl Iterator for CountsReader {
    type Item = DsegResult<ReadStartRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(DsegError::Csv(e))),
        };
        Some(self.parse(record))
    }
}

/// Read a counts file into one track per chromosome, in file order.
///
/// Each chromosome must occupy a single contiguous block of lines.
pub fn read_counts_by_chrom<P: AsRef<Path>>(path: P) -> DsegResult<Vec<ChromTrack>> {
    collect_tracks(CountsReader::open(path)?)
}

fn collect_tracks<I>(records: I) -> DsegResult<Vec<ChromTrack>>
where
    I: IntoIterator<Item = DsegResult<ReadStartRecord>>,
{
    let mut tracks: Vec<ChromTrack> = Vec::new();
    let mut seen = HashSet::new();

    for (index, record) in records.into_iter().enumerate() {
        let record = record?;

        let same_chrom = tracks
            .last()
            .map(|track| track.chrom == record.chrom)
            .unwrap_or(false);
        if !same_chrom {
            if !seen.insert(record.chrom.clone()) {
                return Err(DsegError::InvalidRecord {
                    line: index as u64 + 1,
                    message: format!("chromosome {} appears in more than one block", record.chrom),
                });
            }
            tracks.push(ChromTrack::new(record.chrom.clone()));
        }

        if let Some(track) = tracks.last_mut() {
            track.observations.push(Observation::from(&record));
        }
    }

    Ok(tracks)
}

/// Write tracks in counts-file format, gzip-compressed for `.gz` paths
pub fn write_counts<P: AsRef<Path>>(tracks: &[ChromTrack], path: P) -> DsegResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(create_output_writer(path.as_ref())?);

    for track in tracks {
        for observation in &track.observations {
            writer.serialize((&track.chrom, observation.position, observation.read_starts))?;
        }
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn counts_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_read_counts_by_chrom() {
        let file = counts_file(&[
            "# chrom\tpos\tcount",
            "chr1\t1\t0",
            "chr1\t2\t4",
            "chr1\t5\t1",
            "chr2\t1\t2\textra",
        ]);

        let tracks = read_counts_by_chrom(file.path()).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].chrom, "chr1");
        assert_eq!(
            tracks[0].observations,
            vec![
                Observation::new(1, 0),
                Observation::new(2, 4),
                Observation::new(5, 1)
            ]
        );
        assert_eq!(tracks[1].observations, vec![Observation::new(1, 2)]);
    }

    #[test]
    fn test_streaming_reader_yields_records() {
        let file = counts_file(&["chr20\t10\t3", "chr20\t11\t0"]);
        let records: Vec<_> = CountsReader::open(file.path())
            .unwrap()
            .collect::<DsegResult<_>>()
            .unwrap();

        assert_eq!(
            records[0],
            ReadStartRecord {
                chrom: "chr20".to_string(),
                position: 10,
                read_starts: 3
            }
        );
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_invalid_fields() {
        let file = counts_file(&["chr1\t1\t0", "chr1\tabc\t0"]);
        let result = read_counts_by_chrom(file.path());
        assert!(matches!(result, Err(DsegError::InvalidRecord { line: 2, .. })));

        let file = counts_file(&["chr1\t1\t-3"]);
        assert!(read_counts_by_chrom(file.path()).is_err());

        let file = counts_file(&["chr1\t0\t1"]);
        assert!(read_counts_by_chrom(file.path()).is_err());

        let file = counts_file(&["chr1\t7"]);
        assert!(matches!(
            read_counts_by_chrom(file.path()),
            Err(DsegError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_positions_must_increase() {
        let file = counts_file(&["chr1\t5\t0", "chr1\t5\t1"]);
        assert!(matches!(
            read_counts_by_chrom(file.path()),
            Err(DsegError::InvalidRecord { line: 2, .. })
        ));

        // A new chromosome restarts numbering
        let file = counts_file(&["chr1\t5\t0", "chr2\t1\t1"]);
        assert!(read_counts_by_chrom(file.path()).is_ok());
    }

    #[test]
    fn test_split_chromosome_rejected() {
        let file = counts_file(&["chr1\t1\t0", "chr2\t1\t0", "chr1\t2\t0"]);
        assert!(read_counts_by_chrom(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_counts_by_chrom("/nonexistent/counts.tsv"),
            Err(DsegError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_write_and_read_gzipped_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counts.tsv.gz");
        let tracks = vec![ChromTrack {
            chrom: "chrX".to_string(),
            observations: vec![Observation::new(1, 0), Observation::new(2, 7)],
        }];

        write_counts(&tracks, &path).unwrap();
        assert!(is_gzipped(&path).unwrap());
        assert_eq!(read_counts_by_chrom(&path).unwrap(), tracks);
    }
}
