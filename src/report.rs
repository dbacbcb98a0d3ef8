//! Report rendering for D-segment scan results

use crate::model::{Bucket, ProbabilityModel};
use crate::scanner::{ChromScanResult, ReadStartHistogram};
use crate::utils::create_output_writer;
use crate::DsegResult;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

const SEGMENTS_PER_LINE: usize = 5;

/// Round half up to one decimal place
pub fn round_score(score: f64) -> f64 {
    (score * 10.0 + 0.5).floor() / 10.0
}

#[derive(Debug, Serialize)]
struct SegmentRow<'a> {
    chrom: &'a str,
    start: u64,
    end: u64,
    score: f64,
}

/// Write the model, threshold, segments and histograms as an XML-style report
pub fn write_report<W: Write>(
    writer: &mut W,
    model: &ProbabilityModel,
    results: &[ChromScanResult],
) -> DsegResult<()> {
    writeln!(writer, "<results>")?;
    write_model(writer, model)?;
    writeln!(
        writer,
        "  <score_threshold>{:.4}</score_threshold>",
        model.threshold()?
    )?;

    for chrom_result in results {
        let result = &chrom_result.result;
        writeln!(
            writer,
            "  <chromosome name=\"{}\" positions=\"{}\">",
            chrom_result.chrom, result.positions_scanned
        )?;

        write!(writer, "    <result type=\"segment_list\">")?;
        for (i, segment) in result.segments.iter().enumerate() {
            if i > 0 {
                write!(writer, ",")?;
                if i % SEGMENTS_PER_LINE == 0 {
                    writeln!(writer)?;
                }
            }
            write!(
                writer,
                "({},{},{:.1})",
                segment.start,
                segment.end,
                round_score(segment.score)
            )?;
        }
        writeln!(writer, "</result>")?;

        write_histogram(writer, "all", &result.all_positions)?;
        write_histogram(writer, "state2", &result.segment_positions)?;
        writeln!(writer, "  </chromosome>")?;
    }

    if results.len() > 1 {
        let mut all = ReadStartHistogram::new();
        let mut segments = ReadStartHistogram::new();
        for chrom_result in results {
            all.merge(&chrom_result.result.all_positions);
            segments.merge(&chrom_result.result.segment_positions);
        }
        writeln!(writer, "  <genome>")?;
        write_histogram(writer, "all", &all)?;
        write_histogram(writer, "state2", &segments)?;
        writeln!(writer, "  </genome>")?;
    }

    writeln!(writer, "</results>")?;
    Ok(())
}

fn write_model<W: Write>(writer: &mut W, model: &ProbabilityModel) -> DsegResult<()> {
    let states: Vec<usize> = (1..model.num_states()).collect();

    writeln!(writer, "  <model type=\"hmm\">")?;
    let labels: Vec<String> = states.iter().map(|s| s.to_string()).collect();
    writeln!(writer, "    <states>{}</states>", labels.join(","))?;

    let mut initial = Vec::with_capacity(states.len());
    for &state in &states {
        initial.push(format!("{}={:.5}", state, model.initiation_probability(state)?));
    }
    writeln!(
        writer,
        "    <initial_state_probabilities>{}</initial_state_probabilities>",
        initial.join(",")
    )?;

    for &from in &states {
        let mut row = Vec::with_capacity(states.len());
        for &to in &states {
            row.push(format!("{}={:.6e}", to, model.transition_probability(from, to)?));
        }
        writeln!(
            writer,
            "    <transition_probabilities state=\"{}\">{}</transition_probabilities>",
            from,
            row.join(",")
        )?;
    }

    for &state in &states {
        let mut row = Vec::with_capacity(Bucket::COUNT);
        for bucket in Bucket::ALL {
            row.push(format!(
                "{}={:.6e}",
                bucket,
                model.emission_probability(state, bucket)?
            ));
        }
        writeln!(
            writer,
            "    <emission_probabilities state=\"{}\">{}</emission_probabilities>",
            state,
            row.join(",")
        )?;
    }

    writeln!(writer, "  </model>")?;
    Ok(())
}

fn write_histogram<W: Write>(
    writer: &mut W,
    positions: &str,
    histogram: &ReadStartHistogram,
) -> DsegResult<()> {
    let cells: Vec<String> = histogram
        .iter()
        .map(|(bucket, count)| format!("{}={}", bucket, count))
        .collect();
    writeln!(
        writer,
        "    <result type=\"read_start_counts_histogram\" positions=\"{}\">{}</result>",
        positions,
        cells.join(", ")
    )?;
    Ok(())
}

/// Render the report into a string
pub fn render_report(model: &ProbabilityModel, results: &[ChromScanResult]) -> DsegResult<String> {
    let mut buffer = Vec::new();
    write_report(&mut buffer, model, results)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Write the report to a file, gzip-compressed for `.gz` paths
pub fn write_report_file<P: AsRef<Path>>(
    path: P,
    model: &ProbabilityModel,
    results: &[ChromScanResult],
) -> DsegResult<()> {
    let mut writer = create_output_writer(path.as_ref())?;
    write_report(&mut writer, model, results)?;
    writer.flush()?;
    Ok(())
}

/// Write every segment as a `chrom start end score` TSV row
pub fn write_segments_tsv<P: AsRef<Path>>(results: &[ChromScanResult], path: P) -> DsegResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(create_output_writer(path.as_ref())?);

    for chrom_result in results {
        for segment in &chrom_result.result.segments {
            writer.serialize(SegmentRow {
                chrom: &chrom_result.chrom,
                start: segment.start,
                end: segment.end,
                score: round_score(segment.score),
            })?;
        }
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ScanResult, Segment};
    use crate::ModelConfig;
    use tempfile::TempDir;

    fn sample_results() -> Vec<ChromScanResult> {
        let mut all = ReadStartHistogram::new();
        let mut in_segments = ReadStartHistogram::new();
        for _ in 0..5 {
            all.record(Bucket::Zero);
        }
        all.record(Bucket::ThreeOrMore);
        in_segments.record(Bucket::ThreeOrMore);

        vec![
            ChromScanResult {
                chrom: "chr20".to_string(),
                result: ScanResult {
                    threshold: 33.2,
                    segments: vec![
                        Segment {
                            start: 101,
                            end: 140,
                            score: 62.149,
                        },
                        Segment {
                            start: 900,
                            end: 930,
                            score: 40.07,
                        },
                    ],
                    all_positions: all,
                    segment_positions: in_segments,
                    positions_scanned: 6,
                },
            },
            ChromScanResult {
                chrom: "chr21".to_string(),
                result: ScanResult {
                    threshold: 33.2,
                    segments: Vec::new(),
                    all_positions: all,
                    segment_positions: ReadStartHistogram::new(),
                    positions_scanned: 6,
                },
            },
        ]
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(2.449999), 2.4);
        assert_eq!(round_score(2.45), 2.5);
        assert_eq!(round_score(33.26), 33.3);
        assert_eq!(round_score(-0.04), 0.0);
        assert_eq!(round_score(7.0), 7.0);
    }

    #[test]
    fn test_render_report() {
        let model = ProbabilityModel::from_config(&ModelConfig::default()).unwrap();
        let report = render_report(&model, &sample_results()).unwrap();

        assert!(report.starts_with("<results>\n"));
        assert!(report.contains("<states>1,2</states>"));
        assert!(report.contains("<transition_probabilities state=\"1\">"));
        assert!(report.contains("<emission_probabilities state=\"2\">0="));
        assert!(report.contains("<score_threshold>33.219"));
        assert!(report.contains("(101,140,62.1),(900,930,40.1)"));
        assert!(report.contains("positions=\"all\">0=5, 1=0, 2=0, 3=1</result>"));
        assert!(report.contains("positions=\"state2\">0=0, 1=0, 2=0, 3=1</result>"));
        assert!(report.contains("<chromosome name=\"chr21\" positions=\"6\">"));
        assert!(report.contains("<genome>"));
        assert!(report.contains("positions=\"all\">0=10, 1=0, 2=0, 3=2</result>"));
        assert!(report.trim_end().ends_with("</results>"));
    }

    #[test]
    fn test_segment_list_wraps_lines() {
        let model = ProbabilityModel::from_config(&ModelConfig::default()).unwrap();
        let mut results = sample_results();
        results.truncate(1);
        results[0].result.segments = (0..6)
            .map(|i| Segment {
                start: i * 100 + 1,
                end: i * 100 + 50,
                score: 35.0,
            })
            .collect();

        let report = render_report(&model, &results).unwrap();
        assert!(report.contains("(401,450,35.0),\n(501,550,35.0)</result>"));
        assert!(!report.contains("<genome>"));
    }

    #[test]
    fn test_write_segments_tsv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segments.tsv");
        write_segments_tsv(&sample_results(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "chrom\tstart\tend\tscore");
        assert_eq!(lines[1], "chr20\t101\t140\t62.1");
        assert_eq!(lines[2], "chr20\t900\t930\t40.1");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_write_report_file_gz() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.xml.gz");
        let model = ProbabilityModel::from_config(&ModelConfig::default()).unwrap();
        write_report_file(&path, &model, &sample_results()).unwrap();
        assert!(crate::utils::is_gzipped(&path).unwrap());
    }
}
