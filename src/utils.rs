//! Utility functions for file handling and common operations

use crate::{DsegError, DsegResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Check if a file is gzip compressed
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> DsegResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(DsegError::Io(e)),
    }
}

/// Get the number of CPU cores, with a fallback default
pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Validate that a file exists and can be opened
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> DsegResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DsegError::FileNotFound(path.to_string_lossy().to_string()));
    }

    File::open(path).map_err(|_| DsegError::FileNotFound(path.to_string_lossy().to_string()))?;

    Ok(())
}

/// Check if a path has a specific extension
pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Refuse to clobber an existing output unless forced, and create its parent directory
pub fn prepare_output_path<P: AsRef<Path>>(path: P, force: bool) -> DsegResult<()> {
    let path = path.as_ref();
    if path.exists() && !force {
        return Err(DsegError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", path),
        )));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Open an output file, gzip-compressing it when the path ends in `.gz`
pub fn create_output_writer(path: &Path) -> DsegResult<Box<dyn Write>> {
    let file = File::create(path)?;
    let writer: Box<dyn Write> = if has_extension(path, "gz") {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(BufWriter::new(file))
    };
    Ok(writer)
}

/// Timer utility for measuring execution time
pub struct Timer {
    start: std::time::Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::info!("Starting: {}", name);
        Timer {
            start: std::time::Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::info!("Finished '{}' in {:.2?}", self.name, self.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_is_gzipped() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "chr1\t1\t0").unwrap();
        assert!(!is_gzipped(temp_file.path()).unwrap());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0x1f, 0x8b]).unwrap();
        assert!(is_gzipped(temp_file.path()).unwrap());

        let empty = NamedTempFile::new().unwrap();
        assert!(!is_gzipped(empty.path()).unwrap());
    }

    #[test]
    fn test_get_num_cpus() {
        assert!(get_num_cpus() >= 1);
    }

    #[test]
    fn test_validate_file_readable() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(validate_file_readable(temp_file.path()).is_ok());
        assert!(matches!(
            validate_file_readable("/nonexistent/file"),
            Err(DsegError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("segments.tsv.gz", "gz"));
        assert!(has_extension("counts.GZ", "gz"));
        assert!(!has_extension("counts.tsv", "gz"));
        assert!(!has_extension("counts", "gz"));
    }

    #[test]
    fn test_prepare_output_path() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("out").join("report.xml");
        prepare_output_path(&nested, false).unwrap();
        assert!(nested.parent().unwrap().is_dir());

        let existing = NamedTempFile::new().unwrap();
        assert!(prepare_output_path(existing.path(), false).is_err());
        assert!(prepare_output_path(existing.path(), true).is_ok());
    }

    #[test]
    fn test_create_output_writer_compresses_gz() {
        let dir = TempDir::new().unwrap();
        let gz_path = dir.path().join("out.tsv.gz");
        {
            let mut writer = create_output_writer(&gz_path).unwrap();
            writeln!(writer, "hello").unwrap();
        }
        assert!(is_gzipped(&gz_path).unwrap());

        let plain_path = dir.path().join("out.tsv");
        {
            let mut writer = create_output_writer(&plain_path).unwrap();
            writeln!(writer, "hello").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&plain_path).unwrap(), "hello\n");
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("test");
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(timer.elapsed().as_millis() >= 1);
    }
}
