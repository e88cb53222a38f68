//! Captured stdout/stderr of a spawned daemon.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes kept from the end of each stream.
pub const TAIL_BYTES: u64 = 2048;

/// Last lines a daemon wrote before a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputTail {
    /// Tail of standard output.
    pub stdout: String,
    /// Tail of standard error.
    pub stderr: String,
}

impl OutputTail {
    /// Reads the tails of both log files; unreadable files yield empty text.
    #[must_use]
    pub fn capture(stdout: &Path, stderr: &Path) -> Self {
        Self {
            stdout: read_tail(stdout, TAIL_BYTES).unwrap_or_default(),
            stderr: read_tail(stderr, TAIL_BYTES).unwrap_or_default(),
        }
    }

    /// Whether neither stream produced output.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

impl fmt::Display for OutputTail {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.stdout.is_empty() {
            write!(formatter, "; stdout tail: {}", self.stdout)?;
        }
        if !self.stderr.is_empty() {
            write!(formatter, "; stderr tail: {}", self.stderr)?;
        }
        Ok(())
    }
}

fn read_tail(path: &Path, limit: u64) -> io::Result<String> {
    let mut file = File::open(path)?;
    let length = file.metadata()?.len();
    file.seek(SeekFrom::Start(length.saturating_sub(limit)))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_owned())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn keeps_only_the_tail() {
        let dir = TempDir::new().expect("temp dir");
        let stdout = dir.path().join("out.log");
        let stderr = dir.path().join("err.log");
        let long = format!("{}END", "x".repeat(5000));
        fs::write(&stdout, &long).expect("write stdout");
        fs::write(&stderr, "boom\n").expect("write stderr");
        let tail = OutputTail::capture(&stdout, &stderr);
        assert_eq!(tail.stdout.len(), 2048);
        assert!(tail.stdout.ends_with("END"));
        assert_eq!(tail.stderr, "boom");
    }

    #[test]
    fn missing_files_render_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let tail = OutputTail::capture(&dir.path().join("a"), &dir.path().join("b"));
        assert!(tail.is_empty());
        assert_eq!(tail.to_string(), "");
    }
}
