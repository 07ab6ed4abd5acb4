//! JSON line-delimited logging of synthesis requests.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

fn log_dir() -> io::Result<()> {
    fs::create_dir_all("logs")
}

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// One completed (or failed) synthesis request.
#[derive(Debug, Serialize)]
pub struct SynthesisLogEntry {
    pub kind: String,
    pub timestamp_ms: u128,
    pub classes: Vec<String>,
    pub height: usize,
    pub width: usize,
    pub steps: usize,
    pub seed: u64,
    pub duration_ms: u128,
    pub outcome: String,
}

impl SynthesisLogEntry {
    pub fn new(kind: &str, classes: Vec<String>, height: usize, width: usize) -> Self {
        Self {
            kind: kind.to_string(),
            timestamp_ms: timestamp_ms(),
            classes,
            height,
            width,
            steps: 0,
            seed: 0,
            duration_ms: 0,
            outcome: String::new(),
        }
    }
}

/// Append one request record to the synthesis log.
pub fn log_synthesis(entry: &SynthesisLogEntry) -> io::Result<()> {
    log_dir()?;
    append_json_line("logs/synthesis.jsonl", entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_to_json() {
        let mut entry = SynthesisLogEntry::new(
            "blend",
            vec!["perlin".to_string(), "voronoi".to_string()],
            256,
            256,
        );
        entry.steps = 40;
        entry.seed = 42;
        entry.outcome = "ok".to_string();

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"blend\""));
        assert!(json.contains("\"perlin\""));
        assert!(json.contains("\"steps\":40"));
    }
}
