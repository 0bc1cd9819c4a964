//! Append-only heart-rate history, one CSV file per user.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::ApiError;
use crate::models::heart_rate::HeartRateReading;

pub const CSV_HEADER: &str = "ts,bpm,device";

/// Durable record of posted readings. Only the newest row is ever read back.
#[async_trait]
pub trait HeartRateArchive: Send + Sync {
    async fn append(&self, user_id: &str, reading: &HeartRateReading) -> Result<(), ApiError>;
    async fn read_latest(&self, user_id: &str) -> Result<Option<HeartRateReading>, ApiError>;
}

// ---------------------------------------------------------------------------
// CSV files
// ---------------------------------------------------------------------------

pub struct CsvArchive {
    dir: PathBuf,
    // Serializes appends so a header is written exactly once per file.
    write_lock: tokio::sync::Mutex<()>,
}

impl CsvArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", safe_file_stem(user_id)))
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; fall back to `default`.
pub fn safe_file_stem(user_id: &str) -> String {
    let stem: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if stem.is_empty() {
        "default".to_string()
    } else {
        stem
    }
}

/// Quote a field when it holds a delimiter, quote or line break (RFC 4180).
fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn format_row(reading: &HeartRateReading) -> String {
    let device = quote_field(reading.device.as_deref().unwrap_or_default());
    format!("{},{},{}\n", reading.ts, reading.bpm, device)
}

/// Split CSV text into records. Quoted fields may span lines and carry
/// doubled quotes.
fn parse_records(contents: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = contents.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

fn parse_record(record: &[String]) -> Option<HeartRateReading> {
    let ts = record.first()?.trim().parse().ok()?;
    let bpm = record.get(1)?.trim().parse().ok()?;
    let device = record
        .get(2)
        .filter(|d| !d.is_empty())
        .cloned();
    Some(HeartRateReading { ts, bpm, device })
}

async fn file_is_empty(path: &Path) -> bool {
    match fs::metadata(path).await {
        Ok(meta) => meta.len() == 0,
        Err(_) => true,
    }
}

#[async_trait]
impl HeartRateArchive for CsvArchive {
    async fn append(&self, user_id: &str, reading: &HeartRateReading) -> Result<(), ApiError> {
        let path = self.path_for(user_id);
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.dir).await?;
        let needs_header = file_is_empty(&path).await;
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;

        let mut buf = String::new();
        if needs_header {
            buf.push_str(CSV_HEADER);
            buf.push('\n');
        }
        buf.push_str(&format_row(reading));
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_latest(&self, user_id: &str) -> Result<Option<HeartRateReading>, ApiError> {
        let path = self.path_for(user_id);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let latest = parse_records(&contents)
            .into_iter()
            .rev()
            .find(|r| !(r.len() == 1 && r[0].trim().is_empty()));
        Ok(match latest {
            Some(record) if record.join(",") != CSV_HEADER => parse_record(&record),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryArchive {
    rows: Mutex<HashMap<String, Vec<HeartRateReading>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, user_id: &str) -> Vec<HeartRateReading> {
        self.rows.lock().get(user_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HeartRateArchive for MemoryArchive {
    async fn append(&self, user_id: &str, reading: &HeartRateReading) -> Result<(), ApiError> {
        self.rows
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .push(reading.clone());
        Ok(())
    }

    async fn read_latest(&self, user_id: &str) -> Result<Option<HeartRateReading>, ApiError> {
        Ok(self.rows.lock().get(user_id).and_then(|r| r.last().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(ts: i64, bpm: i64, device: Option<&str>) -> HeartRateReading {
        HeartRateReading {
            bpm,
            ts,
            device: device.map(str::to_string),
        }
    }

    #[test]
    fn file_stem_is_sanitized() {
        assert_eq!(safe_file_stem("alice-01_x"), "alice-01_x");
        assert_eq!(safe_file_stem("../etc/passwd"), "etcpasswd");
        assert_eq!(safe_file_stem("///"), "default");
        assert_eq!(safe_file_stem(""), "default");
    }

    #[tokio::test]
    async fn csv_append_writes_header_once_and_reads_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let archive = CsvArchive::new(dir.path().join("nested"));

        archive.append("alice", &reading(1, 70, Some("watch"))).await.unwrap();
        archive.append("alice", &reading(2, 75, None)).await.unwrap();

        let contents = std::fs::read_to_string(archive.path_for("alice")).unwrap();
        assert_eq!(contents, "ts,bpm,device\n1,70,watch\n2,75,\n");

        let latest = archive.read_latest("alice").await.unwrap();
        assert_eq!(latest, Some(reading(2, 75, None)));
    }

    #[tokio::test]
    async fn csv_missing_or_header_only_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let archive = CsvArchive::new(dir.path());
        assert_eq!(archive.read_latest("nobody").await.unwrap(), None);

        std::fs::write(archive.path_for("empty"), "ts,bpm,device\n").unwrap();
        assert_eq!(archive.read_latest("empty").await.unwrap(), None);
    }

    #[tokio::test]
    async fn csv_device_with_delimiters_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let archive = CsvArchive::new(dir.path());

        for device in ["Watch, Series 9", "say \"hi\"", "two\nlines\r\n"] {
            let r = reading(9, 80, Some(device));
            archive.append("bob", &r).await.unwrap();
            assert_eq!(archive.read_latest("bob").await.unwrap(), Some(r));
        }
    }

    #[test]
    fn quoted_fields_are_escaped_per_rfc4180() {
        assert_eq!(
            format_row(&reading(1, 70, Some("a,\"b\""))),
            "1,70,\"a,\"\"b\"\"\"\n"
        );
        assert_eq!(format_row(&reading(1, 70, Some("plain"))), "1,70,plain\n");
    }

    #[test]
    fn parse_records_handles_crlf_and_missing_trailing_newline() {
        let records = parse_records("ts,bpm,device\r\n1,60,\"x\ny\"\r\n2,61,");
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], vec!["1", "60", "x\ny"]);
        assert_eq!(records[2], vec!["2", "61", ""]);
    }

    #[tokio::test]
    async fn memory_archive_returns_last_append() {
        let archive = MemoryArchive::new();
        assert_eq!(archive.read_latest("alice").await.unwrap(), None);
        archive.append("alice", &reading(1, 60, None)).await.unwrap();
        archive.append("alice", &reading(2, 61, None)).await.unwrap();
        assert_eq!(archive.read_latest("alice").await.unwrap().unwrap().ts, 2);
        assert_eq!(archive.rows("alice").len(), 2);
    }
}
