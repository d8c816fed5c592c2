//! JSON Lines file store
//!
//! Layout inside the log directory:
//!
//! ```text
//! obd_2024-05-01.jsonl      one sample per line
//! available_commands.json   last discovery record
//! ```

use crate::{DiscoverySink, SampleSink, StorageError};
use async_trait::async_trait;
use chrono::NaiveDate;
use obd_protocol::{DiscoveryRecord, Sample};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const DISCOVERY_FILE: &str = "available_commands.json";

/// Day-rotated sample files plus the discovery record
pub struct JsonlStore {
    dir: PathBuf,
    /// File the last append went to, for logging rotations
    current_file: Mutex<Option<PathBuf>>,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        info!(dir = %dir.display(), "Using JSON Lines sample store");
        Self {
            dir,
            current_file: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the samples for `date`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("obd_{}.jsonl", date.format("%Y-%m-%d")))
    }

    pub fn discovery_path(&self) -> PathBuf {
        self.dir.join(DISCOVERY_FILE)
    }

    /// Record the file being appended to; true the first time a file is used
    fn note_rotation(&self, path: &Path) -> bool {
        let mut current = self
            .current_file
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == Some(path) {
            return false;
        }
        info!(file = %path.display(), "Logging to new sample file");
        *current = Some(path.to_path_buf());
        true
    }
}

/// Whether an existing file ends in a partial line left by an interrupted write
async fn ends_mid_line(path: &Path) -> Result<bool, StorageError> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl SampleSink for JsonlStore {
    async fn append(&self, sample: &Sample) -> Result<(), StorageError> {
        let path = self.path_for(sample.timestamp.date_naive());
        fs::create_dir_all(&self.dir).await?;

        // One write per line: a crash leaves at most a torn last line,
        // which readers skip and the next process terminates.
        let mut line = Vec::with_capacity(256);
        if self.note_rotation(&path) && ends_mid_line(&path).await? {
            warn!(file = %path.display(), "Terminating partial line from previous run");
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, sample)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_all(&self, date: NaiveDate) -> Result<Vec<Sample>, StorageError> {
        let path = self.path_for(date);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(date));
            }
            Err(e) => return Err(e.into()),
        };

        let mut samples = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Sample>(line) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!(
                    file = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping unreadable sample line"
                ),
            }
        }
        debug!(%date, count = samples.len(), "Read samples");
        Ok(samples)
    }
}

#[async_trait]
impl DiscoverySink for JsonlStore {
    async fn publish(&self, record: &DiscoveryRecord) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.discovery_path();
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;

        info!(file = %path.display(), count = record.count, "Command list saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use obd_protocol::{CommandDescriptor, Reading};
    use std::collections::BTreeMap;

    fn sample_at(day: u32, rpm: f64) -> Sample {
        let mut values = BTreeMap::new();
        values.insert("RPM".to_string(), Reading::new(rpm, "rpm"));
        let ts = Local.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap();
        Sample::new(ts, values)
    }

    #[tokio::test]
    async fn test_append_and_read_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("obd_data"));

        store.append(&sample_at(1, 800.0)).await.unwrap();
        store.append(&sample_at(1, 900.0)).await.unwrap();
        store.append(&sample_at(2, 1000.0)).await.unwrap();

        let day1 = store
            .read_all(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(day1.len(), 2);
        assert_eq!(day1[1].get("RPM").unwrap().value, 900.0);

        let day2 = store
            .read_all(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(day2.len(), 1);
        let path = store.path_for(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert!(path.ends_with("obd_2024-05-02.jsonl"));
    }

    #[tokio::test]
    async fn test_missing_day_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path());
        let err = store
            .read_all(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path());
        store.append(&sample_at(3, 750.0)).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.path_for(date))
            .await
            .unwrap();
        file.write_all(b"{\"timestamp\":\"2024-05-03T12:").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let samples = store.read_all(date).await.unwrap();
        assert_eq!(samples.len(), 1);

        // A restarted process keeps appending on a fresh line
        let restarted = JsonlStore::new(dir.path());
        restarted.append(&sample_at(3, 760.0)).await.unwrap();
        let samples = restarted.read_all(date).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].get("RPM").unwrap().value, 760.0);
    }

    #[tokio::test]
    async fn test_publish_discovery_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path());
        let record = DiscoveryRecord::new(
            3,
            vec![CommandDescriptor::new("RPM", "Engine RPM").with_pid(0x01, 0x0C)],
        );
        store.publish(&record).await.unwrap();

        let text = std::fs::read_to_string(store.discovery_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["tested"], 3);
        assert_eq!(json["commands"][0]["name"], "RPM");
        assert_eq!(json["commands"][0]["pid"], 12);
    }
}
