// src/sink.rs
//! Message archive: newest-first, capped list of relayed items that the
//! browse API pages through.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::item::NewsItem;

/// Records kept by default.
pub const DEFAULT_ARCHIVE_CAP: usize = 1000;

/// Stored shape: `{id, time, source, content}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: String,
    pub time: String,
    pub source: String,
    pub content: String,
}

impl From<&NewsItem> for ArchiveRecord {
    fn from(it: &NewsItem) -> Self {
        Self {
            id: it.identity().to_string(),
            time: it.timestamp().to_string(),
            source: it.source().to_string(),
            content: it.content().to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    /// Insert at the front, dropping the oldest records beyond the cap.
    async fn persist(&self, item: &NewsItem) -> Result<()>;
}

/// JSON array file sink. Keeps the records in memory and rewrites the file
/// (temp file + rename) on every insert so readers never see a torn write.
pub struct JsonFileSink {
    path: PathBuf,
    cap: usize,
    records: Mutex<Vec<ArchiveRecord>>,
}

impl JsonFileSink {
    /// Open `path`, loading existing records. A missing file starts empty;
    /// an unreadable one is logged and replaced on the next write.
    pub async fn open(path: impl Into<PathBuf>, cap: usize) -> Self {
        let path = path.into();
        let cap = cap.max(1);
        let mut records = match load_records(&path).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(target: "sink", path = %path.display(), error = %format!("{e:#}"), "archive unreadable, starting empty");
                Vec::new()
            }
        };
        records.truncate(cap);
        Self {
            path,
            cap,
            records: Mutex::new(records),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait::async_trait]
impl MessageSink for JsonFileSink {
    async fn persist(&self, item: &NewsItem) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(0, ArchiveRecord::from(item));
        records.truncate(self.cap);

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating archive dir {}", dir.display()))?;
        }
        let body = serde_json::to_vec_pretty(&*records).context("serializing archive")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

async fn load_records(path: &Path) -> Result<Vec<ArchiveRecord>> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) if s.trim().is_empty() => Ok(Vec::new()),
        Ok(s) => serde_json::from_str(&s)
            .with_context(|| format!("parsing archive {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("reading archive {}", path.display())),
    }
}

/// Page through an archive file, newest first. A missing file is an empty page.
pub async fn read_page(path: &Path, skip: usize, limit: usize) -> Result<Vec<ArchiveRecord>> {
    let records = load_records(path).await?;
    Ok(records.into_iter().skip(skip).take(limit).collect())
}

/// In-memory sink for tests and demos.
pub struct MemorySink {
    cap: usize,
    pub records: std::sync::Mutex<Vec<ArchiveRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_ARCHIVE_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            records: std::sync::Mutex::new(vec![]),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MessageSink for MemorySink {
    async fn persist(&self, item: &NewsItem) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?;
        records.insert(0, ArchiveRecord::from(item));
        records.truncate(self.cap);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: usize) -> NewsItem {
        NewsItem::new("S", format!("2024-01-01 09:00:{:02}", n % 60), format!("story {n}"))
    }

    #[tokio::test]
    async fn file_sink_is_newest_first_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("messages.json");
        let sink = JsonFileSink::open(&path, 3).await;
        for n in 0..5 {
            sink.persist(&item(n)).await.unwrap();
        }
        let page = read_page(&path, 0, 10).await.unwrap();
        let contents: Vec<&str> = page.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["story 4", "story 3", "story 2"]);
        assert_eq!(page[0].id, item(4).identity());
    }

    #[tokio::test]
    async fn file_sink_reopens_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        {
            let sink = JsonFileSink::open(&path, 10).await;
            sink.persist(&item(1)).await.unwrap();
        }
        let sink = JsonFileSink::open(&path, 10).await;
        sink.persist(&item(2)).await.unwrap();
        assert_eq!(sink.len().await, 2);
        let page = read_page(&path, 1, 1).await.unwrap();
        assert_eq!(page[0].content, "story 1");
    }

    #[tokio::test]
    async fn read_page_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let page = read_page(&dir.path().join("none.json"), 0, 100).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn memory_sink_caps() {
        let sink = MemorySink::with_cap(2);
        for n in 0..3 {
            sink.persist(&item(n)).await.unwrap();
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records.lock().unwrap()[0].content, "story 2");
    }
}
