use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::GrabError;
use crate::formats::EpisodeRecord;

/// Stored when the episode number could not be parsed.
pub const UNKNOWN_EPISODE: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEpisode {
    pub link: String,
    pub episode_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEpisode {
    pub series_key: String,
    pub season: Option<i64>,
    pub episode_number: Option<i64>,
    pub episode_link: String,
    pub host: Option<String>,
    pub quality: Option<String>,
}

#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Most recently recorded episode for the series and season.
    async fn last_episode(
        &self,
        series_key: &str,
        season: Option<i64>,
    ) -> Result<Option<LastEpisode>, GrabError>;

    /// Append a record. Never updates an existing one.
    async fn record(&self, episode: NewEpisode) -> Result<EpisodeRecord, GrabError>;

    /// Records in append order, optionally for one series.
    async fn history(&self, series_key: Option<&str>) -> Result<Vec<EpisodeRecord>, GrabError>;
}

type SeriesSeason = (String, Option<i64>);

#[derive(Debug, Default)]
struct Index {
    next_id: u64,
    /// Log bytes already folded in. Always at a line boundary.
    consumed: u64,
    latest: HashMap<SeriesSeason, LastEpisode>,
}

impl Index {
    fn empty() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    fn observe(&mut self, record: &EpisodeRecord) {
        self.next_id = self.next_id.max(record.id + 1);
        self.latest.insert(
            (record.series_key.clone(), record.season),
            LastEpisode {
                link: record.episode_link.clone(),
                episode_number: record.episode_number,
            },
        );
    }

    fn apply(&mut self, tail: Tail) {
        if tail.reset {
            *self = Self::empty();
        }
        for record in &tail.records {
            self.observe(record);
        }
        self.consumed = tail.end;
    }
}

/// Complete lines found past the indexed part of the log.
#[derive(Debug, Default)]
struct Tail {
    /// The log shrank, so the index must be rebuilt from these records.
    reset: bool,
    records: Vec<EpisodeRecord>,
    end: u64,
}

/// Append-only JSON Lines log.
///
/// Every append runs under an exclusive lock on the log file and first folds
/// in whatever other handles or processes appended since, so ids stay unique
/// and increasing across writers. A failed append is cut back off the file.
/// Lookups are served from an in-memory index of the newest row per key,
/// refreshed from disk when the log has grown.
#[derive(Debug)]
pub struct JsonlEpisodeStore {
    path: PathBuf,
    index: RwLock<Index>,
}

impl JsonlEpisodeStore {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create store dir: {}", parent.display()))?;
        }

        let store = Self {
            path,
            index: RwLock::new(Index::empty()),
        };
        {
            let mut index = store.index.write().await;
            store
                .refresh(&mut index)
                .await
                .with_context(|| format!("read episode log: {}", store.path.display()))?;
            tracing::debug!(
                path = %store.path.display(),
                next_id = index.next_id,
                "opened episode store"
            );
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn is_stale(&self, consumed: u64) -> Result<bool, GrabError> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len() != consumed),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(consumed != 0),
            Err(err) => Err(err.into()),
        }
    }

    async fn refresh(&self, index: &mut Index) -> Result<(), GrabError> {
        let path = self.path.clone();
        let consumed = index.consumed;
        let tail = tokio::task::spawn_blocking(move || read_shared(&path, consumed))
            .await
            .map_err(|err| GrabError::Store(format!("read task: {err}")))??;
        index.apply(tail);
        Ok(())
    }
}

#[async_trait]
impl EpisodeStore for JsonlEpisodeStore {
    async fn last_episode(
        &self,
        series_key: &str,
        season: Option<i64>,
    ) -> Result<Option<LastEpisode>, GrabError> {
        let key = (series_key.to_owned(), season);
        {
            let index = self.index.read().await;
            if !self.is_stale(index.consumed).await? {
                return Ok(index.latest.get(&key).cloned());
            }
        }

        let mut index = self.index.write().await;
        self.refresh(&mut index).await?;
        Ok(index.latest.get(&key).cloned())
    }

    async fn record(&self, episode: NewEpisode) -> Result<EpisodeRecord, GrabError> {
        let mut index = self.index.write().await;

        let path = self.path.clone();
        let (next_id, consumed) = (index.next_id, index.consumed);
        let appended =
            tokio::task::spawn_blocking(move || append_locked(&path, next_id, consumed, episode))
                .await
                .map_err(|err| GrabError::Store(format!("append task: {err}")))??;

        index.apply(appended.tail);
        appended.written
    }

    async fn history(&self, series_key: Option<&str>) -> Result<Vec<EpisodeRecord>, GrabError> {
        let path = self.path.clone();
        let tail = tokio::task::spawn_blocking(move || read_shared(&path, 0))
            .await
            .map_err(|err| GrabError::Store(format!("read task: {err}")))??;
        Ok(tail
            .records
            .into_iter()
            .filter(|r| series_key.is_none_or(|key| r.series_key == key))
            .collect())
    }
}

/// Result of one locked append: what other writers added, plus our own line.
struct Appended {
    tail: Tail,
    written: Result<EpisodeRecord, GrabError>,
}

fn read_shared(path: &Path, from: u64) -> Result<Tail, GrabError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(Tail {
                reset: from != 0,
                ..Tail::default()
            });
        }
        Err(err) => return Err(err.into()),
    };
    file.lock_shared()?;
    read_tail(&mut file, path, from)
}

fn append_locked(
    path: &Path,
    next_id: u64,
    consumed: u64,
    episode: NewEpisode,
) -> Result<Appended, GrabError> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;
    file.lock()?;

    let mut tail = read_tail(&mut file, path, consumed)?;
    let len_before = file.metadata()?.len();

    let next_id = tail
        .records
        .iter()
        .map(|r| r.id + 1)
        .fold(if tail.reset { 1 } else { next_id }, u64::max);
    let record = EpisodeRecord {
        id: next_id,
        series_key: episode.series_key,
        season: episode.season,
        episode_number: episode.episode_number.unwrap_or(UNKNOWN_EPISODE),
        episode_link: episode.episode_link,
        host: episode.host,
        quality: episode.quality,
        retrieved_at: Utc::now(),
    };

    let mut line = Vec::new();
    // Bytes after the last newline are a torn write; start a fresh line.
    if len_before > tail.end {
        tracing::warn!(
            path = %path.display(),
            bytes = len_before - tail.end,
            "terminating torn episode record"
        );
        line.push(b'\n');
    }
    serde_json::to_writer(&mut line, &record)
        .map_err(|err| GrabError::Store(format!("serialize record: {err}")))?;
    line.push(b'\n');

    if let Err(err) = file.write_all(&line).and_then(|()| file.sync_data()) {
        if let Err(cut) = file.set_len(len_before) {
            tracing::error!(path = %path.display(), %cut, "failed to roll back partial append");
        }
        return Ok(Appended {
            tail,
            written: Err(err.into()),
        });
    }

    tail.end = len_before + line.len() as u64;
    tail.records.push(record.clone());
    Ok(Appended {
        tail,
        written: Ok(record),
    })
}

/// Parse complete lines from `from` on. A trailing line without a newline is
/// left for the next reader.
fn read_tail(file: &mut File, path: &Path, from: u64) -> Result<Tail, GrabError> {
    let len = file.metadata()?.len();
    let (reset, from) = if len < from { (true, 0) } else { (false, from) };

    file.seek(SeekFrom::Start(from))?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;
    let complete = raw.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);

    let mut records = Vec::new();
    for line in raw[..complete].split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<EpisodeRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "skipping unreadable episode record");
            }
        }
    }

    Ok(Tail {
        reset,
        records,
        end: from + complete as u64,
    })
}
