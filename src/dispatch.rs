use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use url::Url;

use crate::config::{EpisodeOffset, SeriesMapping};
use crate::error::GrabError;
use crate::extract::{DownloadStrategy, LatestStrategy, resolve_link};
use crate::fetch::Fetcher;
use crate::formats::{AddLinksRequest, EpisodeRecord};
use crate::forward::LinkSink;
use crate::notify::Notifier;
use crate::store::{EpisodeStore, NewEpisode};

static EPISODE_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{1,3})").expect("episode digits regex"));

/// Where a run was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchingSource,
    ExtractingLatest,
    DedupCheck,
    FetchingEpisodePage,
    ExtractingDownload,
    ResolvingLink,
    Forwarding,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FetchingSource => "fetching source",
            Self::ExtractingLatest => "extracting latest episode",
            Self::DedupCheck => "checking last episode",
            Self::FetchingEpisodePage => "fetching episode page",
            Self::ExtractingDownload => "extracting download link",
            Self::ResolvingLink => "resolving download link",
            Self::Forwarding => "forwarding link",
            Self::Persisting => "recording episode",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Mapping has no source.
    Inert,
    Unchanged { link: String },
    Dispatched { record: EpisodeRecord, link: String },
    Failed { stage: Stage, error: GrabError },
}

#[derive(Debug)]
struct StageError {
    stage: Stage,
    error: GrabError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, GrabError> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

/// Runs one discovery cycle for one series.
///
/// Holds no state between runs; everything durable goes through the store.
pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn LinkSink>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn EpisodeStore>,
    package_name: String,
}

impl Dispatcher {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn LinkSink>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn EpisodeStore>,
        package_name: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            notifier,
            store,
            package_name: package_name.into(),
        }
    }

    /// Never fails: errors are logged and reported to the notifier.
    pub async fn run(&self, mapping: &SeriesMapping) -> RunOutcome {
        let Some(source) = mapping.source.as_deref().filter(|_| !mapping.is_inert()) else {
            tracing::info!(series = %mapping.key, "skipping mapping without source url");
            return RunOutcome::Inert;
        };

        tracing::info!(series = %mapping.key, source, "processing series");
        match self.try_run(mapping, source.trim()).await {
            Ok(RunOutcome::Unchanged { link }) => {
                tracing::info!(series = %mapping.key, %link, "no update (latest link unchanged)");
                self.notifier
                    .notify(&format!("No update for {} (latest link unchanged)", mapping.key))
                    .await;
                RunOutcome::Unchanged { link }
            }
            Ok(outcome) => outcome,
            Err(StageError { stage, error }) => {
                tracing::error!(series = %mapping.key, %stage, kind = error.kind(), %error, "series run failed");
                self.notifier
                    .notify(&format!("{}: {stage} failed: {error}", mapping.key))
                    .await;
                RunOutcome::Failed { stage, error }
            }
        }
    }

    async fn try_run(&self, mapping: &SeriesMapping, source: &str) -> Result<RunOutcome, StageError> {
        let source_url = Url::parse(source)
            .map_err(|err| GrabError::config(format!("invalid source url {source:?}: {err}")))
            .at(Stage::FetchingSource)?;
        let listing = self.fetcher.fetch(source).await.at(Stage::FetchingSource)?;

        let latest = LatestStrategy::from_spec(mapping.extract_latest.as_ref())
            .and_then(|strategy| strategy.extract(&listing, Some(&source_url)))
            .at(Stage::ExtractingLatest)?;
        tracing::debug!(series = %mapping.key, link = %latest.link, title = %latest.title, "latest episode");

        let last = self
            .store
            .last_episode(&mapping.key, mapping.season)
            .await
            .at(Stage::DedupCheck)?;
        if last.is_some_and(|last| last.link == latest.link) {
            return Ok(RunOutcome::Unchanged { link: latest.link });
        }

        let episode_number = parse_episode_number(&latest.title)
            .or_else(|| parse_episode_number(&latest.link))
            .map(|n| apply_offset(n, mapping.episode_offset.as_ref()));

        let episode_page = self
            .fetcher
            .fetch(&latest.link)
            .await
            .at(Stage::FetchingEpisodePage)?;
        let download = DownloadStrategy::for_mapping(mapping)
            .and_then(|strategy| strategy.extract(&episode_page))
            .at(Stage::ExtractingDownload)?;

        let page_url = Url::parse(&latest.link)
            .map_err(|err| GrabError::not_found(format!("episode link {:?}: {err}", latest.link)))
            .at(Stage::ResolvingLink)?;
        let link = resolve_link(&page_url, &download.link).at(Stage::ResolvingLink)?;
        tracing::info!(
            series = %mapping.key,
            episode = ?episode_number,
            host = ?download.host,
            %link,
            "found download"
        );

        self.sink
            .submit(&AddLinksRequest {
                links: vec![link.clone()],
                package_name: Some(self.package_name.clone()),
            })
            .await
            .at(Stage::Forwarding)?;

        let record = self
            .store
            .record(NewEpisode {
                series_key: mapping.key.clone(),
                season: mapping.season,
                episode_number,
                episode_link: latest.link,
                host: download.host,
                quality: download.quality,
            })
            .await
            .at(Stage::Persisting)?;

        Ok(RunOutcome::Dispatched { record, link })
    }
}

/// First run of one to three ASCII digits.
pub fn parse_episode_number(text: &str) -> Option<i64> {
    EPISODE_DIGITS
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

/// Shift numbering for split-cour releases. The result is not re-validated,
/// so it may drop to zero or below.
pub fn apply_offset(number: i64, offset: Option<&EpisodeOffset>) -> i64 {
    match offset {
        Some(EpisodeOffset {
            start,
            subtract: Some(subtract),
        }) if number >= start.unwrap_or(0) => number.saturating_sub(*subtract),
        _ => number,
    }
}
