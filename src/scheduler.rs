use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, SeriesMapping};
use crate::dispatch::Dispatcher;
use crate::schedule::{Cadence, delay_for};

/// Source of "now" for cadence computation.
pub type Clock = fn() -> NaiveDateTime;

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Drives dispatcher runs on independent timelines.
///
/// Every mapping with its own `schedule` gets a dedicated task; the remaining
/// mappings share one task driven by the top-level schedule. Runs inside a
/// timeline are sequential; timelines run concurrently.
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    shared_cadence: Option<Cadence>,
    scheduled: Vec<SeriesMapping>,
    shared: Vec<SeriesMapping>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &Config) -> Self {
        let (scheduled, shared): (Vec<_>, Vec<_>) = config
            .mappings
            .iter()
            .cloned()
            .partition(|m| m.schedule.is_some());

        let scheduled = scheduled
            .into_iter()
            .filter(|m| {
                if m.is_inert() {
                    tracing::info!(series = %m.key, "not scheduling mapping without source url");
                }
                !m.is_inert()
            })
            .collect();

        Self {
            dispatcher,
            shared_cadence: config.schedule.clone(),
            scheduled,
            shared,
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run until every timeline finishes or `shutdown` fires.
    ///
    /// Only the shared timeline without a cadence finishes on its own. After
    /// shutdown, timelines stop waiting at once; a run already in progress
    /// completes first.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut timelines = JoinSet::new();

        for mapping in self.scheduled {
            let Some(cadence) = mapping.schedule.clone() else {
                continue;
            };
            tracing::info!(series = %mapping.key, %cadence, "starting series timeline");
            timelines.spawn(series_timeline(
                Arc::clone(&self.dispatcher),
                mapping,
                cadence,
                self.clock,
                shutdown.clone(),
            ));
        }

        timelines.spawn(shared_timeline(
            Arc::clone(&self.dispatcher),
            self.shared,
            self.shared_cadence,
            self.clock,
            shutdown.clone(),
        ));

        while let Some(joined) = timelines.join_next().await {
            if let Err(err) = joined {
                tracing::error!(?err, "timeline task aborted");
            }
        }
        tracing::info!("all timelines stopped");
    }
}

async fn series_timeline(
    dispatcher: Arc<Dispatcher>,
    mapping: SeriesMapping,
    cadence: Cadence,
    clock: Clock,
    shutdown: CancellationToken,
) {
    loop {
        let delay = cadence.delay_from(clock());
        tracing::info!(series = %mapping.key, secs = delay.as_secs(), "next run scheduled");
        if !wait(delay, &shutdown).await {
            tracing::debug!(series = %mapping.key, "series timeline stopping");
            return;
        }
        dispatcher.run(&mapping).await;
    }
}

async fn shared_timeline(
    dispatcher: Arc<Dispatcher>,
    mappings: Vec<SeriesMapping>,
    cadence: Option<Cadence>,
    clock: Clock,
    shutdown: CancellationToken,
) {
    let Some(cadence) = cadence else {
        tracing::info!("no schedule configured; running once");
        run_all(&dispatcher, &mappings, &shutdown).await;
        return;
    };

    tracing::info!(%cadence, series = mappings.len(), "starting shared timeline");
    loop {
        let delay = delay_for(Some(&cadence), clock());
        tracing::info!(secs = delay.as_secs(), "next shared run scheduled");
        if !wait(delay, &shutdown).await {
            tracing::debug!("shared timeline stopping");
            return;
        }
        run_all(&dispatcher, &mappings, &shutdown).await;
    }
}

/// Run each mapping once, in order, until shutdown.
pub async fn run_all(
    dispatcher: &Dispatcher,
    mappings: &[SeriesMapping],
    shutdown: &CancellationToken,
) {
    for mapping in mappings {
        if shutdown.is_cancelled() {
            return;
        }
        dispatcher.run(mapping).await;
    }
}

/// Sleep for `delay`. Returns false if shutdown fired first.
async fn wait(delay: Duration, shutdown: &CancellationToken) -> bool {
    if shutdown.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::error::GrabError;
    use crate::fetch::Fetcher;
    use crate::formats::AddLinksRequest;
    use crate::forward::LinkSink;
    use crate::notify::Notifier;
    use crate::store::{EpisodeStore, JsonlEpisodeStore};

    #[derive(Default)]
    struct CountingFetcher {
        calls: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<String, GrabError> {
            *self
                .calls
                .lock()
                .expect("calls lock")
                .entry(url.to_owned())
                .or_default() += 1;
            Err(GrabError::Fetch {
                url: url.to_owned(),
                status: None,
                message: "offline".to_owned(),
            })
        }
    }

    struct NullSink;

    #[async_trait]
    impl LinkSink for NullSink {
        async fn submit(&self, _request: &AddLinksRequest) -> Result<(), GrabError> {
            Ok(())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _message: &str) {}
    }

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 5)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .expect("valid timestamp")
    }

    async fn dispatcher(
        fetcher: Arc<CountingFetcher>,
        dir: &tempfile::TempDir,
    ) -> anyhow::Result<Arc<Dispatcher>> {
        let store: Arc<dyn EpisodeStore> =
            Arc::new(JsonlEpisodeStore::open(dir.path().join("episodes.jsonl")).await?);
        Ok(Arc::new(Dispatcher::new(
            fetcher,
            Arc::new(NullSink),
            Arc::new(NullNotifier),
            store,
            "anime",
        )))
    }

    fn calls(fetcher: &CountingFetcher, url: &str) -> usize {
        fetcher
            .calls
            .lock()
            .expect("calls lock")
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn without_top_level_schedule_shared_timeline_runs_once_and_ends() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(CountingFetcher::default());
        let config = Config::from_yaml(
            r#"
mappings:
  - key: a
    source: https://a.test/list
  - key: b
    source: https://b.test/list
  - key: inert
"#,
        )?;

        let scheduler = Scheduler::new(dispatcher(Arc::clone(&fetcher), &dir).await?, &config);
        tokio::time::timeout(Duration::from_secs(5), scheduler.run(CancellationToken::new()))
            .await?;

        assert_eq!(calls(&fetcher, "https://a.test/list"), 1);
        assert_eq!(calls(&fetcher, "https://b.test/list"), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn series_timelines_repeat_independently_until_shutdown() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(CountingFetcher::default());
        let config = Config::from_yaml(
            r#"
mappings:
  - key: fast
    source: https://fast.test/list
    schedule: { type: interval, minutes: 10 }
  - key: slow
    source: https://slow.test/list
    schedule: { type: interval, hours: 1 }
  - key: shared
    source: https://shared.test/list
"#,
        )?;

        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(dispatcher(Arc::clone(&fetcher), &dir).await?, &config)
            .with_clock(fixed_clock);
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(65 * 60)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await??;

        assert_eq!(calls(&fetcher, "https://fast.test/list"), 6);
        assert_eq!(calls(&fetcher, "https://slow.test/list"), 1);
        assert_eq!(calls(&fetcher, "https://shared.test/list"), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shared_timeline_waits_for_its_cadence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(CountingFetcher::default());
        let config = Config::from_yaml(
            r#"
schedule: { type: daily, time: "09:00" }
mappings:
  - key: a
    source: https://a.test/list
"#,
        )?;

        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(dispatcher(Arc::clone(&fetcher), &dir).await?, &config)
            .with_clock(fixed_clock);
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert_eq!(calls(&fetcher, "https://a.test/list"), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls(&fetcher, "https://a.test/list"), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await??;
        Ok(())
    }

    #[tokio::test]
    async fn wait_returns_early_on_shutdown() {
        let shutdown = CancellationToken::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { wait(Duration::from_secs(3600), &shutdown).await })
        };
        shutdown.cancel();
        let finished = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait observes shutdown")
            .expect("join");
        assert!(!finished);
    }
}
