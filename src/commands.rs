use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::cli::{HistoryArgs, OnceArgs};
use crate::config::{Config, SeriesMapping};
use crate::dispatch::Dispatcher;
use crate::extract::{DownloadStrategy, LatestStrategy, plugins};
use crate::fetch::HttpFetcher;
use crate::forward::HttpLinkSink;
use crate::notify;
use crate::schedule::Cadence;
use crate::scheduler::{Scheduler, local_now, run_all};
use crate::store::{EpisodeStore, JsonlEpisodeStore};

async fn build_dispatcher(config: &Config) -> anyhow::Result<Arc<Dispatcher>> {
    let fetcher = HttpFetcher::new(&config.fetch).context("build fetcher")?;
    let sink = HttpLinkSink::new(config.api_add_url.clone()).context("build link sink")?;
    let notifier = notify::from_webhook(config.discord_webhook.as_deref())
        .context("build notifier")?;
    let store = JsonlEpisodeStore::open(&config.store_path)
        .await
        .context("open episode store")?;
    tracing::info!(path = %store.path().display(), "episode store ready");

    Ok(Arc::new(Dispatcher::new(
        Arc::new(fetcher),
        Arc::new(sink),
        notifier,
        Arc::new(store),
        config.package_name.clone(),
    )))
}

/// Start every timeline; return once they all end or Ctrl-C arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(&config).await?;
    let shutdown = CancellationToken::new();

    let timelines = Scheduler::new(dispatcher, &config).run(shutdown.clone());
    tokio::pin!(timelines);

    tokio::select! {
        () = &mut timelines => return Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            tracing::info!("shutdown requested; waiting for in-flight runs");
            shutdown.cancel();
        }
    }

    timelines.await;
    Ok(())
}

pub async fn once(config: Config, args: OnceArgs) -> anyhow::Result<()> {
    let mappings: Vec<SeriesMapping> = match args.series.as_deref() {
        Some(key) => vec![
            config
                .mapping(key)
                .cloned()
                .with_context(|| format!("no mapping with key {key:?}"))?,
        ],
        None => config.mappings.clone(),
    };

    let dispatcher = build_dispatcher(&config).await?;
    run_all(&dispatcher, &mappings, &CancellationToken::new()).await;
    Ok(())
}

/// Print what every mapping resolves to. Fails if any strategy is unusable.
pub fn check(config: &Config) -> anyhow::Result<()> {
    let now = local_now();
    let mut invalid = 0usize;

    for mapping in &config.mappings {
        if mapping.is_inert() {
            println!("{}: inert (no source)", mapping.key);
            continue;
        }

        let latest = LatestStrategy::from_spec(mapping.extract_latest.as_ref())
            .map(|s| describe_latest(&s));
        let download = DownloadStrategy::for_mapping(mapping).map(|s| describe_download(&s));
        let timeline = match (&mapping.schedule, &config.schedule) {
            (Some(cadence), _) => next_run(cadence, now),
            (None, Some(cadence)) => format!("shared, {}", next_run(cadence, now)),
            (None, None) => "shared, once at start".to_owned(),
        };

        match (latest, download) {
            (Ok(latest), Ok(download)) => {
                println!(
                    "{}: latest={latest} download={download} [{timeline}]",
                    mapping.key
                );
            }
            (latest, download) => {
                invalid += 1;
                for err in [latest.err(), download.err()].into_iter().flatten() {
                    println!("{}: invalid: {err}", mapping.key);
                }
            }
        }
    }

    println!("plugins:");
    for name in plugins::registered() {
        println!("  {name}");
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} mapping(s) have unusable extraction settings");
    }
    Ok(())
}

pub async fn history(config: &Config, args: HistoryArgs) -> anyhow::Result<()> {
    let store = JsonlEpisodeStore::open(&config.store_path)
        .await
        .context("open episode store")?;
    let records = store.history(args.series.as_deref()).await?;

    let skip = args
        .limit
        .map_or(0, |limit| records.len().saturating_sub(limit));
    for record in records.iter().skip(skip) {
        println!("{}", serde_json::to_string(record).context("serialize record")?);
    }
    Ok(())
}

fn describe_latest(strategy: &LatestStrategy) -> String {
    match strategy {
        LatestStrategy::BlockScan => "block_scan".to_owned(),
        LatestStrategy::Template { regex, .. } => format!("template({})", regex.as_str()),
        LatestStrategy::Plugin(plugin) => format!("plugin({}.{})", plugin.module, plugin.function),
    }
}

fn describe_download(strategy: &DownloadStrategy) -> String {
    match strategy {
        DownloadStrategy::QualityBlock(target) => format!(
            "quality_block({} via {})",
            target.quality,
            target.host_priority.join(">")
        ),
        DownloadStrategy::Template { regex, quality, .. } => {
            format!("template({}, {quality})", regex.as_str())
        }
        DownloadStrategy::Plugin { plugin, .. } => {
            format!("plugin({}.{})", plugin.module, plugin.function)
        }
    }
}

fn next_run(cadence: &Cadence, now: chrono::NaiveDateTime) -> String {
    format!("{cadence}, next in {}", format_delay(cadence.delay_from(now)))
}

fn format_delay(delay: Duration) -> String {
    let minutes = delay.as_secs().div_ceil(60);
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}
