//! Statically registered extraction plugins.
//!
//! Series refer to a plugin by `module` and `function` name. The table is
//! closed: adding a plugin means adding a function here.

use std::sync::LazyLock;

use regex::Regex;

use super::download::{DownloadLink, DownloadTarget, quality_block};
use super::latest::{LatestEpisode, block_scan};

#[derive(Debug)]
pub struct LatestPlugin {
    pub module: &'static str,
    pub function: &'static str,
    pub run: fn(&str) -> anyhow::Result<LatestEpisode>,
}

#[derive(Debug)]
pub struct DownloadPlugin {
    pub module: &'static str,
    pub function: &'static str,
    pub run: fn(&str, &DownloadTarget) -> anyhow::Result<DownloadLink>,
}

static LATEST_PLUGINS: &[LatestPlugin] = &[
    LatestPlugin {
        module: "builtin",
        function: "latest_block_scan",
        run: latest_block_scan,
    },
    LatestPlugin {
        module: "builtin",
        function: "latest_episode_href",
        run: latest_episode_href,
    },
];

static DOWNLOAD_PLUGINS: &[DownloadPlugin] = &[
    DownloadPlugin {
        module: "builtin",
        function: "download_quality_block",
        run: download_quality_block,
    },
    DownloadPlugin {
        module: "builtin",
        function: "download_href",
        run: download_href,
    },
];

pub fn latest(module: &str, function: &str) -> Option<&'static LatestPlugin> {
    LATEST_PLUGINS
        .iter()
        .find(|p| p.module == module && p.function == function)
}

pub fn download(module: &str, function: &str) -> Option<&'static DownloadPlugin> {
    DOWNLOAD_PLUGINS
        .iter()
        .find(|p| p.module == module && p.function == function)
}

/// `module.function` names of every registered plugin, latest first.
pub fn registered() -> impl Iterator<Item = String> {
    LATEST_PLUGINS
        .iter()
        .map(|p| format!("{}.{} (latest)", p.module, p.function))
        .chain(
            DOWNLOAD_PLUGINS
                .iter()
                .map(|p| format!("{}.{} (download)", p.module, p.function)),
        )
}

static EPISODE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s+href="([^"]*episode[^"]*)"[^>]*>([^<]+)</a>"#)
        .expect("episode href regex")
});

static DOWNLOAD_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s+href="([^"]*download[^"]*)"[^>]*>([^<]*)</a>"#)
        .expect("download href regex")
});

fn latest_block_scan(html: &str) -> anyhow::Result<LatestEpisode> {
    Ok(block_scan(html)?)
}

/// First anchor whose href mentions "episode".
fn latest_episode_href(html: &str) -> anyhow::Result<LatestEpisode> {
    let caps = EPISODE_HREF
        .captures(html)
        .ok_or_else(|| anyhow::anyhow!("no anchor with an episode href"))?;
    Ok(LatestEpisode {
        link: caps[1].to_owned(),
        title: caps[2].trim().to_owned(),
    })
}

fn download_quality_block(html: &str, target: &DownloadTarget) -> anyhow::Result<DownloadLink> {
    Ok(quality_block(html, target)?)
}

/// First anchor whose href mentions "download".
fn download_href(html: &str, target: &DownloadTarget) -> anyhow::Result<DownloadLink> {
    let caps = DOWNLOAD_HREF
        .captures(html)
        .ok_or_else(|| anyhow::anyhow!("no anchor with a download href"))?;
    Ok(DownloadLink {
        link: caps[1].to_owned(),
        host: Some("CustomHost".to_owned()),
        quality: Some(target.quality.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_exact() {
        assert!(latest("builtin", "latest_episode_href").is_some());
        assert!(latest("builtin", "download_href").is_none());
        assert!(download("builtin", "download_href").is_some());
        assert!(download("Builtin", "download_href").is_none());
        assert_eq!(registered().count(), 4);
    }

    #[test]
    fn download_href_reports_custom_host() -> anyhow::Result<()> {
        let target = DownloadTarget {
            quality: "720p".to_owned(),
            host_priority: Vec::new(),
        };
        let found = download_href(
            r#"<a href="/watch">Watch</a><a href="/download/ep-3.mp4">Get it</a>"#,
            &target,
        )?;
        assert_eq!(found.link, "/download/ep-3.mp4");
        assert_eq!(found.host.as_deref(), Some("CustomHost"));
        assert_eq!(found.quality.as_deref(), Some("720p"));
        Ok(())
    }
}
