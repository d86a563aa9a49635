use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::plugins::{self, LatestPlugin};
use super::{capture, check_group, compile_template, resolve_link};
use crate::config::{LatestSpec, TemplateSpec};
use crate::error::GrabError;

static EPISODE_LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<div[^>]*class="smokelister"[^>]*>\s*<span[^>]*class="monktit"[^>]*>[^<]*episode list[^<]*"#,
    )
    .expect("episode list marker regex")
});

static FIRST_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<ul>([\s\S]*?)</ul>").expect("list regex"));

static LIST_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s+href="([^"]+)"[^>]*>([^<]+)</a>"#).expect("list anchor regex")
});

static FALLBACK_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s+href="([^"]+)"[^>]*>([^<]*episode[^<]*|[^<]*\d{1,3}[^<]*)</a>"#)
        .expect("fallback anchor regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestEpisode {
    pub link: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub enum LatestStrategy {
    BlockScan,
    Template {
        regex: Regex,
        link_group: Option<usize>,
        title_group: Option<usize>,
    },
    Plugin(&'static LatestPlugin),
}

impl LatestStrategy {
    pub fn from_spec(spec: Option<&LatestSpec>) -> Result<Self, GrabError> {
        match spec {
            None | Some(LatestSpec::BlockScan) => Ok(Self::BlockScan),
            Some(LatestSpec::Template(TemplateSpec {
                pattern,
                link_group,
                title_group,
            })) => {
                let regex = compile_template(pattern)?;
                check_group(&regex, *link_group, "link")?;
                check_group(&regex, *title_group, "title")?;
                Ok(Self::Template {
                    regex,
                    link_group: *link_group,
                    title_group: *title_group,
                })
            }
            Some(LatestSpec::Invalid(reason)) => {
                Err(GrabError::config(format!("extract_latest: {reason}")))
            }
            Some(LatestSpec::Plugin(spec)) => plugins::latest(&spec.module, &spec.function)
                .map(Self::Plugin)
                .ok_or_else(|| {
                    GrabError::config(format!(
                        "unknown latest-episode plugin {}.{}",
                        spec.module, spec.function
                    ))
                }),
        }
    }

    /// Find the newest episode on a listing page.
    ///
    /// When `base` is given the returned link is absolute.
    pub fn extract(&self, html: &str, base: Option<&Url>) -> Result<LatestEpisode, GrabError> {
        let found = match self {
            Self::BlockScan => block_scan(html)?,
            Self::Template {
                regex,
                link_group,
                title_group,
            } => {
                let caps = regex
                    .captures(html)
                    .ok_or_else(|| GrabError::not_found("latest-episode template did not match"))?;
                let link = capture(&caps, *link_group, "link", 1)
                    .ok_or_else(|| GrabError::not_found("latest-episode template matched without a link"))?;
                let title = capture(&caps, *title_group, "title", 2).unwrap_or_default();
                LatestEpisode {
                    link: link.to_owned(),
                    title: title.trim().to_owned(),
                }
            }
            Self::Plugin(plugin) => (plugin.run)(html).map_err(|err| {
                GrabError::not_found(format!("plugin {}.{} failed: {err:#}", plugin.module, plugin.function))
            })?,
        };

        match base {
            Some(base) => Ok(LatestEpisode {
                link: resolve_link(base, &found.link)?,
                title: found.title,
            }),
            None => Ok(found),
        }
    }
}

/// Episode-list block heuristic with a first-anchor fallback.
pub fn block_scan(html: &str) -> Result<LatestEpisode, GrabError> {
    if let Some(marker) = EPISODE_LIST_MARKER.find(html)
        && let Some(list) = FIRST_LIST.captures(&html[marker.start()..])
        && let Some(item) = LIST_ANCHOR.captures(&list[1])
    {
        return Ok(LatestEpisode {
            link: item[1].to_owned(),
            title: item[2].trim().to_owned(),
        });
    }

    FALLBACK_ANCHOR
        .captures(html)
        .map(|caps| LatestEpisode {
            link: caps[1].to_owned(),
            title: caps[2].trim().to_owned(),
        })
        .ok_or_else(|| GrabError::not_found("latest episode block not found"))
}
