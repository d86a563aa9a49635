use regex::{Regex, RegexBuilder};

use super::plugins::{self, DownloadPlugin};
use super::{capture, check_group, compile_template};
use crate::config::{
    DEFAULT_HOST_PRIORITY, DEFAULT_QUALITY, DownloadSpec, DownloadTemplateSpec, SeriesMapping,
};
use crate::error::GrabError;

/// Bytes scanned after the quality marker when no list boundary follows it.
const FALLBACK_WINDOW: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub link: String,
    pub host: Option<String>,
    pub quality: Option<String>,
}

/// Quality and host preference a download is searched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub quality: String,
    pub host_priority: Vec<String>,
}

impl DownloadTarget {
    /// Series-level preference, falling back to the global defaults.
    pub fn for_mapping(mapping: &SeriesMapping) -> Self {
        let quality = mapping
            .target_quality
            .clone()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUALITY.to_owned());
        let host_priority = if mapping.host_priority.is_empty() {
            DEFAULT_HOST_PRIORITY.iter().map(|h| (*h).to_owned()).collect()
        } else {
            mapping.host_priority.clone()
        };
        Self {
            quality,
            host_priority,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DownloadStrategy {
    QualityBlock(DownloadTarget),
    Template {
        regex: Regex,
        link_group: Option<usize>,
        host: Option<String>,
        quality: String,
    },
    Plugin {
        plugin: &'static DownloadPlugin,
        target: DownloadTarget,
    },
}

impl DownloadStrategy {
    pub fn for_mapping(mapping: &SeriesMapping) -> Result<Self, GrabError> {
        let target = DownloadTarget::for_mapping(mapping);
        match &mapping.extract_download {
            None => Ok(Self::QualityBlock(target)),
            Some(DownloadSpec::QualityBlock {
                quality,
                host_priority,
            }) => Ok(Self::QualityBlock(DownloadTarget {
                quality: quality.clone().unwrap_or(target.quality),
                host_priority: host_priority
                    .clone()
                    .filter(|hosts| !hosts.is_empty())
                    .unwrap_or(target.host_priority),
            })),
            Some(DownloadSpec::Template(DownloadTemplateSpec {
                pattern,
                link_group,
                host,
                quality,
            })) => {
                let regex = compile_template(pattern)?;
                check_group(&regex, *link_group, "link")?;
                Ok(Self::Template {
                    regex,
                    link_group: *link_group,
                    host: host.clone(),
                    quality: quality.clone().unwrap_or(target.quality),
                })
            }
            Some(DownloadSpec::Invalid(reason)) => {
                Err(GrabError::config(format!("extract_download: {reason}")))
            }
            Some(DownloadSpec::Plugin(spec)) => plugins::download(&spec.module, &spec.function)
                .map(|plugin| Self::Plugin { plugin, target })
                .ok_or_else(|| {
                    GrabError::config(format!(
                        "unknown download plugin {}.{}",
                        spec.module, spec.function
                    ))
                }),
        }
    }

    /// Find the download link on an episode page. The link is returned as
    /// written in the page; callers resolve it against the page URL.
    pub fn extract(&self, html: &str) -> Result<DownloadLink, GrabError> {
        match self {
            Self::QualityBlock(target) => quality_block(html, target),
            Self::Template {
                regex,
                link_group,
                host,
                quality,
            } => {
                let caps = regex
                    .captures(html)
                    .ok_or_else(|| GrabError::not_found("download template did not match"))?;
                let link = capture(&caps, *link_group, "link", 1)
                    .ok_or_else(|| GrabError::not_found("download template matched without a link"))?;
                Ok(DownloadLink {
                    link: link.to_owned(),
                    host: host.clone(),
                    quality: Some(quality.clone()),
                })
            }
            Self::Plugin { plugin, target } => (plugin.run)(html, target).map_err(|err| {
                GrabError::not_found(format!(
                    "plugin {}.{} failed: {err:#}",
                    plugin.module, plugin.function
                ))
            }),
        }
    }
}

/// Quality-marker block heuristic.
///
/// The block runs from the `<strong>mp4|mkv QUALITY</strong>` marker to the
/// nearer of the next `</li>` or `</ul>`, or a fixed window when neither
/// follows. Hosts are tried in priority order; the first one with an anchor
/// in the block wins, wherever it sits in the HTML.
pub fn quality_block(html: &str, target: &DownloadTarget) -> Result<DownloadLink, GrabError> {
    let marker = build_regex(&format!(
        r"<strong>\s*(?:mp4|mkv)\s*{}\s*</strong>",
        regex::escape(&target.quality)
    ))?;
    let start = marker
        .find(html)
        .ok_or_else(|| {
            GrabError::not_found(format!("section for quality {} not found", target.quality))
        })?
        .start();

    let block = &html[start..block_end(html, start)];

    for host in &target.host_priority {
        let anchor = build_regex(&format!(
            r#"<a[^>]+href="([^"]+)"[^>]*>\s*{}\s*</a>"#,
            regex::escape(host)
        ))?;
        if let Some(caps) = anchor.captures(block) {
            return Ok(DownloadLink {
                link: caps[1].to_owned(),
                host: Some(host.clone()),
                quality: Some(target.quality.clone()),
            });
        }
    }

    Err(GrabError::not_found(format!(
        "no hosts from priority list found for quality {}",
        target.quality
    )))
}

fn block_end(html: &str, start: usize) -> usize {
    let rest = &html[start..];
    let li_end = rest.find("</li>");
    let ul_end = rest.find("</ul>");
    match (li_end, ul_end) {
        (Some(li), Some(ul)) => start + li.min(ul),
        (Some(end), None) | (None, Some(end)) => start + end,
        (None, None) => {
            let mut end = (start + FALLBACK_WINDOW).min(html.len());
            while !html.is_char_boundary(end) {
                end -= 1;
            }
            end
        }
    }
}

fn build_regex(pattern: &str) -> Result<Regex, GrabError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| GrabError::config(format!("build download matcher: {err}")))
}
