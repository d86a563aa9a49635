//! Extraction strategies that turn listing and episode pages into links.
//!
//! Each purpose (latest episode, download link) has a default heuristic tuned to
//! one page layout, a regex template variant, and a statically registered
//! plugin variant. Specs are compiled into a strategy once per run.

mod download;
mod latest;
pub mod plugins;

use regex::{Captures, Regex, RegexBuilder};
use url::Url;

use crate::error::GrabError;

pub use download::{DownloadLink, DownloadStrategy, DownloadTarget, quality_block};
pub use latest::{LatestEpisode, LatestStrategy, block_scan};

/// Resolve `href` against `base` as a relative reference.
pub fn resolve_link(base: &Url, href: &str) -> Result<String, GrabError> {
    base.join(href.trim())
        .map(|url| url.to_string())
        .map_err(|err| GrabError::not_found(format!("cannot resolve link {href:?} against {base}: {err}")))
}

fn compile_template(pattern: &str) -> Result<Regex, GrabError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| GrabError::config(format!("invalid template pattern: {err}")))
}

fn check_group(regex: &Regex, group: Option<usize>, what: &str) -> Result<(), GrabError> {
    match group {
        Some(index) if index >= regex.captures_len() => Err(GrabError::config(format!(
            "{what}_group {index} out of range; pattern has {} groups",
            regex.captures_len() - 1
        ))),
        _ => Ok(()),
    }
}

/// Explicit index, then a group named `name`, then `fallback`.
fn capture<'h>(
    caps: &Captures<'h>,
    explicit: Option<usize>,
    name: &str,
    fallback: usize,
) -> Option<&'h str> {
    let m = match explicit {
        Some(index) => caps.get(index),
        None => caps.name(name).or_else(|| caps.get(fallback)),
    };
    m.map(|m| m.as_str())
}
