use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use crate::schedule::Cadence;

pub const DEFAULT_QUALITY: &str = "1080p";
pub const DEFAULT_HOST_PRIORITY: &[&str] = &["Pdrain", "Mega", "Acefile", "GoFile", "KFiles", "ODFiles"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mappings: Vec<SeriesMapping>,

    /// Cadence of the shared timeline. Absent means "run once, then stop".
    #[serde(default, alias = "scheduler")]
    pub schedule: Option<Cadence>,

    #[serde(default)]
    pub discord_webhook: Option<String>,

    #[serde(default = "default_api_add_url")]
    pub api_add_url: String,

    #[serde(default = "default_package_name")]
    pub package_name: String,

    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One tracked series.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesMapping {
    #[serde(alias = "anime_key")]
    pub key: String,

    #[serde(default)]
    pub season: Option<i64>,

    /// Listing page. A mapping without one is inert.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub extract_latest: Option<LatestSpec>,

    #[serde(default)]
    pub extract_download: Option<DownloadSpec>,

    #[serde(default)]
    pub episode_offset: Option<EpisodeOffset>,

    #[serde(default)]
    pub host_priority: Vec<String>,

    #[serde(default)]
    pub target_quality: Option<String>,

    #[serde(default, alias = "scheduler")]
    pub schedule: Option<Cadence>,
}

impl SeriesMapping {
    pub fn is_inert(&self) -> bool {
        self.source.as_deref().is_none_or(|s| s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct EpisodeOffset {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub subtract: Option<i64>,
}

/// How the newest episode is found on a listing page.
///
/// A block without `type` is a template. Settings that do not parse are kept
/// as `Invalid` so only the owning series fails, when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "serde_yaml::Value")]
pub enum LatestSpec {
    BlockScan,
    Template(TemplateSpec),
    Plugin(PluginSpec),
    Invalid(String),
}

/// How the download link is found on an episode page. A block without
/// `type` is a quality block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "serde_yaml::Value")]
pub enum DownloadSpec {
    QualityBlock {
        quality: Option<String>,
        host_priority: Option<Vec<String>>,
    },
    Template(DownloadTemplateSpec),
    Plugin(PluginSpec),
    Invalid(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedLatest {
    #[serde(alias = "smokelister")]
    BlockScan,
    #[serde(alias = "regex")]
    Template(TemplateSpec),
    #[serde(alias = "function")]
    Plugin(PluginSpec),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedDownload {
    #[serde(alias = "block_scan")]
    QualityBlock {
        #[serde(default)]
        quality: Option<String>,
        #[serde(default)]
        host_priority: Option<Vec<String>>,
    },
    #[serde(alias = "regex")]
    Template(DownloadTemplateSpec),
    #[serde(alias = "function")]
    Plugin(PluginSpec),
}

impl From<serde_yaml::Value> for LatestSpec {
    fn from(value: serde_yaml::Value) -> Self {
        let Some(value) = with_default_type(value, "template") else {
            return Self::BlockScan;
        };
        match serde_yaml::from_value(value) {
            Ok(TaggedLatest::BlockScan) => Self::BlockScan,
            Ok(TaggedLatest::Template(spec)) => Self::Template(spec),
            Ok(TaggedLatest::Plugin(spec)) => Self::Plugin(spec),
            Err(err) => Self::Invalid(err.to_string()),
        }
    }
}

impl From<serde_yaml::Value> for DownloadSpec {
    fn from(value: serde_yaml::Value) -> Self {
        let Some(value) = with_default_type(value, "quality_block") else {
            return Self::QualityBlock {
                quality: None,
                host_priority: None,
            };
        };
        match serde_yaml::from_value(value) {
            Ok(TaggedDownload::QualityBlock {
                quality,
                host_priority,
            }) => Self::QualityBlock {
                quality,
                host_priority,
            },
            Ok(TaggedDownload::Template(spec)) => Self::Template(spec),
            Ok(TaggedDownload::Plugin(spec)) => Self::Plugin(spec),
            Err(err) => Self::Invalid(err.to_string()),
        }
    }
}

/// `None` for an empty block; otherwise the block with `type` filled in.
fn with_default_type(value: serde_yaml::Value, default: &str) -> Option<serde_yaml::Value> {
    use serde_yaml::Value;

    match value {
        Value::Null => None,
        Value::Mapping(map) if map.is_empty() => None,
        Value::Mapping(mut map) => {
            if !map.contains_key("type") {
                map.insert(Value::from("type"), Value::from(default));
            }
            Some(Value::Mapping(map))
        }
        other => Some(other),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateSpec {
    pub pattern: String,
    #[serde(default)]
    pub link_group: Option<usize>,
    #[serde(default)]
    pub title_group: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DownloadTemplateSpec {
    pub pattern: String,
    #[serde(default)]
    pub link_group: Option<usize>,
    /// Literal host reported for every match.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginSpec {
    pub module: String,
    pub function: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let mut config = Self::from_yaml(&raw)
            .with_context(|| format!("load config: {}", path.display()))?;

        if config.store_path.is_relative()
            && let Some(base) = path.parent()
        {
            config.store_path = base.join(&config.store_path);
        }

        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(raw).context("parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for mapping in &self.mappings {
            if mapping.key.trim().is_empty() {
                anyhow::bail!("mapping key must not be empty");
            }
            if !seen.insert(mapping.key.as_str()) {
                anyhow::bail!("duplicate mapping key: {}", mapping.key);
            }
            if let Some(cadence) = &mapping.schedule {
                cadence
                    .validate()
                    .with_context(|| format!("schedule of mapping {}", mapping.key))?;
            }
        }

        if let Some(cadence) = &self.schedule {
            cadence.validate().context("top-level schedule")?;
        }

        if self.fetch.timeout_secs == 0 {
            anyhow::bail!("fetch.timeout_secs must be positive");
        }

        Ok(())
    }

    pub fn mapping(&self, key: &str) -> Option<&SeriesMapping> {
        self.mappings.iter().find(|m| m.key == key)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("config").join("config.yaml")
}

fn default_api_add_url() -> String {
    "http://127.0.0.1:5000/add".to_owned()
}

fn default_package_name() -> String {
    "anime".to_owned()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data").join("episodes.jsonl")
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    "episode-grabber/1.0".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
scheduler:
  type: daily
  time: "06:30"
discord_webhook: https://discord.test/hook
mappings:
  - anime_key: frieren
    season: 2
    source: https://example.test/anime/frieren
    target_quality: 720p
    host_priority: [Mega, Pdrain]
    episode_offset: { start: 13, subtract: 12 }
    extract_latest:
      type: regex
      pattern: '<a href="(?P<link>[^"]+)">(?P<title>Episode \d+)</a>'
    extract_download:
      type: quality_block
      quality: 480p
    scheduler:
      type: weekly
      time: "21:00"
      days: [4, 5]
  - key: inert
"#;

    #[test]
    fn parses_sample_with_legacy_aliases() -> anyhow::Result<()> {
        let config = Config::from_yaml(SAMPLE)?;
        assert_eq!(config.mappings.len(), 2);
        assert_eq!(config.api_add_url, "http://127.0.0.1:5000/add");
        assert_eq!(config.package_name, "anime");
        assert_eq!(config.fetch.timeout_secs, 20);
        assert!(config.schedule.is_some());

        let frieren = config.mapping("frieren").expect("mapping");
        assert_eq!(frieren.season, Some(2));
        assert!(!frieren.is_inert());
        assert_eq!(
            frieren.episode_offset,
            Some(EpisodeOffset {
                start: Some(13),
                subtract: Some(12)
            })
        );
        assert!(matches!(
            frieren.extract_latest,
            Some(LatestSpec::Template(_))
        ));
        assert_eq!(
            frieren.extract_download,
            Some(DownloadSpec::QualityBlock {
                quality: Some("480p".to_owned()),
                host_priority: None,
            })
        );
        assert!(frieren.schedule.is_some());

        assert!(config.mapping("inert").expect("mapping").is_inert());
        Ok(())
    }

    #[test]
    fn block_scan_and_plugin_variants_parse() -> anyhow::Result<()> {
        let config = Config::from_yaml(
            r#"
mappings:
  - key: a
    source: https://example.test/a
    extract_latest: { type: block_scan }
    extract_download: { type: plugin, module: builtin, function: download_href }
"#,
        )?;
        let mapping = &config.mappings[0];
        assert_eq!(mapping.extract_latest, Some(LatestSpec::BlockScan));
        assert_eq!(
            mapping.extract_download,
            Some(DownloadSpec::Plugin(PluginSpec {
                module: "builtin".to_owned(),
                function: "download_href".to_owned(),
            }))
        );
        Ok(())
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = Config::from_yaml(
            r#"
mappings:
  - key: same
  - key: same
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("duplicate mapping key"));
    }

    #[test]
    fn unparseable_extraction_settings_only_mark_their_mapping() -> anyhow::Result<()> {
        let config = Config::from_yaml(
            r#"
mappings:
  - key: good
    source: https://example.test/good
  - key: xpath
    source: https://example.test/xpath
    extract_latest: { type: xpath, expr: "//a" }
  - key: no-pattern
    source: https://example.test/no-pattern
    extract_latest: { type: template }
    extract_download: { type: plugin, module: builtin }
"#,
        )?;
        assert_eq!(config.mappings.len(), 3);
        assert_eq!(config.mappings[0].extract_latest, None);

        let Some(LatestSpec::Invalid(reason)) = &config.mappings[1].extract_latest else {
            panic!("expected invalid spec: {:?}", config.mappings[1].extract_latest);
        };
        assert!(reason.contains("xpath"), "{reason}");

        let Some(LatestSpec::Invalid(reason)) = &config.mappings[2].extract_latest else {
            panic!("expected invalid spec: {:?}", config.mappings[2].extract_latest);
        };
        assert!(reason.contains("pattern"), "{reason}");
        assert!(matches!(
            config.mappings[2].extract_download,
            Some(DownloadSpec::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_type_defaults_per_purpose() -> anyhow::Result<()> {
        let config = Config::from_yaml(
            r#"
mappings:
  - key: a
    extract_latest:
      pattern: '<a href="([^"]+)">(Episode \d+)</a>'
    extract_download: { quality: 720p }
  - key: b
    extract_latest: {}
    extract_download: {}
"#,
        )?;
        assert!(matches!(
            config.mappings[0].extract_latest,
            Some(LatestSpec::Template(_))
        ));
        assert_eq!(
            config.mappings[0].extract_download,
            Some(DownloadSpec::QualityBlock {
                quality: Some("720p".to_owned()),
                host_priority: None,
            })
        );
        assert_eq!(config.mappings[1].extract_latest, Some(LatestSpec::BlockScan));
        assert_eq!(
            config.mappings[1].extract_download,
            Some(DownloadSpec::QualityBlock {
                quality: None,
                host_priority: None,
            })
        );
        Ok(())
    }

    #[test]
    fn rejects_malformed_time() {
        let err = Config::from_yaml(
            r#"
schedule: { type: daily, time: "25:99" }
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("25:99"));
    }

    #[test]
    fn relative_store_path_resolves_against_config_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "mappings: []\n")?;

        let config = Config::load(&path)?;
        assert_eq!(
            config.store_path,
            dir.path().join("data").join("episodes.jsonl")
        );
        Ok(())
    }
}
