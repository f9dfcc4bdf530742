//! TOML harvest configuration.
//!
//! One file describes the raw output directory, HTTP behaviour, worker
//! parallelism, the global license allow-list, and an ordered list of
//! `[[sources]]`. Each source carries the settings every connector
//! understands (queries, paging, rate, whitelist...) plus a
//! `[sources.connector]` table tagged by `type` with connector-specific
//! settings.
//!
//! ```toml
//! [paths]
//! raw_dir = "data/raw"
//!
//! [[sources]]
//! queries = ["resistance training"]
//! rate_per_sec = 0.33
//! license_whitelist = ["cc-by", "cc0"]
//!
//! [sources.connector]
//! type = "arxiv"
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use openstrength_fetch::HttpConfig;
use openstrength_harvest_models::SourceKind;
use serde::Deserialize;

use crate::arxiv::ArxivConfig;
use crate::biorxiv::BiorxivConfig;
use crate::core_api::CoreConfig;
use crate::cursor::Paging;
use crate::doaj::DoajConfig;
use crate::figshare::FigshareConfig;
use crate::filter::KeywordFilter;
use crate::gov::GovConfig;
use crate::license::{CANONICAL_TAGS, LicenseGate, UnknownLicensePolicy};
use crate::oai_pmh::OaiPmhConfig;
use crate::pmc::PmcConfig;
use crate::unpaywall::UnpaywallConfig;
use crate::zenodo::ZenodoConfig;
use crate::SourceError;

/// Configuration shipped with the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../config/sources.toml");

/// Environment variable naming an alternative configuration file.
pub const CONFIG_ENV: &str = "OPENSTRENGTH_CONFIG";

// ── Top level ────────────────────────────────────────────────────────────

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Output locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// HTTP client behaviour.
    #[serde(default)]
    pub http: HttpConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub parallelism: ParallelismConfig,
    /// Global license allow-list.
    #[serde(default)]
    pub licenses: LicensesConfig,
    /// Default date window for sources without their own `from`/`to`.
    #[serde(default)]
    pub time_window: TimeWindow,
    /// Sources, in any order; the runner visits them in pipeline order.
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
}

/// `[paths]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the artifact tree.
    pub raw_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
        }
    }
}

/// `[parallelism]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParallelismConfig {
    /// Concurrent download workers per source.
    pub max_workers: usize,
    /// Pause between sources in a pipeline run.
    pub pause_between_sources_ms: u64,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            pause_between_sources_ms: 200,
        }
    }
}

/// `[licenses]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicensesConfig {
    /// Tags allowed for every source, merged with each source whitelist.
    pub allow: Option<Vec<String>>,
}

/// `[time_window]`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start date.
    pub start: Option<NaiveDate>,
    /// Inclusive end date.
    pub end: Option<NaiveDate>,
}

// ── Sources ──────────────────────────────────────────────────────────────

const fn default_true() -> bool {
    true
}

const fn default_rate() -> f64 {
    1.0
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    /// Disabled sources are reported as skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Search queries (meaning depends on the connector).
    #[serde(default)]
    pub queries: Vec<String>,
    /// Client-side keyword filter (all terms required).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Page size override.
    pub page_size: Option<u32>,
    /// Cap on records per query.
    pub max_results: Option<u64>,
    /// Requests per second against the source API and its downloads.
    #[serde(default = "default_rate")]
    pub rate_per_sec: f64,
    /// Allowed license tags; absent disables the gate for this source
    /// (unless the global allow-list is set).
    pub license_whitelist: Option<Vec<String>>,
    /// Policy for unrecognized licenses under an active whitelist.
    #[serde(default)]
    pub unknown_license: UnknownLicensePolicy,
    /// Start of the date window.
    pub from: Option<NaiveDate>,
    /// End of the date window.
    pub to: Option<NaiveDate>,
    /// Whether payloads are downloaded at all.
    #[serde(default = "default_true")]
    pub download: bool,
    /// Connector-specific settings.
    pub connector: ConnectorConfig,
}

impl SourceDefinition {
    /// Which source this entry configures.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        self.connector.kind()
    }

    /// Paging settings, using `default_page_size` when none is configured.
    #[must_use]
    pub fn paging(&self, default_page_size: u32) -> Paging {
        Paging::new(self.page_size.unwrap_or(default_page_size), self.max_results)
    }

    /// Keyword filter built from `keywords`.
    #[must_use]
    pub fn keyword_filter(&self) -> KeywordFilter {
        KeywordFilter::new(&self.keywords)
    }

    /// License gate for this source.
    #[must_use]
    pub fn license_gate(&self, licenses: &LicensesConfig) -> LicenseGate {
        LicenseGate::new(
            self.license_whitelist.as_deref(),
            licenses.allow.as_deref(),
            self.unknown_license,
        )
    }

    /// This source's date window, falling back to the global one.
    #[must_use]
    pub fn window(&self, global: TimeWindow) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (self.from.or(global.start), self.to.or(global.end))
    }

    /// Configured queries, or an error naming the source when there are
    /// none.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when `queries` is empty.
    pub fn require_queries(&self) -> Result<Vec<String>, SourceError> {
        let queries: Vec<String> = self
            .queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return Err(SourceError::config(format!("{}: no queries configured", self.kind())));
        }
        Ok(queries)
    }
}

/// `[sources.connector]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// `PubMed` Central.
    Pmc(PmcConfig),
    /// arXiv.
    Arxiv(ArxivConfig),
    /// bioRxiv / medRxiv.
    Biorxiv(BiorxivConfig),
    /// Government site crawl.
    Gov(GovConfig),
    /// Crossref + Unpaywall.
    Unpaywall(UnpaywallConfig),
    /// DOAJ.
    Doaj(DoajConfig),
    /// CORE.
    Core(CoreConfig),
    /// OAI-PMH endpoints.
    OaiPmh(OaiPmhConfig),
    /// Zenodo.
    Zenodo(ZenodoConfig),
    /// Figshare.
    Figshare(FigshareConfig),
}

impl ConnectorConfig {
    /// The source this connector config belongs to.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::Pmc(_) => SourceKind::Pmc,
            Self::Arxiv(_) => SourceKind::Arxiv,
            Self::Biorxiv(_) => SourceKind::Biorxiv,
            Self::Gov(_) => SourceKind::Gov,
            Self::Unpaywall(_) => SourceKind::Unpaywall,
            Self::Doaj(_) => SourceKind::Doaj,
            Self::Core(_) => SourceKind::Core,
            Self::OaiPmh(_) => SourceKind::OaiPmh,
            Self::Zenodo(_) => SourceKind::Zenodo,
            Self::Figshare(_) => SourceKind::Figshare,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

impl HarvestConfig {
    /// The entry configuring `kind`, if any.
    #[must_use]
    pub fn source(&self, kind: SourceKind) -> Option<&SourceDefinition> {
        self.sources.iter().find(|s| s.kind() == kind)
    }

    /// Checks cross-entry invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when a source type appears twice or
    /// `max_workers` is zero.
    pub fn validate(&self) -> Result<(), SourceError> {
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.kind()) {
                return Err(SourceError::config(format!(
                    "source type '{}' is configured more than once",
                    source.kind()
                )));
            }
            for entry in source.license_whitelist.iter().flatten() {
                let tag = crate::license::normalize(entry).unwrap_or_else(|| entry.to_lowercase());
                if !CANONICAL_TAGS.contains(&tag.as_str()) {
                    log::warn!(
                        "[{}] license whitelist entry '{entry}' is not a recognized license tag",
                        source.kind()
                    );
                }
            }
        }
        if self.parallelism.max_workers == 0 {
            return Err(SourceError::config("parallelism.max_workers must be at least 1"));
        }
        Ok(())
    }
}

/// Parses and validates a configuration document.
///
/// # Errors
///
/// Returns [`SourceError::Config`] on TOML or validation errors.
pub fn parse_config(toml_str: &str) -> Result<HarvestConfig, SourceError> {
    let config: HarvestConfig =
        toml::de::from_str(toml_str).map_err(|e| SourceError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration from `path`, else from the file named by
/// [`CONFIG_ENV`], else the embedded [`DEFAULT_CONFIG`].
///
/// # Errors
///
/// Returns [`SourceError::Config`] when the file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<HarvestConfig, SourceError> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let Some(path) = path else {
        log::debug!("Using embedded default configuration");
        return parse_config(DEFAULT_CONFIG);
    };

    log::info!("Loading configuration from {}", path.display());
    let text = std::fs::read_to_string(&path)
        .map_err(|e| SourceError::config(format!("cannot read {}: {e}", path.display())))?;
    parse_config(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        assert!(!config.sources.is_empty());
        assert!(config.parallelism.max_workers > 0);
    }

    #[test]
    fn default_config_covers_every_source() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        for kind in SourceKind::ALL {
            assert!(config.source(kind).is_some(), "missing {kind}");
        }
    }

    #[test]
    fn minimal_source_uses_defaults() {
        let config = parse_config(
            r#"
            [[sources]]
            queries = ["x"]
            [sources.connector]
            type = "arxiv"
            "#,
        )
        .unwrap();
        let source = config.source(SourceKind::Arxiv).unwrap();
        assert!(source.enabled);
        assert!(source.download);
        assert!((source.rate_per_sec - 1.0).abs() < f64::EPSILON);
        assert!(source.license_whitelist.is_none());
        assert_eq!(config.paths.raw_dir, PathBuf::from("data/raw"));
    }

    #[test]
    fn rejects_duplicate_sources() {
        let err = parse_config(
            r#"
            [[sources]]
            [sources.connector]
            type = "doaj"

            [[sources]]
            [sources.connector]
            type = "doaj"
            "#,
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_unknown_connector_type() {
        assert!(
            parse_config(
                r#"
                [[sources]]
                [sources.connector]
                type = "nope"
                "#,
            )
            .is_err()
        );
    }

    #[test]
    fn window_falls_back_to_global() {
        let config = parse_config(
            r#"
            [time_window]
            start = "2020-01-01"
            end = "2020-12-31"

            [[sources]]
            from = "2021-06-01"
            [sources.connector]
            type = "pmc"
            "#,
        )
        .unwrap();
        let (from, to) = config.sources[0].window(config.time_window);
        assert_eq!(from, NaiveDate::from_ymd_opt(2021, 6, 1));
        assert_eq!(to, NaiveDate::from_ymd_opt(2020, 12, 31));
    }

    #[test]
    fn oai_pmh_type_name() {
        let config = parse_config(
            r#"
            [[sources]]
            [sources.connector]
            type = "oai_pmh"
            endpoints = ["https://repo.example.org/oai"]
            "#,
        )
        .unwrap();
        assert_eq!(config.sources[0].kind(), SourceKind::OaiPmh);
    }
}
