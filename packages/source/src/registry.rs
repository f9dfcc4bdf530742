//! Builds connectors from configuration.

use std::sync::Arc;

use chrono::NaiveDate;
use openstrength_fetch::{HttpClient, RateLimiter};

use crate::arxiv::ArxivConnector;
use crate::biorxiv::BiorxivConnector;
use crate::config::{ConnectorConfig, SourceDefinition, TimeWindow};
use crate::core_api::CoreConnector;
use crate::doaj::DoajConnector;
use crate::figshare::FigshareConnector;
use crate::gov::GovConnector;
use crate::oai_pmh::OaiPmhConnector;
use crate::pmc::PmcConnector;
use crate::unpaywall::UnpaywallConnector;
use crate::zenodo::ZenodoConnector;
use crate::{Connector, SourceError};

/// Everything a connector constructor needs besides its own config table.
#[derive(Debug, Clone)]
pub struct BuildContext<'a> {
    /// The `[[sources]]` entry.
    pub def: &'a SourceDefinition,
    /// Client throttled by the source's API limiter.
    pub http: HttpClient,
    /// Start of the date window.
    pub from: Option<NaiveDate>,
    /// End of the date window.
    pub to: Option<NaiveDate>,
}

impl<'a> BuildContext<'a> {
    /// Creates a context with a fresh limiter at the source's
    /// `rate_per_sec`.
    #[must_use]
    pub fn new(def: &'a SourceDefinition, base: &HttpClient, window: TimeWindow) -> Self {
        let (from, to) = def.window(window);
        Self {
            def,
            http: base.with_limiter(Arc::new(RateLimiter::new(def.rate_per_sec))),
            from,
            to,
        }
    }
}

/// Builds the connector described by `ctx.def`.
///
/// # Errors
///
/// Returns [`SourceError::Config`] when required settings (API keys,
/// emails, dates, seeds, endpoints) are missing or invalid.
pub fn build_connector(ctx: &BuildContext<'_>) -> Result<Arc<dyn Connector>, SourceError> {
    Ok(match &ctx.def.connector {
        ConnectorConfig::Pmc(c) => Arc::new(PmcConnector::new(ctx, c)?),
        ConnectorConfig::Arxiv(c) => Arc::new(ArxivConnector::new(ctx, c)?),
        ConnectorConfig::Biorxiv(c) => Arc::new(BiorxivConnector::new(ctx, c)?),
        ConnectorConfig::Gov(c) => Arc::new(GovConnector::new(ctx, c)?),
        ConnectorConfig::Unpaywall(c) => Arc::new(UnpaywallConnector::new(ctx, c)?),
        ConnectorConfig::Doaj(c) => Arc::new(DoajConnector::new(ctx, c)?),
        ConnectorConfig::Core(c) => Arc::new(CoreConnector::new(ctx, c)?),
        ConnectorConfig::OaiPmh(c) => Arc::new(OaiPmhConnector::new(ctx, c)?),
        ConnectorConfig::Zenodo(c) => Arc::new(ZenodoConnector::new(ctx, c)?),
        ConnectorConfig::Figshare(c) => Arc::new(FigshareConnector::new(ctx, c)?),
    })
}

/// Reads a secret from config, falling back to an environment variable.
pub(crate) fn secret(configured: Option<&String>, env_var: &str) -> Option<String> {
    configured
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var(env_var).ok().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
}
