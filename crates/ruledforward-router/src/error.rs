//! Error types for the router.

use thiserror::Error;

use ruledforward_rules::RulesError;
use ruledforward_upstream::UpstreamError;

use crate::config::ConfigError;

/// Errors surfaced by the router and its collaborators.
#[derive(Error, Debug)]
pub enum RouterError {
    /// No upstream in the pool could serve the request.
    #[error("no healthy proxies")]
    NoHealthy,

    /// Pass-through was required but no next handler is configured.
    #[error("no next handler configured")]
    NoNextHandler,

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("loading geosite catalog: {0}")]
    Catalog(#[source] RulesError),

    #[error("group '{group}': {source}")]
    GroupUpdate {
        group: String,
        #[source]
        source: RulesError,
    },

    #[error("upstream: {0}")]
    Upstream(#[from] UpstreamError),
}
