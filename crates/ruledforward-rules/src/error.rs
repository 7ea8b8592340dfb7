//! Error types for rule ingestion and matching.

use thiserror::Error;

/// Errors that can occur while loading or building rule sets.
#[derive(Error, Debug)]
pub enum RulesError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("invalid bootstrap dns address: {0}")]
    InvalidBootstrap(String),

    #[error("invalid geosite catalog: not a valid GeoSiteList")]
    InvalidCatalog,

    #[error("geosite catalog decode: {0}")]
    CatalogDecode(#[from] prost::DecodeError),
}
