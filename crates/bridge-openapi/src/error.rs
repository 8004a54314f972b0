//! Error types for OpenAPI catalog building.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Configuration errors (invalid base URL, conflicting options).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Spec interpretation errors (unresolvable refs, unsupported shapes).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("OpenAPI error: failed to fetch spec from '{url}': {message}")]
    SpecFetch { url: String, message: String },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    SpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {source}")]
    SpecParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
