//! Spec loading and the raw operation catalog.

use crate::error::{CatalogError, Result};
use openapiv3::{OpenAPI, Operation, Parameter, PathItem, ReferenceOr};
use serde_json::Value;
use std::collections::BTreeSet;
use url::Url;

/// One callable endpoint definition from the API description, as seen by the
/// routing core. Immutable and read-only after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    /// Uppercase HTTP method, e.g. `GET`.
    pub method: String,
    /// Path template, e.g. `/users/{id}`.
    pub path: String,
    pub tags: BTreeSet<String>,
    pub operation_id: Option<String>,
}

impl std::fmt::Display for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A descriptor together with the spec data needed to generate its tool.
pub struct OperationRef<'a> {
    pub descriptor: OperationDescriptor,
    pub operation: &'a Operation,
    /// Parameters declared on the enclosing path item (shared across
    /// methods), merged with the operation's own during generation.
    pub path_item_params: &'a [ReferenceOr<Parameter>],
}

/// A parsed spec plus its JSON image (for local `$ref` resolution).
#[derive(Debug)]
pub struct LoadedSpec {
    source: String,
    spec: OpenAPI,
    json: Value,
}

/// Load an OpenAPI document from a file path or http(s) URL.
///
/// JSON documents parse through the YAML parser (JSON is a YAML subset), so
/// one parse covers both formats.
///
/// # Errors
///
/// Returns a descriptive error naming the source if fetching, reading, or
/// parsing fails. These are fatal at startup.
pub async fn load_spec(source: &str, client: &reqwest::Client) -> Result<LoadedSpec> {
    let content = if source.starts_with("http://") || source.starts_with("https://") {
        tracing::info!(source = %source, "fetching OpenAPI spec");
        let resp = client
            .get(source)
            .send()
            .await
            .map_err(|e| CatalogError::SpecFetch {
                url: source.to_string(),
                message: e.to_string(),
            })?;
        resp.text().await.map_err(|e| CatalogError::SpecFetch {
            url: source.to_string(),
            message: e.to_string(),
        })?
    } else {
        tracing::info!(source = %source, "loading OpenAPI spec");
        std::fs::read_to_string(source).map_err(|e| CatalogError::SpecReadFile {
            path: source.to_string(),
            source: e,
        })?
    };

    let spec: OpenAPI = serde_yaml::from_str(&content).map_err(|e| CatalogError::SpecParse {
        location: source.to_string(),
        source: e,
    })?;
    let json = serde_json::to_value(&spec)?;

    Ok(LoadedSpec {
        source: source.to_string(),
        spec,
        json,
    })
}

impl LoadedSpec {
    /// Parse a spec already held in memory (tests, stdin-provided specs).
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse as OpenAPI.
    pub fn from_text(source: &str, content: &str) -> Result<Self> {
        let spec: OpenAPI = serde_yaml::from_str(content).map_err(|e| CatalogError::SpecParse {
            location: source.to_string(),
            source: e,
        })?;
        let json = serde_json::to_value(&spec)?;
        Ok(Self {
            source: source.to_string(),
            spec,
            json,
        })
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.spec.info.title
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.spec.info.version
    }

    /// JSON image of the document, used for local `$ref` resolution.
    #[must_use]
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// Resolve the effective backend base URL.
    ///
    /// Precedence: explicit override, then the spec's first `servers` entry.
    /// A relative `servers` URL is resolved against the spec URL when the
    /// spec itself was fetched over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if neither source yields an absolute URL.
    pub fn resolve_base_url(&self, override_url: Option<&str>) -> Result<String> {
        let candidate = override_url
            .map(str::to_string)
            .or_else(|| self.spec.servers.first().map(|s| s.url.clone()))
            .ok_or_else(|| {
                CatalogError::Config(format!(
                    "No base URL: spec '{}' declares no servers and no --base-url was given",
                    self.source
                ))
            })?;

        if Url::parse(&candidate).is_ok() {
            return Ok(candidate);
        }

        // Relative server URL: resolve against the spec's own URL.
        if let Ok(spec_url) = Url::parse(&self.source)
            && let Ok(joined) = spec_url.join(&candidate)
        {
            return Ok(joined.to_string());
        }

        Err(CatalogError::Config(format!(
            "Base URL '{candidate}' is not absolute and spec '{}' is not a URL to resolve it against",
            self.source
        )))
    }

    /// Enumerate every operation in the document, in path order.
    ///
    /// Path items referenced via non-local `$ref`s are skipped with a
    /// warning; everything else is surfaced so the route decision engine
    /// sees the complete catalog.
    #[must_use]
    pub fn operations(&self) -> Vec<OperationRef<'_>> {
        let mut out = Vec::new();

        for (path, item) in &self.spec.paths.paths {
            let ReferenceOr::Item(item) = item else {
                tracing::warn!(path = %path, "skipping path item behind external $ref");
                continue;
            };

            for (method, operation) in methods_of(item) {
                let tags: BTreeSet<String> = operation.tags.iter().cloned().collect();
                out.push(OperationRef {
                    descriptor: OperationDescriptor {
                        method: method.to_string(),
                        path: path.clone(),
                        tags,
                        operation_id: operation.operation_id.clone(),
                    },
                    operation,
                    path_item_params: &item.parameters,
                });
            }
        }

        out
    }
}

fn methods_of(item: &PathItem) -> Vec<(&'static str, &Operation)> {
    [
        ("GET", &item.get),
        ("PUT", &item.put),
        ("POST", &item.post),
        ("DELETE", &item.delete),
        ("OPTIONS", &item.options),
        ("HEAD", &item.head),
        ("PATCH", &item.patch),
    ]
    .into_iter()
    .filter_map(|(m, op)| op.as_ref().map(|op| (m, op)))
    .collect()
}
