//! Command-line surface.
//!
//! Secret-bearing flags mirror environment variables (`API_KEY`,
//! `BEARER_TOKEN`, …); an explicit flag overrides its variable. Validation
//! here is fatal: no partial service starts on a bad auth or filter
//! combination.

use crate::error::{BridgeError, Result};
use crate::filter::{FilterOptions, TagMatch};
use crate::session::SessionLimits;
use crate::transport::TransportMode;
use clap::{Parser, ValueEnum};
use std::time::Duration;
use unrelated_bridge_http::auth::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthType {
    None,
    #[value(name = "api_key")]
    ApiKey,
    Bearer,
    Basic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApiKeyLocation {
    Header,
    Query,
}

#[derive(Debug, Parser)]
#[command(
    name = "unrelated-openapi-bridge",
    version,
    about = "Expose an OpenAPI-described backend to MCP clients as tools"
)]
pub struct Cli {
    /// OpenAPI spec location: a file path or an http(s) URL.
    pub openapi_source: String,

    /// Server name advertised to clients.
    #[arg(long, default_value = "OpenAPI MCP Bridge")]
    pub name: String,

    /// Host to bind in network modes (ignored for stdio).
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind in network modes (ignored for stdio).
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Override the backend base URL from the spec's `servers` entry.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Enable debug logging (stderr only; stdout stays protocol-clean).
    #[arg(long)]
    pub debug: bool,

    /// Transport strategy.
    #[arg(short = 't', long, value_enum, env = "SERVER_TYPE", default_value = "stdio")]
    pub server_type: TransportMode,

    /// Authentication type for outbound backend calls.
    #[arg(long, value_enum, default_value = "none")]
    pub auth_type: AuthType,

    /// API key (or set API_KEY).
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Header name carrying the API key.
    #[arg(long, default_value = "X-API-Key")]
    pub api_key_header: String,

    /// Where the API key is sent when --auth-type api_key is used.
    #[arg(long, value_enum, env = "API_KEY_LOCATION", default_value = "header")]
    pub api_key_location: ApiKeyLocation,

    /// Query parameter name when --api-key-location query is used.
    #[arg(long, env = "API_KEY_PARAM_NAME", default_value = "key")]
    pub api_key_param_name: String,

    /// Bearer token (or set BEARER_TOKEN).
    #[arg(long, env = "BEARER_TOKEN")]
    pub bearer_token: Option<String>,

    /// Username for basic auth (or set USERNAME).
    #[arg(long, env = "USERNAME")]
    pub username: Option<String>,

    /// Password for basic auth (or set PASSWORD).
    #[arg(long, env = "PASSWORD")]
    pub password: Option<String>,

    /// Custom header in "Name: Value" form; repeatable.
    #[arg(long = "header")]
    pub headers: Vec<String>,

    /// Comma-separated HTTP methods to include ("*" for all).
    #[arg(long)]
    pub methods: Option<String>,

    /// Comma-separated path regexes to include.
    #[arg(long)]
    pub include_paths: Option<String>,

    /// Comma-separated path regexes to exclude.
    #[arg(long)]
    pub exclude_paths: Option<String>,

    /// Comma-separated tags to include.
    #[arg(long)]
    pub include_tags: Option<String>,

    /// Comma-separated tags to exclude.
    #[arg(long)]
    pub exclude_tags: Option<String>,

    /// Whether a comma-separated tag list requires all tags or any one.
    #[arg(long, value_enum, env = "TAG_MATCH", default_value = "all")]
    pub tag_match: TagMatch,

    /// Outbound backend call timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Maximum in-flight tool executions per session.
    #[arg(long, default_value_t = 8)]
    pub max_concurrency: usize,

    /// How long in-flight workers may run after shutdown starts.
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

impl Cli {
    /// Compile the auth flags into one [`AuthConfig`] variant.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the selected auth type is missing
    /// its credential, or when api-key options are combined with another
    /// auth type.
    pub fn auth_config(&self) -> Result<AuthConfig> {
        if self.auth_type != AuthType::ApiKey && self.api_key_location != ApiKeyLocation::Header {
            return Err(BridgeError::Config(
                "--api-key-location is only valid with --auth-type api_key".to_string(),
            ));
        }

        match self.auth_type {
            AuthType::None => Ok(AuthConfig::None),
            AuthType::ApiKey => {
                let Some(api_key) = self.api_key.clone() else {
                    return Err(BridgeError::Config(
                        "api_key required for api_key authentication (use --api-key or API_KEY)"
                            .to_string(),
                    ));
                };
                match self.api_key_location {
                    ApiKeyLocation::Header => Ok(AuthConfig::Header {
                        name: self.api_key_header.clone(),
                        value: api_key,
                    }),
                    ApiKeyLocation::Query => {
                        if self.api_key_param_name.trim().is_empty() {
                            return Err(BridgeError::Config(
                                "--api-key-param-name must be non-empty with --api-key-location query"
                                    .to_string(),
                            ));
                        }
                        Ok(AuthConfig::Query {
                            name: self.api_key_param_name.clone(),
                            value: api_key,
                        })
                    }
                }
            }
            AuthType::Bearer => {
                let Some(token) = self.bearer_token.clone() else {
                    return Err(BridgeError::Config(
                        "bearer_token required for bearer authentication (use --bearer-token or BEARER_TOKEN)"
                            .to_string(),
                    ));
                };
                Ok(AuthConfig::Header {
                    name: "Authorization".to_string(),
                    value: format!("Bearer {token}"),
                })
            }
            AuthType::Basic => {
                let mut missing = Vec::new();
                if self.username.is_none() {
                    missing.push("username");
                }
                if self.password.is_none() {
                    missing.push("password");
                }
                if !missing.is_empty() {
                    return Err(BridgeError::Config(format!(
                        "{} required for basic authentication",
                        missing.join(", ")
                    )));
                }
                Ok(AuthConfig::Basic {
                    username: self.username.clone().unwrap_or_default(),
                    password: self.password.clone().unwrap_or_default(),
                })
            }
        }
    }

    /// Parse repeated `--header "Name: Value"` flags.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming any entry without a colon.
    pub fn custom_headers(&self) -> Result<Vec<(String, String)>> {
        self.headers
            .iter()
            .map(|raw| {
                raw.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .filter(|(name, _)| !name.is_empty())
                    .ok_or_else(|| {
                        BridgeError::Config(format!(
                            "Invalid header '{raw}' (expected \"Name: Value\")"
                        ))
                    })
            })
            .collect()
    }

    #[must_use]
    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            methods: self.methods.clone(),
            include_paths: self.include_paths.clone(),
            exclude_paths: self.exclude_paths.clone(),
            include_tags: self.include_tags.clone(),
            exclude_tags: self.exclude_tags.clone(),
            tag_match: self.tag_match,
        }
    }

    #[must_use]
    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            max_concurrency: self.max_concurrency.max(1),
            grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["unrelated-openapi-bridge", "spec.yaml"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).expect("parse")
    }

    #[test]
    fn defaults_select_stdio_and_no_auth() {
        let cli = parse(&[]);
        assert_eq!(cli.server_type, TransportMode::Stdio);
        assert_eq!(cli.auth_type, AuthType::None);
        assert_eq!(cli.port, 8000);
        assert_eq!(cli.auth_config().expect("auth"), AuthConfig::None);
    }

    #[test]
    fn api_key_header_auth_uses_configured_header_name() {
        let cli = parse(&[
            "--auth-type",
            "api_key",
            "--api-key",
            "k123",
            "--api-key-header",
            "X-Token",
        ]);
        assert_eq!(
            cli.auth_config().expect("auth"),
            AuthConfig::Header {
                name: "X-Token".to_string(),
                value: "k123".to_string(),
            }
        );
    }

    #[test]
    fn api_key_query_auth_uses_param_name() {
        let cli = parse(&[
            "--auth-type",
            "api_key",
            "--api-key",
            "k123",
            "--api-key-location",
            "query",
            "--api-key-param-name",
            "key",
        ]);
        assert_eq!(
            cli.auth_config().expect("auth"),
            AuthConfig::Query {
                name: "key".to_string(),
                value: "k123".to_string(),
            }
        );
    }

    #[test]
    fn api_key_auth_without_key_is_fatal() {
        let cli = parse(&["--auth-type", "api_key"]);
        // Only run the negative assertion when the environment does not
        // provide a key via API_KEY.
        if cli.api_key.is_none() {
            let err = cli.auth_config().expect_err("missing key");
            assert!(err.to_string().contains("api_key required"));
        }
    }

    #[test]
    fn bearer_compiles_to_authorization_header() {
        let cli = parse(&["--auth-type", "bearer", "--bearer-token", "tok"]);
        assert_eq!(
            cli.auth_config().expect("auth"),
            AuthConfig::Header {
                name: "Authorization".to_string(),
                value: "Bearer tok".to_string(),
            }
        );
    }

    #[test]
    fn basic_auth_takes_both_credentials() {
        let cli = parse(&[
            "--auth-type",
            "basic",
            "--username",
            "alice",
            "--password",
            "pw",
        ]);
        assert_eq!(
            cli.auth_config().expect("auth"),
            AuthConfig::Basic {
                username: "alice".to_string(),
                password: "pw".to_string(),
            }
        );
    }

    #[test]
    fn api_key_location_requires_api_key_auth_type() {
        let cli = parse(&["--api-key-location", "query"]);
        let err = cli.auth_config().expect_err("location without api_key");
        assert!(err.to_string().contains("--api-key-location"));
    }

    #[test]
    fn custom_headers_parse_and_reject_malformed_entries() {
        let cli = parse(&["--header", "X-A: 1", "--header", "X-B:2"]);
        assert_eq!(
            cli.custom_headers().expect("headers"),
            vec![
                ("X-A".to_string(), "1".to_string()),
                ("X-B".to_string(), "2".to_string()),
            ]
        );

        let cli = parse(&["--header", "no-colon"]);
        assert!(cli.custom_headers().is_err());
    }

    #[test]
    fn filter_flags_flow_into_filter_options() {
        let cli = parse(&[
            "--methods",
            "GET,POST",
            "--include-paths",
            "/users/.*",
            "--exclude-tags",
            "internal",
            "--tag-match",
            "any",
        ]);
        let options = cli.filter_options();
        assert_eq!(options.methods.as_deref(), Some("GET,POST"));
        assert_eq!(options.include_paths.as_deref(), Some("/users/.*"));
        assert_eq!(options.exclude_tags.as_deref(), Some("internal"));
        assert_eq!(options.tag_match, TagMatch::Any);
    }
}
