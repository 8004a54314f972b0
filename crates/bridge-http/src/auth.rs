//! Credential injection for outbound backend calls.
//!
//! The injector is an explicit middleware: it takes a request (or URL) and
//! returns the transformed value. Nothing here mutates client-global state,
//! so the same injector instance is shared by every session and worker.

use url::Url;

/// Marker substituted for secret values in any diagnostic rendering.
pub const REDACTION_MARKER: &str = "***REDACTED***";

/// Authentication applied to every outbound backend call.
///
/// Exactly one variant is active per server instance, selected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// No credentials.
    None,
    /// Set a header to a fixed value (covers API-key headers and bearer
    /// tokens, which the CLI compiles down to an `Authorization` header).
    Header { name: String, value: String },
    /// Set a query parameter on the target URL.
    Query { name: String, value: String },
    /// HTTP basic auth.
    Basic { username: String, password: String },
}

/// Applies an [`AuthConfig`] to outbound requests and redacts its secrets
/// from diagnostic text.
#[derive(Debug, Clone)]
pub struct AuthInjector {
    config: AuthConfig,
}

impl AuthInjector {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Apply header-carried credentials to a request builder.
    ///
    /// The `Query` variant is a no-op here; it is injected into the URL by
    /// [`Self::inject_query`] before the builder is created.
    #[must_use]
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config {
            AuthConfig::Header { name, value } => request.header(name, value),
            AuthConfig::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            AuthConfig::Query { .. } | AuthConfig::None => request,
        }
    }

    /// Inject the query-parameter credential into `url`.
    ///
    /// Overwrite policy: if the parameter already exists it is replaced, so
    /// injecting twice leaves exactly one instance carrying the configured
    /// value. The query string is re-serialized with standard
    /// percent-encoding.
    pub fn inject_query(&self, url: &mut Url) {
        let AuthConfig::Query { name, value } = &self.config else {
            return;
        };

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != name.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(name, value);
        drop(pairs);

        if url.query() == Some("") {
            url.set_query(None);
        }
    }

    /// Replace every occurrence of the active secret in `text` with
    /// [`REDACTION_MARKER`].
    ///
    /// Mandatory at every point where a request, URL, or transport error is
    /// rendered for logging.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in self.secret_values() {
            if !secret.is_empty() {
                out = out.replace(secret, REDACTION_MARKER);
            }
        }
        out
    }

    /// Render a URL for diagnostics with the secret (and any userinfo)
    /// removed.
    #[must_use]
    pub fn redacted_url(&self, url: &Url) -> String {
        let mut u = url.clone();
        let _ = u.set_username("");
        let _ = u.set_password(None);
        self.redact(u.as_str())
    }

    fn secret_values(&self) -> Vec<&str> {
        match &self.config {
            AuthConfig::None => Vec::new(),
            AuthConfig::Header { value, .. } | AuthConfig::Query { value, .. } => vec![value],
            AuthConfig::Basic { password, .. } => vec![password],
        }
    }
}
