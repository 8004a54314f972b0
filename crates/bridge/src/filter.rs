//! Operation filtering: compiling CLI filter text into rule sets and
//! deciding, once per operation at startup, whether it is exposed as a tool.

use crate::error::{BridgeError, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use unrelated_bridge_openapi::catalog::OperationDescriptor;

const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// How a rule's tag set is matched against an operation's tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TagMatch {
    /// Every listed tag must be present on the operation.
    #[default]
    All,
    /// At least one listed tag must be present.
    Any,
}

/// Raw filter text as it arrives from the CLI, before compilation.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub methods: Option<String>,
    pub include_paths: Option<String>,
    pub exclude_paths: Option<String>,
    pub include_tags: Option<String>,
    pub exclude_tags: Option<String>,
    pub tag_match: TagMatch,
}

/// One compiled rule. Absent axes are unconstrained; a rule matches when
/// every configured axis matches.
#[derive(Debug)]
pub struct FilterRule {
    methods: Option<HashSet<String>>,
    /// Anchored patterns; OR within the rule.
    patterns: Vec<Regex>,
    tags: Option<BTreeSet<String>>,
    tag_match: TagMatch,
}

impl FilterRule {
    fn matches(&self, op: &OperationDescriptor) -> bool {
        if let Some(methods) = &self.methods
            && !methods.contains(&op.method)
        {
            return false;
        }

        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| p.is_match(&op.path)) {
            return false;
        }

        if let Some(tags) = &self.tags {
            let ok = match self.tag_match {
                TagMatch::All => tags.iter().all(|t| op.tags.contains(t)),
                TagMatch::Any => tags.iter().any(|t| op.tags.contains(t)),
            };
            if !ok {
                return false;
            }
        }

        true
    }
}

/// Compiled include/exclude rule sets.
///
/// Invariants: an empty include list means every operation is a candidate;
/// a matching exclude rule always removes a candidate.
#[derive(Debug, Default)]
pub struct FilterSet {
    include: Vec<FilterRule>,
    exclude: Vec<FilterRule>,
}

impl FilterSet {
    /// Compile raw filter options into a rule set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending entry for unknown
    /// HTTP methods or invalid path patterns. These are fatal at startup.
    pub fn compile(options: &FilterOptions) -> Result<Self> {
        let methods = compile_methods(options.methods.as_deref())?;
        let include_patterns = compile_patterns(options.include_paths.as_deref(), "include")?;
        let exclude_patterns = compile_patterns(options.exclude_paths.as_deref(), "exclude")?;
        let include_tags = split_list(options.include_tags.as_deref());
        let exclude_tags = split_list(options.exclude_tags.as_deref());

        let mut include = Vec::new();
        if methods.is_some() || !include_patterns.is_empty() || !include_tags.is_empty() {
            include.push(FilterRule {
                methods,
                patterns: include_patterns,
                tags: if include_tags.is_empty() {
                    None
                } else {
                    Some(include_tags.into_iter().collect())
                },
                tag_match: options.tag_match,
            });
        }

        let mut exclude = Vec::new();
        for pattern in exclude_patterns {
            exclude.push(FilterRule {
                methods: None,
                patterns: vec![pattern],
                tags: None,
                tag_match: options.tag_match,
            });
        }
        for tag in exclude_tags {
            exclude.push(FilterRule {
                methods: None,
                patterns: Vec::new(),
                tags: Some(BTreeSet::from([tag])),
                tag_match: options.tag_match,
            });
        }

        Ok(Self { include, exclude })
    }

    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Decide whether one operation is exposed as a tool.
    ///
    /// Empty include rules make every operation a candidate; otherwise at
    /// least one include rule must be fully satisfied. Any matching exclude
    /// rule removes the candidate regardless of includes.
    #[must_use]
    pub fn decide(&self, op: &OperationDescriptor) -> bool {
        let candidate =
            self.include.is_empty() || self.include.iter().any(|rule| rule.matches(op));
        candidate && !self.exclude.iter().any(|rule| rule.matches(op))
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn compile_methods(raw: Option<&str>) -> Result<Option<HashSet<String>>> {
    let entries = split_list(raw);
    if entries.is_empty() || entries.iter().any(|m| m == "*") {
        return Ok(None);
    }

    let methods: HashSet<String> = entries.iter().map(|m| m.to_uppercase()).collect();
    let invalid: Vec<&str> = methods
        .iter()
        .filter(|m| !VALID_METHODS.contains(&m.as_str()))
        .map(String::as_str)
        .collect();
    if !invalid.is_empty() {
        let mut invalid = invalid;
        invalid.sort_unstable();
        return Err(BridgeError::Config(format!(
            "Invalid HTTP methods: {}. Valid methods: {}",
            invalid.join(", "),
            VALID_METHODS.join(", ")
        )));
    }

    Ok(Some(methods))
}

fn compile_patterns(raw: Option<&str>, kind: &str) -> Result<Vec<Regex>> {
    split_list(raw)
        .iter()
        .map(|pattern| {
            // Anchor against the full path template.
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                BridgeError::Config(format!("Invalid {kind} path pattern '{pattern}': {e}"))
            })
        })
        .collect()
}
