//! Declarative request-matching engine
//!
//! Symptoms decide per-event whether to act by evaluating an ordered list of
//! [`MatchingRule`]s against the in-flight [`Exchange`]. A rule matches iff
//! every non-empty pattern field matches the corresponding exchange
//! attribute and the probability clause passes. Matching a list of rules is
//! a logical OR with first-match short-circuit.
//!
//! For non-HTTP exchanges (raw byte contexts) the method/path/host clauses
//! are skipped entirely; only the probability clause applies.
//!
//! Patterns are compiled once at plugin setup; an invalid pattern is a fatal
//! configuration error.

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::plugin::Exchange;

/// Describes when a symptom applies to an exchange.
///
/// Empty pattern fields mean "no constraint" — they always satisfy, they do
/// NOT mean "match the empty string".
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MatchingRule {
    /// Regex matched against the request method. Empty = match all.
    #[serde(default)]
    pub method: String,

    /// Regex matched against the URL path. Empty = match all.
    #[serde(default)]
    pub path: String,

    /// Regex matched against the request host. Empty = match all.
    #[serde(default)]
    pub host: String,

    /// Percentage chance, 0-100, that the rule matches when the pattern
    /// clauses are satisfied.
    ///
    /// A probability of exactly 0 means the clause is not evaluated at all,
    /// so 0 behaves as "always match" — "always" and "0% chance" are
    /// indistinguishable. This is deliberate, inherited behaviour; do not
    /// invert it.
    #[serde(default)]
    pub probability: f64,
}

impl MatchingRule {
    /// The synthetic catch-all rule injected when no rules are configured.
    pub fn catch_all() -> Self {
        Self {
            method: ".*".into(),
            path: "/".into(),
            host: ".*".into(),
            probability: 0.0,
        }
    }

    /// Compile the rule's patterns for repeated evaluation.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if any non-empty pattern is not a valid regex.
    pub fn compile(&self, plugin: &'static str) -> Result<CompiledRule, PluginError> {
        let compile = |pattern: &str, field: &str| -> Result<Option<Regex>, PluginError> {
            if pattern.is_empty() {
                return Ok(None);
            }
            Regex::new(pattern)
                .map(Some)
                .map_err(|e| PluginError::setup(plugin, format!("invalid {field} pattern: {e}")))
        };

        Ok(CompiledRule {
            method: compile(&self.method, "method")?,
            path: compile(&self.path, "path")?,
            host: compile(&self.host, "host")?,
            probability: self.probability,
        })
    }
}

/// Expand a configured rule list, injecting the catch-all when empty.
pub fn expand_default(rules: &[MatchingRule]) -> Vec<MatchingRule> {
    if rules.is_empty() {
        vec![MatchingRule::catch_all()]
    } else {
        rules.to_vec()
    }
}

/// Compile a rule list for a plugin, failing startup on any bad pattern.
pub fn compile_rules(
    rules: &[MatchingRule],
    plugin: &'static str,
) -> Result<Vec<CompiledRule>, PluginError> {
    rules.iter().map(|r| r.compile(plugin)).collect()
}

/// A matching rule with its patterns pre-compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    method: Option<Regex>,
    path: Option<Regex>,
    host: Option<Regex>,
    probability: f64,
}

impl CompiledRule {
    /// Evaluate this rule against an exchange using the thread-local RNG.
    pub fn matches(&self, ctx: &Exchange) -> bool {
        self.matches_with(ctx, &mut rand::thread_rng())
    }

    /// Evaluate this rule against an exchange with an injected RNG.
    ///
    /// The RNG is injectable so tests can force both branches of the
    /// probability clause deterministically.
    pub fn matches_with<R: Rng>(&self, ctx: &Exchange, rng: &mut R) -> bool {
        // Pattern clauses only constrain HTTP exchanges.
        if let Some(request) = &ctx.request {
            if let Some(path) = &self.path {
                if !path.is_match(&request.path) {
                    return false;
                }
            }
            if let Some(host) = &self.host {
                if !host.is_match(&request.host) {
                    return false;
                }
            }
            if let Some(method) = &self.method {
                if !method.is_match(request.method.as_str()) {
                    return false;
                }
            }
        }

        // Probability clause applies regardless of protocol. Zero means the
        // clause is skipped, not "never".
        if self.probability > 0.0 {
            let draw = rng.gen_range(0..100_i64);
            let threshold = self.probability.min(100.0) as i64;
            if draw > threshold {
                return false;
            }
        }

        true
    }
}

/// True iff at least one rule in the list matches (logical OR, first match
/// short-circuits).
pub fn any_match(rules: &[CompiledRule], ctx: &Exchange) -> bool {
    any_match_with(rules, ctx, &mut rand::thread_rng())
}

/// [`any_match`] with an injected RNG.
pub fn any_match_with<R: Rng>(rules: &[CompiledRule], ctx: &Exchange, rng: &mut R) -> bool {
    rules.iter().any(|rule| rule.matches_with(ctx, rng))
}
