//! Limit table and token limit parsing.
//!
//! Per-token quotas come from a single `"token:limit,token:limit"` string.
//! Entries that do not parse are dropped; the table is built once and only
//! read afterwards.

use std::collections::HashMap;

use tracing::debug;

use super::identifier::{Identifier, IdentifierKind};
use crate::config::RateLimiterConfig;

/// Per-second quotas for every identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitTable {
    /// Quota for IP identifiers
    pub default_ip_limit: u64,
    /// Quota for tokens without an entry in `token_limits`
    pub default_token_limit: u64,
    /// Quotas for specific tokens
    pub token_limits: HashMap<String, u64>,
}

impl LimitTable {
    /// Create a table from explicit defaults and token quotas.
    pub fn new(
        default_ip_limit: u64,
        default_token_limit: u64,
        token_limits: HashMap<String, u64>,
    ) -> Self {
        Self {
            default_ip_limit,
            default_token_limit,
            token_limits,
        }
    }

    /// Build the table from the configuration record.
    pub fn from_config(config: &RateLimiterConfig) -> Self {
        let token_limits = parse_token_limits(&config.token_limits);
        debug!(
            default_ip_limit = config.default_limit_by_ip,
            default_token_limit = config.default_limit_by_token,
            token_overrides = token_limits.len(),
            "Limit table built"
        );
        Self::new(
            config.default_limit_by_ip,
            config.default_limit_by_token,
            token_limits,
        )
    }

    /// The quota that applies to `identifier`.
    ///
    /// Tokens are looked up verbatim, falling back to the token default; IP
    /// identifiers always get the IP default. A token that is not UTF-8 can
    /// never match a configured entry.
    pub fn resolve(&self, identifier: &Identifier) -> u64 {
        match identifier.kind() {
            IdentifierKind::Token => identifier
                .as_str()
                .and_then(|token| self.token_limits.get(token))
                .copied()
                .unwrap_or(self.default_token_limit),
            IdentifierKind::Ip => self.default_ip_limit,
        }
    }
}

/// Parse a `"t1:n1,t2:n2"` list into a token quota map.
///
/// Whitespace around each pair is trimmed, whitespace inside a token is
/// kept. Pairs without exactly one `:`, with an empty token, or with a value
/// that is not a non-negative integer are skipped. Later duplicates win.
pub fn parse_token_limits(raw: &str) -> HashMap<String, u64> {
    let mut limits = HashMap::new();
    if raw.is_empty() {
        return limits;
    }

    for pair in raw.split(',') {
        let pair = pair.trim();
        let parts: Vec<&str> = pair.split(':').collect();
        let [token, limit] = parts.as_slice() else {
            if !pair.is_empty() {
                debug!(entry = %pair, "Skipping malformed token limit");
            }
            continue;
        };

        match limit.parse::<u64>() {
            Ok(limit) if !token.is_empty() => {
                limits.insert(token.to_string(), limit);
            }
            _ => debug!(entry = %pair, "Skipping malformed token limit"),
        }
    }

    limits
}
