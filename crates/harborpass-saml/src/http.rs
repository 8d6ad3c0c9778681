//! Explicit transport inputs
//!
//! The core never reads ambient request state. Callers hand
//! `process_response`/`process_slo` an [`HttpRequest`]: the parsed form or
//! query parameters, plus the raw query string when signature verification
//! must reconstruct the exact octets the sender signed.

use std::collections::HashMap;

/// Parsed request parameters plus the optional raw query string
#[derive(Debug, Default, Clone)]
pub struct HttpRequest {
    params: HashMap<String, String>,
    query_string: Option<String>,
}

impl HttpRequest {
    /// Empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parsed (decoded) parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Attach the raw query string as received on the wire
    pub fn with_query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    /// Look up a parsed parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The raw query string, when the caller supplied one
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// The raw, still-encoded `name=value` clause for a parameter, extracted
    /// from the raw query string. Preserves whatever percent-encoding the
    /// sender used.
    pub fn raw_clause(&self, name: &str) -> Option<&str> {
        let query = self.query_string.as_deref()?;
        query
            .split('&')
            .find(|clause| {
                clause.strip_prefix(name).map_or(false, |rest| rest.starts_with('='))
            })
    }
}
