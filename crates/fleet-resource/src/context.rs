//! Transport-neutral request context.

use std::collections::{BTreeMap, HashMap};

/// Query parameters, keyed by name, each holding every supplied value in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: BTreeMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a URL-encoded query string (`make=ford&year=1999&year=2001`).
    ///
    /// A leading `?` is tolerated. Pairs without a key are skipped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            if key.is_empty() {
                continue;
            }
            params.push(key.into_owned(), value.into_owned());
        }
        params
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.entry(key.into()).or_default().push(value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.params.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Path variables and query parameters for one request.
///
/// Each transport builds one of these from its native request shape and
/// hands it to the resource; it is dropped when the request completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    vars: HashMap<String, String>,
    query: QueryParams,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_groups_repeated_keys() {
        let q = QueryParams::parse("make=ford&year=1999&year=2001");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get("make"), Some(&["ford".to_string()][..]));
        assert_eq!(
            q.get("year"),
            Some(&["1999".to_string(), "2001".to_string()][..])
        );
    }

    #[test]
    fn test_parse_decodes_and_skips_empty_keys() {
        let q = QueryParams::parse("?exterior_color=dark%20blue&=orphan&model=f+150");
        assert_eq!(q.get("exterior_color"), Some(&["dark blue".to_string()][..]));
        assert_eq!(q.get("model"), Some(&["f 150".to_string()][..]));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_parse_empty() {
        assert!(QueryParams::parse("").is_empty());
        assert!(QueryParams::parse("?").is_empty());
    }

    #[test]
    fn test_context_vars() {
        let ctx = RequestContext::new().with_var("vin", "V1");
        assert_eq!(ctx.var("vin"), Some("V1"));
        assert_eq!(ctx.var("missing"), None);
        assert!(ctx.query().is_empty());
    }
}
