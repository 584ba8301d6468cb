//! The request attributes rules are evaluated against.

use std::{collections::BTreeMap, net::IpAddr};

/// Network-level view of an inbound request.
///
/// Header names are case-insensitive and stored lowercased; when a header is
/// set twice the last value wins.
///
/// # Example
///
/// ```
/// use pointgate_admission::RequestContext;
///
/// let ctx = RequestContext::new("203.0.113.7".parse().unwrap())
///     .with_method("POST")
///     .with_uri_path("/graphql")
///     .with_header("X-Api-Key", "da2-abc");
///
/// assert_eq!(ctx.header("x-api-key"), Some("da2-abc"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    source_ip: IpAddr,
    method: String,
    uri_path: String,
    query_string: String,
    headers: BTreeMap<String, String>,
}

impl RequestContext {
    /// Creates a context for a `POST /` request from `source_ip` with no headers.
    #[must_use]
    pub fn new(source_ip: IpAddr) -> Self {
        Self {
            source_ip: source_ip.to_canonical(),
            method: "POST".to_owned(),
            uri_path: "/".to_owned(),
            query_string: String::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Sets a header, replacing any previous value for the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the URI path.
    #[must_use]
    pub fn with_uri_path(mut self, path: impl Into<String>) -> Self {
        self.uri_path = path.into();
        self
    }

    /// Sets the raw query string, without the leading `?`.
    #[must_use]
    pub fn with_query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    /// Source address of the connection. IPv4-mapped IPv6 addresses are
    /// reported as IPv4.
    #[must_use]
    pub fn source_ip(&self) -> IpAddr {
        self.source_ip
    }

    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(value) => Some(value),
            None => self.headers.get(&name.to_ascii_lowercase()).map(String::as_str),
        }
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// URI path.
    #[must_use]
    pub fn uri_path(&self) -> &str {
        &self.uri_path
    }

    /// Raw query string.
    #[must_use]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Iterates headers as `(lowercase name, value)` pairs.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
