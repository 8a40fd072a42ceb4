//! Allow-list matching for remote image origins.

use url::Url;

/// One allowed remote origin: a host, optionally `*.`-wildcarded, and a path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedOrigin {
    /// Host, possibly with an explicit port, e.g. `cdn.example.org` or `*.example.org`
    pub host: String,

    /// Path prefix ending in `/`, or empty for no path constraint
    pub path: String,
}

impl AllowedOrigin {
    /// Parse `scheme://host/path`, `host/path` or a bare host.
    ///
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let without_scheme = match raw.find("://") {
            Some(idx) => &raw[idx + 3..],
            None => raw,
        };

        let (host, path) = match without_scheme.find('/') {
            Some(idx) => without_scheme.split_at(idx),
            None => (without_scheme, ""),
        };

        if host.is_empty() {
            return None;
        }

        let mut path = path.to_string();
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }

        Some(Self {
            host: host.to_ascii_lowercase(),
            path,
        })
    }

    /// Whether this origin accepts the given host and path.
    pub fn matches(&self, host: &str, path: &str) -> bool {
        let host_matches = match self.host.strip_prefix("*.") {
            Some(parent) => {
                host == parent
                    || host
                        .strip_suffix(parent)
                        .is_some_and(|sub| sub.ends_with('.') && sub.len() > 1)
            }
            None => self.host == host,
        };

        host_matches && path.starts_with(&self.path)
    }
}

/// Parse a comma-separated list of origins, skipping blank entries.
pub fn parse_origins(raw: &str) -> Vec<AllowedOrigin> {
    raw.split(',').filter_map(AllowedOrigin::parse).collect()
}

/// Check a remote URL against the allow-list. An empty list allows everything.
pub fn is_origin_allowed(candidate: &Url, origins: &[AllowedOrigin]) -> bool {
    if origins.is_empty() {
        return true;
    }

    let Some(host) = candidate.host_str() else {
        return false;
    };
    let host = match candidate.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    origins
        .iter()
        .any(|origin| origin.matches(&host, candidate.path()))
}
