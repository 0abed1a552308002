//! Endpoint and cluster-source data model.

use std::collections::HashSet;
use url::Url;

/// A single reachable instance of a monitored cluster. Identity for dedup
/// purposes is `(url, token, insecure_tls)` — the same triple twice in one
/// `ClusterSource` is a configuration error, not two endpoints.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub token: String,
    pub insecure_tls: bool,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, token: impl Into<String>, insecure_tls: bool) -> Self {
        Self {
            url: canonicalize(&url.into()),
            token: token.into(),
            insecure_tls,
        }
    }

    fn dedup_key(&self) -> (&str, &str, bool) {
        (&self.url, &self.token, self.insecure_tls)
    }
}

/// Lowercases scheme+host and strips a single trailing slash so that
/// `https://Node:8006/` and `https://node:8006` dedup to the same endpoint.
fn canonicalize(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            let _ = url.set_scheme(&url.scheme().to_ascii_lowercase());
            if let Some(host) = url.host_str() {
                let host = host.to_ascii_lowercase();
                let _ = url.set_host(Some(&host));
            }
            let mut s = url.to_string();
            if s.ends_with('/') && s.matches('/').count() <= 3 {
                s.pop();
            }
            s
        }
        Err(_) => raw.trim_end_matches('/').to_string(),
    }
}

/// An ordered, deduplicated set of endpoints fronting one logical cluster.
/// Endpoints only change at reconfiguration; nothing in the cluster client
/// mutates this set at runtime.
#[derive(Debug, Clone)]
pub struct ClusterSource {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

impl ClusterSource {
    /// Builds a source, silently dropping endpoints that duplicate an
    /// earlier one in the input (first occurrence wins, order preserved).
    pub fn new(name: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        let mut seen: HashSet<(String, String, bool)> = HashSet::new();
        let mut deduped = Vec::with_capacity(endpoints.len());
        for ep in endpoints {
            let key = (ep.url.clone(), ep.token.clone(), ep.insecure_tls);
            if seen.insert(key) {
                deduped.push(ep);
            }
        }
        Self {
            name: name.into(),
            endpoints: deduped,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_endpoints_are_deduplicated() {
        let source = ClusterSource::new(
            "dc1",
            vec![
                Endpoint::new("https://Node-A:8006", "tok", false),
                Endpoint::new("https://node-a:8006/", "tok", false),
                Endpoint::new("https://node-a:8006", "tok", true),
            ],
        );
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn canonicalization_is_case_insensitive_on_host() {
        let a = Endpoint::new("https://NODE-A.example.com:8006", "t", false);
        let b = Endpoint::new("https://node-a.example.com:8006", "t", false);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
