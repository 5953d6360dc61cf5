//! Endpoint normalization.
//!
//! Relay addresses arrive in many spellings; the pool keys connections by a
//! canonical form so that `wss://relay.example:443//` and
//! `wss://relay.example` share one connection.

use crate::error::PoolError;
use std::borrow::Borrow;
use std::fmt;
use url::Url;

/// A canonical relay endpoint identifier.
///
/// Only [`normalize`] produces these, so two equal ids always refer to the
/// same pool slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EndpointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EndpointId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Well-known default port for a scheme.
fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "ws" | "http" => Some(80),
        "wss" | "https" => Some(443),
        _ => None,
    }
}

/// Normalize a raw relay address into its canonical [`EndpointId`].
///
/// Rules, in order: collapse repeated `/` in the path, drop a trailing `/`,
/// drop the scheme's default port, sort query parameters by key, strip the
/// fragment. Normalizing an already-normalized id returns it unchanged.
///
/// # Errors
///
/// Returns [`PoolError::InvalidAddress`] if `raw` is not an absolute URL
/// with a host.
pub fn normalize(raw: &str) -> Result<EndpointId, PoolError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| PoolError::invalid_address(raw, e.to_string()))?;

    if url.cannot_be_a_base() || url.host_str().map_or(true, str::is_empty) {
        return Err(PoolError::invalid_address(raw, "address has no host"));
    }

    let mut path = collapse_slashes(url.path());
    if path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    if url.port().is_some() && url.port() == default_port(url.scheme()) {
        // Only fails for hostless URLs, excluded above.
        let _ = url.set_port(None);
    }

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    url.set_fragment(None);

    Ok(EndpointId(url.into()))
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        normalize(raw).unwrap().to_string()
    }

    #[test]
    fn test_equivalent_addresses_collapse() {
        assert_eq!(
            normalize("wss://r.example:443/a//b/").unwrap(),
            normalize("wss://r.example/a/b").unwrap()
        );
        assert_eq!(norm("wss://r.example:443/a//b/"), "wss://r.example/a/b");
    }

    #[test]
    fn test_default_ports_dropped() {
        assert_eq!(norm("ws://r.example:80"), "ws://r.example/");
        assert_eq!(norm("wss://r.example:443"), "wss://r.example/");
        assert_eq!(norm("wss://r.example:80"), "wss://r.example:80/");
        assert_eq!(norm("ws://r.example:7777/"), "ws://r.example:7777/");
    }

    #[test]
    fn test_query_sorted_and_fragment_stripped() {
        assert_eq!(
            norm("wss://r.example/path?b=2&a=1#frag"),
            "wss://r.example/path?a=1&b=2"
        );
        assert_eq!(norm("wss://r.example/?"), "wss://r.example/");
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(norm("  WSS://R.Example/Inbox/ "), "wss://r.example/Inbox");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in [
            "wss://r.example:443/a//b/",
            "ws://r.example:8080//x///y?z=1&a=2&a=0#f",
            "wss://r.example",
            "wss://r.example/?q=hello%20world",
        ] {
            let once = normalize(raw).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(matches!(
            normalize("not a url"),
            Err(PoolError::InvalidAddress { .. })
        ));
        assert!(matches!(
            normalize("mailto:someone@example.com"),
            Err(PoolError::InvalidAddress { .. })
        ));
        assert!(normalize("").is_err());
    }
}
