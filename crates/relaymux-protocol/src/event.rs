//! Event and filter types.
//!
//! Events are opaque to the pool apart from their identifier; filters are
//! passed through to relays untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An event identifier (lowercase hex in practice).
pub type EventId = String;

/// A signed relay event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Author public key.
    pub pubkey: String,
    /// Creation time in unix seconds.
    pub created_at: u64,
    /// Event kind.
    pub kind: u32,
    /// Tags, each a list of strings with the tag name first.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Event content.
    #[serde(default)]
    pub content: String,
    /// Signature over the event id.
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// Values of every tag with the given name.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }
}

/// A subscription filter.
///
/// Tag filters (`#e`, `#p`, ...) and any relay-specific extensions are kept
/// in `extra` so they survive a round trip unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Match events with one of these ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<EventId>>,
    /// Match events from one of these authors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    /// Match events of one of these kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    /// Match events created at or after this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Match events created at or before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    /// Maximum number of stored events to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Tag filters and extensions.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Filter {
    /// Create an empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given ids.
    #[must_use]
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to the given authors.
    #[must_use]
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to the given kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Set the lower time bound.
    #[must_use]
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Set the upper time bound.
    #[must_use]
    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Set the stored-event limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a single-letter tag filter, serialized as `#<letter>`.
    #[must_use]
    pub fn tag<I, S>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<Value> = values
            .into_iter()
            .map(|v| Value::String(v.into()))
            .collect();
        self.extra.insert(format!("#{letter}"), Value::Array(values));
        self
    }

    /// Check whether an event satisfies this filter.
    ///
    /// `limit` and unknown extension keys are not evaluated.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| *id == event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| *a == event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.extra.iter().all(|(key, wanted)| {
            let Some(name) = key.strip_prefix('#') else {
                return true;
            };
            let Some(wanted) = wanted.as_array() else {
                return true;
            };
            event
                .tag_values(name)
                .any(|value| wanted.iter().any(|w| w.as_str() == Some(value)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, kind: u32, created_at: u64) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "alice".to_string(),
            created_at,
            kind,
            tags: vec![vec!["e".to_string(), "root".to_string()]],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_filter_serializes_tags_flat() {
        let filter = Filter::new().kinds([1]).tag('e', ["root"]).limit(5);
        let json = serde_json::to_value(&filter).unwrap();

        assert_eq!(json["kinds"], serde_json::json!([1]));
        assert_eq!(json["#e"], serde_json::json!(["root"]));
        assert_eq!(json["limit"], 5);
        assert!(json.get("ids").is_none());
    }

    #[test]
    fn test_filter_keeps_unknown_keys() {
        let filter: Filter =
            serde_json::from_str(r#"{"kinds":[1],"search":"rust"}"#).unwrap();
        assert_eq!(filter.kinds, Some(vec![1]));
        assert_eq!(filter.extra["search"], "rust");
    }

    #[test]
    fn test_filter_matches() {
        let ev = event("a1", 1, 100);

        assert!(Filter::new().matches(&ev));
        assert!(Filter::new().kinds([1, 7]).matches(&ev));
        assert!(!Filter::new().kinds([7]).matches(&ev));
        assert!(!Filter::new().since(101).matches(&ev));
        assert!(!Filter::new().until(99).matches(&ev));
        assert!(Filter::new().authors(["alice"]).ids(["a1"]).matches(&ev));
        assert!(Filter::new().tag('e', ["root"]).matches(&ev));
        assert!(!Filter::new().tag('e', ["other"]).matches(&ev));
        assert!(!Filter::new().tag('p', ["root"]).matches(&ev));
    }
}
