use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// The wire and storage representation of a document's tags: a flat
/// string-to-string map. Specific keys carry typed meaning (see
/// [`SystemTags`]) but "tags are data" all the way down, per spec §9.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set `key = value`. An empty value deletes the key (spec I3).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }

    /// Keys starting with `_` are system-managed; user writes must not set
    /// them directly (spec I2).
    #[must_use]
    pub fn is_system_key(key: &str) -> bool {
        key.starts_with('_')
    }

    /// Drop every system-managed key. Applied to caller-supplied tags before
    /// they enter the merge (spec I2, Phase A.3).
    #[must_use]
    pub fn strip_system(&self) -> Tags {
        Tags(
            self.0
                .iter()
                .filter(|(k, _)| !Tags::is_system_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Apply `overlay` on top of `self`: later values win, empty-string
    /// values delete the key, matching I3's "setting a key to empty string
    /// deletes it" for every layer of the merge.
    #[must_use]
    pub fn apply_overlay(&self, overlay: &Tags) -> Tags {
        let mut merged = self.clone();
        for (key, value) in overlay.iter() {
            merged.set(key.clone(), value.clone());
        }
        merged
    }

    /// Fold layers left to right, later wins, per Phase A.3's fixed priority
    /// order: existing doc tags → defaults → environment → caller → system.
    #[must_use]
    pub fn merge_layers<I>(layers: I) -> Tags
    where
        I: IntoIterator<Item = Tags>,
    {
        let mut acc = Tags::new();
        for layer in layers {
            acc = acc.apply_overlay(&layer);
        }
        acc
    }

    #[must_use]
    pub fn matches_filter(&self, filter: &TagFilter) -> bool {
        filter.0.iter().all(|(key, expected)| match expected {
            Some(value) => self.get(key) == Some(value.as_str()),
            None => self.contains_key(key),
        })
    }
}

impl FromIterator<(String, String)> for Tags {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Tags(iter.into_iter().collect())
    }
}

/// An AND-set of `key=value` equalities or bare key-presence checks, applied
/// both by DocStore's `list`/`find` and by VectorStore's pre-filter (spec
/// §4.1, §4.3). `None` means "key must be present, any value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter(BTreeMap<String, Option<String>>);

impl TagFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    #[must_use]
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), None);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<String>)> {
        self.0.iter()
    }
}

/// Typed view over [`Tags`] for the handful of keys the engine itself reads
/// and writes, per spec §9 "Dynamic typing of tags": the wire format stays a
/// flat string map, but call sites use `SystemTags` rather than repeating
/// string literals for `_created`, `_updated`, and friends.
pub struct SystemTags<'a>(pub &'a Tags);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagSource {
    Inline,
    Uri,
    AutoVivify,
    Import,
}

impl TagSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TagSource::Inline => "inline",
            TagSource::Uri => "uri",
            TagSource::AutoVivify => "auto-vivify",
            TagSource::Import => "import",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(TagSource::Inline),
            "uri" => Some(TagSource::Uri),
            "auto-vivify" => Some(TagSource::AutoVivify),
            "import" => Some(TagSource::Import),
            _ => None,
        }
    }
}

impl<'a> SystemTags<'a> {
    #[must_use]
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.0.get("_created").and_then(parse_timestamp)
    }

    #[must_use]
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.0.get("_updated").and_then(parse_timestamp)
    }

    #[must_use]
    pub fn updated_date(&self) -> Option<NaiveDate> {
        self.0.get("_updated_date").and_then(|v| v.parse().ok())
    }

    #[must_use]
    pub fn accessed(&self) -> Option<DateTime<Utc>> {
        self.0.get("_accessed").and_then(parse_timestamp)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&'a str> {
        self.0.get("_content_type")
    }

    #[must_use]
    pub fn source(&self) -> Option<TagSource> {
        self.0.get("_source").and_then(TagSource::parse)
    }

    #[must_use]
    pub fn embed_pending(&self) -> bool {
        self.0.get("_embed_pending") == Some("1")
    }

    #[must_use]
    pub fn error(&self) -> Option<&'a str> {
        self.0.get("_error")
    }

    #[must_use]
    pub fn constrained(&self) -> bool {
        self.0.get("_constrained") == Some("true")
    }

    #[must_use]
    pub fn inverse(&self) -> Option<&'a str> {
        self.0.get("_inverse")
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Stamp the system-managed timestamp/source tags the engine computes on
/// every write (spec §4.1 Phase A.3 "system-computed tags", which users
/// cannot override per I2).
pub fn stamp_system_tags(tags: &mut Tags, created_at: DateTime<Utc>, now: DateTime<Utc>) {
    tags.set("_created", created_at.to_rfc3339());
    tags.set("_updated", now.to_rfc3339());
    tags.set("_updated_date", now.date_naive().to_string());
    tags.set("_accessed", now.to_rfc3339());
    tags.set("_accessed_date", now.date_naive().to_string());
}
