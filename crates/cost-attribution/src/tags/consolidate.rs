//! Consolidation of sparse tag columns into one canonical map.

use std::collections::BTreeSet;

use tracing::trace;

use super::labels::parse_label_payload;
use super::SpecialTag;
use crate::records::{CostRecord, RawTagColumns, TagMap};

/// Prefix marking a user tag column; the tag name is the remainder.
pub const DEFAULT_TAG_COLUMN_PREFIX: &str = "resource_tags_user_";

/// Columns used as tags under their own name.
///
/// The special identity keys come first, followed by common cost-attribution
/// labels.
pub const DEFAULT_DIRECT_TAG_COLUMNS: &[&str] = &[
    SpecialTag::Cluster.key(),
    SpecialTag::Node.key(),
    SpecialTag::Namespace.key(),
    "app",
    "application",
    "environment",
    "cost_center",
    "team",
    "owner",
    "project",
];

/// Yield `(tag, value)` for every column carrying `prefix`, with the prefix stripped.
pub fn prefixed_columns<'a>(
    columns: &'a RawTagColumns,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a str, Option<&'a str>)> + 'a {
    columns.iter().filter_map(move |(name, value)| {
        name.strip_prefix(prefix)
            .filter(|tag| !tag.is_empty())
            .map(|tag| (tag, value.as_deref()))
    })
}

/// Yield `(column, value)` for every column in the direct allow-list.
pub fn direct_columns<'a>(
    columns: &'a RawTagColumns,
    allowed: &'a BTreeSet<String>,
) -> impl Iterator<Item = (&'a str, Option<&'a str>)> + 'a {
    columns
        .iter()
        .filter(|(name, _)| allowed.contains(name.as_str()))
        .map(|(name, value)| (name.as_str(), value.as_deref()))
}

/// Accumulates tag entries from any number of sources.
///
/// Null and empty values are skipped. The first source to supply a key wins.
#[derive(Debug, Clone, Default)]
pub struct TagMapBuilder {
    tags: TagMap,
}

impl TagMapBuilder {
    /// Start from an existing map.
    #[must_use]
    pub fn from_map(tags: TagMap) -> Self {
        Self { tags }
    }

    /// Add one entry.
    pub fn push(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(value) if !key.is_empty() && !value.is_empty() => {
                self.tags
                    .entry(key.to_string())
                    .or_insert_with(|| value.to_string());
            }
            _ => {}
        }
    }

    /// Add every entry from a source.
    #[must_use]
    pub fn extend<'a, I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        for (key, value) in entries {
            self.push(key, value);
        }
        self
    }

    /// Finish and return the map.
    #[must_use]
    pub fn build(self) -> TagMap {
        self.tags
    }
}

/// Merges the sparse tag sources of a record into `consolidated_tags`.
#[derive(Debug, Clone)]
pub struct TagConsolidator {
    prefix: String,
    direct: BTreeSet<String>,
    enabled: BTreeSet<String>,
}

impl Default for TagConsolidator {
    fn default() -> Self {
        Self::new(
            DEFAULT_TAG_COLUMN_PREFIX,
            DEFAULT_DIRECT_TAG_COLUMNS.iter().copied(),
        )
    }
}

impl TagConsolidator {
    /// Create a consolidator with a custom prefix and direct column allow-list.
    pub fn new<I, S>(prefix: impl Into<String>, direct: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            direct: direct.into_iter().map(Into::into).collect(),
            enabled: BTreeSet::new(),
        }
    }

    /// Keep only these tag keys in the consolidated map. Empty keeps every key.
    #[must_use]
    pub fn with_enabled_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Consolidate the record's raw tag sources.
    ///
    /// The raw columns and payload are dropped afterwards; the consolidated
    /// map is the only surviving form, restricted to the enabled keys.
    /// Running this twice is a no-op.
    ///
    /// A malformed payload leaves the record with no tags at all and sets
    /// `tag_parse_failed`.
    #[must_use]
    pub fn consolidate(&self, mut record: CostRecord) -> CostRecord {
        if record.has_raw_tags() {
            let raw = std::mem::take(&mut record.raw_tag_columns);
            let payload = record.raw_tag_payload.take();

            let pairs = match payload.as_deref().map(parse_label_payload).transpose() {
                Ok(pairs) => pairs.unwrap_or_default(),
                Err(e) => {
                    trace!(error = %e, "Discarding tags of record with unparseable payload");
                    record.tag_parse_failed = true;
                    record.consolidated_tags = TagMap::new();
                    return record;
                }
            };

            let mut builder =
                TagMapBuilder::from_map(std::mem::take(&mut record.consolidated_tags))
                    .extend(prefixed_columns(&raw, &self.prefix))
                    .extend(direct_columns(&raw, &self.direct));
            for (key, value) in &pairs {
                builder.push(key, Some(value.as_str()));
            }
            record.consolidated_tags = builder.build();
        }

        if !self.enabled.is_empty() {
            record
                .consolidated_tags
                .retain(|key, _| self.enabled.contains(key));
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> CostRecord {
        CostRecord::new("AmazonEC2", "Usage", Utc::now())
    }

    #[test]
    fn test_prefixed_and_direct_columns_merge() {
        let rec = record()
            .with_tag_column("resource_tags_user_app", Some("web"))
            .with_tag_column("resource_tags_user_team", Some(""))
            .with_tag_column("resource_tags_user_owner", None)
            .with_tag_column("openshift_cluster", Some("c1"))
            .with_tag_column("unrelated_column", Some("ignored"));

        let out = TagConsolidator::default().consolidate(rec);

        assert_eq!(out.consolidated_tags.len(), 2);
        assert_eq!(out.consolidated_tags["app"], "web");
        assert_eq!(out.consolidated_tags["openshift_cluster"], "c1");
        assert!(out.raw_tag_columns.is_empty());
    }

    #[test]
    fn test_no_tags_yields_empty_map() {
        let rec = record().with_tag_column("resource_tags_user_app", None);
        let out = TagConsolidator::default().consolidate(rec);
        assert!(out.consolidated_tags.is_empty());
        assert_eq!(out.consolidated_tags_json().unwrap(), "{}");
    }

    #[test]
    fn test_prefixed_column_wins_over_direct() {
        let rec = record()
            .with_tag_column("resource_tags_user_app", Some("from-prefix"))
            .with_tag_column("app", Some("from-direct"));
        let out = TagConsolidator::default().consolidate(rec);
        assert_eq!(out.consolidated_tags["app"], "from-prefix");
    }

    #[test]
    fn test_payload_is_consolidated() {
        let rec = record()
            .with_tag_column("resource_tags_user_app", Some("web"))
            .with_tag_payload(r#"{"team":"core","app":"other"}"#);
        let out = TagConsolidator::default().consolidate(rec);
        assert_eq!(out.consolidated_tags["app"], "web");
        assert_eq!(out.consolidated_tags["team"], "core");
        assert!(out.raw_tag_payload.is_none());
        assert!(!out.tag_parse_failed);
    }

    #[test]
    fn test_bad_payload_flags_record() {
        let rec = record()
            .with_tag_column("resource_tags_user_app", Some("web"))
            .with_tag_payload("{broken");
        let out = TagConsolidator::default().consolidate(rec);
        assert!(out.tag_parse_failed);
        assert!(out.consolidated_tags.is_empty());
        assert!(!out.has_raw_tags());
    }

    #[test]
    fn test_rerun_is_noop() {
        let consolidator = TagConsolidator::default();
        let once = consolidator.consolidate(
            record().with_tag_column("resource_tags_user_app", Some("web")),
        );
        let twice = consolidator.consolidate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_enabled_keys_filter_consolidated_map() {
        let consolidator = TagConsolidator::default().with_enabled_keys(["openshift_node"]);
        let rec = record()
            .with_tag_column("resource_tags_user_app", Some("web"))
            .with_tag_column("openshift_node", Some("n1"));

        let out = consolidator.consolidate(rec);
        assert_eq!(out.consolidated_tags.len(), 1);
        assert_eq!(out.consolidated_tags["openshift_node"], "n1");
        assert!(!out.consolidated_tags.contains_key("app"));

        // already-consolidated records are filtered too
        let mut pre = record();
        pre.consolidated_tags.insert("team".to_string(), "core".to_string());
        assert!(consolidator.consolidate(pre).consolidated_tags.is_empty());
    }

    #[test]
    fn test_custom_prefix() {
        let consolidator = TagConsolidator::new("tag_", ["node"]);
        let rec = record()
            .with_tag_column("tag_env", Some("prod"))
            .with_tag_column("node", Some("n1"))
            .with_tag_column("openshift_node", Some("ignored"));
        let out = consolidator.consolidate(rec);
        assert_eq!(out.consolidated_tags.len(), 2);
        assert_eq!(out.consolidated_tags["env"], "prod");
        assert_eq!(out.consolidated_tags["node"], "n1");
    }
}
