//! Tag-based matching of cost records to workload identities.
//!
//! Records not already matched by resource id are checked against the
//! [`WorkloadIdentityIndex`] in a fixed priority order. The first satisfied
//! rule wins:
//!
//! 1. cluster tag value is a known cluster id
//! 2. cluster tag value is a known cluster alias
//! 3. node tag value is a known node
//! 4. namespace tag value is a known namespace
//! 5. any other `key=value` tag is a known pod label
//! 6. any other `key=value` tag is a known volume label
//!
//! No match is a normal outcome; that cost ends up unattributed downstream.
//! The engine sees only the tags left after consolidation has applied
//! `enabled_tag_keys`.

mod stats;

use std::sync::Arc;

use crate::identity::{IdentityFacet, WorkloadIdentityIndex};
use crate::records::{CostRecord, MatchedIdentityKind, TagMap, TagMatch};
use crate::tags::{format_label_pair, SpecialTag};

pub use stats::{MatchStats, QualityWarning};

/// Suffix distinguishing an alias match from a direct cluster id match.
pub const ALIAS_QUALIFIER: &str = "(alias)";

/// Special-tag rules in priority order.
const SPECIAL_TAG_RULES: &[(SpecialTag, IdentityFacet, MatchedIdentityKind)] = &[
    (SpecialTag::Cluster, IdentityFacet::ClusterId, MatchedIdentityKind::Cluster),
    (SpecialTag::Cluster, IdentityFacet::ClusterAlias, MatchedIdentityKind::ClusterAlias),
    (SpecialTag::Node, IdentityFacet::Node, MatchedIdentityKind::Node),
    (SpecialTag::Namespace, IdentityFacet::Namespace, MatchedIdentityKind::Namespace),
];

/// Generic label rules in priority order.
const LABEL_RULES: &[(IdentityFacet, MatchedIdentityKind)] = &[
    (IdentityFacet::PodLabel, MatchedIdentityKind::PodLabel),
    (IdentityFacet::VolumeLabel, MatchedIdentityKind::VolumeLabel),
];

/// What happened to a record in the match stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Matched upstream by resource id; never evaluated.
    ResourceMatched,
    /// Matched by tag. `fresh` is false when the match came from a prior run.
    TagMatched {
        kind: MatchedIdentityKind,
        fresh: bool,
    },
    /// No rule matched.
    Unmatched,
}

/// Matches cost records to workload identities by tag.
#[derive(Debug, Clone)]
pub struct MatchEngine {
    index: Arc<WorkloadIdentityIndex>,
}

impl MatchEngine {
    /// Create an engine over a frozen index.
    #[must_use]
    pub fn new(index: Arc<WorkloadIdentityIndex>) -> Self {
        Self { index }
    }

    /// The index this engine matches against.
    #[must_use]
    pub fn index(&self) -> &WorkloadIdentityIndex {
        &self.index
    }

    /// Evaluate the match rules against a tag map.
    #[must_use]
    pub fn evaluate(&self, tags: &TagMap) -> Option<TagMatch> {
        for &(tag, facet, kind) in SPECIAL_TAG_RULES {
            let key = tag.key();
            let Some(value) = tags.get(key) else {
                continue;
            };
            if self.index.contains(facet, value) {
                let identity = if kind == MatchedIdentityKind::ClusterAlias {
                    format!("{value} {ALIAS_QUALIFIER}")
                } else {
                    value.clone()
                };
                return Some(TagMatch {
                    kind,
                    value: identity,
                    tag: format_label_pair(key, value),
                });
            }
        }

        for &(facet, kind) in LABEL_RULES {
            let labels = self.index.facet(facet);
            if labels.is_empty() {
                continue;
            }
            let found = tags
                .iter()
                .filter(|(key, _)| !SpecialTag::is_special(key))
                .map(|(key, value)| format_label_pair(key, value))
                .find(|pair| labels.contains(pair));

            if let Some(pair) = found {
                return Some(TagMatch {
                    kind,
                    value: pair.clone(),
                    tag: pair,
                });
            }
        }

        None
    }

    /// Match one record.
    ///
    /// Records already tag-matched by a previous run are returned untouched.
    /// Records matched by resource id are never evaluated, and any tag match
    /// they carry is cleared.
    #[must_use]
    pub fn apply(&self, mut record: CostRecord) -> (CostRecord, MatchOutcome) {
        if record.resource_matched {
            record.tag_match = None;
            return (record, MatchOutcome::ResourceMatched);
        }
        if let Some(existing) = &record.tag_match {
            let kind = existing.kind;
            return (record, MatchOutcome::TagMatched { kind, fresh: false });
        }

        match self.evaluate(&record.consolidated_tags) {
            Some(tag_match) => {
                let kind = tag_match.kind;
                record.tag_match = Some(tag_match);
                (record, MatchOutcome::TagMatched { kind, fresh: true })
            }
            None => (record, MatchOutcome::Unmatched),
        }
    }
}
