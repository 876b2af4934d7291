//! Tag consolidation and label parsing.
//!
//! Billing exports carry user tags in two column naming schemes: prefixed
//! columns (`resource_tags_user_<name>`) and a fixed allow-list of direct
//! columns. A record may also carry a whole-record payload. All three feed a
//! single [`TagMapBuilder`] through iterator adapters, producing one
//! canonical [`TagMap`](crate::records::TagMap) per record.

mod consolidate;
mod labels;

pub use consolidate::{
    direct_columns, prefixed_columns, TagConsolidator, TagMapBuilder, DEFAULT_DIRECT_TAG_COLUMNS,
    DEFAULT_TAG_COLUMN_PREFIX,
};
pub use labels::{format_label_pair, parse_label_payload};

/// Tags with a dedicated match rule, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialTag {
    /// Cluster id or alias.
    Cluster,
    /// Node name.
    Node,
    /// Namespace name.
    Namespace,
}

impl SpecialTag {
    /// All special tags, in match priority order.
    pub const ALL: [Self; 3] = [Self::Cluster, Self::Node, Self::Namespace];

    /// The tag key carrying this identity.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Cluster => "openshift_cluster",
            Self::Node => "openshift_node",
            Self::Namespace => "openshift_project",
        }
    }

    /// Look up the special tag for a key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == key)
    }

    /// Whether a key is one of the special tag keys.
    #[must_use]
    pub fn is_special(key: &str) -> bool {
        Self::from_key(key).is_some()
    }
}

impl std::fmt::Display for SpecialTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}
