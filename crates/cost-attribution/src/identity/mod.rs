//! Workload identity index.
//!
//! A read-only snapshot of every cluster, node, namespace and label pair seen
//! in the workload dataset. Built once per run with [`IdentityIndexBuilder`]
//! and frozen into a [`WorkloadIdentityIndex`], which has no mutating methods
//! and can be shared across worker threads by reference.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::records::WorkloadRecord;
use crate::tags::{format_label_pair, parse_label_payload};

/// One facet of the identity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityFacet {
    ClusterId,
    ClusterAlias,
    Node,
    Namespace,
    PodLabel,
    VolumeLabel,
}

impl std::fmt::Display for IdentityFacet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClusterId => write!(f, "cluster_id"),
            Self::ClusterAlias => write!(f, "cluster_alias"),
            Self::Node => write!(f, "node"),
            Self::Namespace => write!(f, "namespace"),
            Self::PodLabel => write!(f, "pod_label"),
            Self::VolumeLabel => write!(f, "volume_label"),
        }
    }
}

/// Summary of an index build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuildReport {
    /// Workload records read.
    pub workload_records: u64,
    /// Label payloads that failed to parse (contributed no labels).
    pub label_parse_failures: u64,
}

/// Frozen set of known workload identity values.
#[derive(Debug, Clone, Default)]
pub struct WorkloadIdentityIndex {
    cluster_ids: HashSet<String>,
    cluster_aliases: HashSet<String>,
    node_names: HashSet<String>,
    namespaces: HashSet<String>,
    pod_label_pairs: HashSet<String>,
    volume_label_pairs: HashSet<String>,
    report: IndexBuildReport,
}

impl WorkloadIdentityIndex {
    /// Start building an index.
    #[must_use]
    pub fn builder() -> IdentityIndexBuilder {
        IdentityIndexBuilder::default()
    }

    /// Build an index from workload records in one pass.
    pub fn build<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkloadRecord>,
    {
        let mut builder = Self::builder();
        for record in records {
            builder.add(record);
        }
        builder.build()
    }

    /// The value set for a facet. Empty when the workload data had none.
    #[must_use]
    pub fn facet(&self, facet: IdentityFacet) -> &HashSet<String> {
        match facet {
            IdentityFacet::ClusterId => &self.cluster_ids,
            IdentityFacet::ClusterAlias => &self.cluster_aliases,
            IdentityFacet::Node => &self.node_names,
            IdentityFacet::Namespace => &self.namespaces,
            IdentityFacet::PodLabel => &self.pod_label_pairs,
            IdentityFacet::VolumeLabel => &self.volume_label_pairs,
        }
    }

    /// Whether a facet contains a value.
    #[must_use]
    pub fn contains(&self, facet: IdentityFacet, value: &str) -> bool {
        self.facet(facet).contains(value)
    }

    /// Build summary.
    #[must_use]
    pub fn report(&self) -> IndexBuildReport {
        self.report
    }

    /// Whether every facet is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cluster_ids.is_empty()
            && self.cluster_aliases.is_empty()
            && self.node_names.is_empty()
            && self.namespaces.is_empty()
            && self.pod_label_pairs.is_empty()
            && self.volume_label_pairs.is_empty()
    }
}

/// Mutable accumulator for a [`WorkloadIdentityIndex`].
#[derive(Debug, Default)]
pub struct IdentityIndexBuilder {
    index: WorkloadIdentityIndex,
}

impl IdentityIndexBuilder {
    /// Add one workload record.
    ///
    /// A label payload that fails to parse contributes no labels and is
    /// counted in the build report.
    pub fn add(&mut self, record: &WorkloadRecord) {
        let index = &mut self.index;
        index.report.workload_records += 1;

        insert_non_empty(&mut index.cluster_ids, record.cluster_id.as_deref());
        insert_non_empty(&mut index.cluster_aliases, record.cluster_alias.as_deref());
        insert_non_empty(&mut index.node_names, record.node.as_deref());
        insert_non_empty(&mut index.namespaces, record.namespace.as_deref());

        if !insert_labels(&mut index.pod_label_pairs, record.pod_labels.as_deref()) {
            index.report.label_parse_failures += 1;
        }
        if !insert_labels(&mut index.volume_label_pairs, record.volume_labels.as_deref()) {
            index.report.label_parse_failures += 1;
        }
    }

    /// Freeze the index.
    #[must_use]
    pub fn build(self) -> WorkloadIdentityIndex {
        let index = self.index;
        info!(
            workload_records = index.report.workload_records,
            clusters = index.cluster_ids.len(),
            cluster_aliases = index.cluster_aliases.len(),
            nodes = index.node_names.len(),
            namespaces = index.namespaces.len(),
            pod_labels = index.pod_label_pairs.len(),
            volume_labels = index.volume_label_pairs.len(),
            label_parse_failures = index.report.label_parse_failures,
            "Built workload identity index"
        );
        index
    }
}

fn insert_non_empty(set: &mut HashSet<String>, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        if !set.contains(value) {
            set.insert(value.to_string());
        }
    }
}

/// Returns `false` if the payload could not be parsed.
fn insert_labels(set: &mut HashSet<String>, payload: Option<&str>) -> bool {
    let Some(payload) = payload else {
        return true;
    };
    match parse_label_payload(payload) {
        Ok(pairs) => {
            set.extend(pairs.iter().map(|(k, v)| format_label_pair(k, v)));
            true
        }
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable workload labels");
            false
        }
    }
}
