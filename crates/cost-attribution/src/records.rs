//! Record models consumed and produced by the attribution engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AttributionError, Result};

/// Canonical tag key/value map of a record.
///
/// Ordered so that label-pair matching walks tags deterministically.
pub type TagMap = BTreeMap<String, String>;

/// Sparse per-record tag columns as they arrive from the billing export.
///
/// `None` represents a null cell.
pub type RawTagColumns = BTreeMap<String, Option<String>>;

/// Column names understood by the engine.
pub mod columns {
    pub const RESOURCE_IDENTIFIER: &str = "resource_identifier";
    pub const PRODUCT_CODE: &str = "product_code";
    pub const USAGE_TYPE: &str = "usage_type";
    pub const OPERATION: &str = "operation";
    pub const PRODUCT_FAMILY: &str = "product_family";
    pub const LINE_ITEM_TYPE: &str = "line_item_type";
    pub const UNBLENDED_COST: &str = "unblended_cost";
    pub const BLENDED_COST: &str = "blended_cost";
    pub const SAVINGS_PLAN_EFFECTIVE_COST: &str = "savings_plan_effective_cost";
    pub const RAW_TAG_COLUMNS: &str = "raw_tag_columns";
    pub const RAW_TAG_PAYLOAD: &str = "raw_tag_payload";
    pub const USAGE_START: &str = "usage_start";

    /// Every column the engine knows about.
    pub const ALL: &[&str] = &[
        RESOURCE_IDENTIFIER,
        PRODUCT_CODE,
        USAGE_TYPE,
        OPERATION,
        PRODUCT_FAMILY,
        LINE_ITEM_TYPE,
        UNBLENDED_COST,
        BLENDED_COST,
        SAVINGS_PLAN_EFFECTIVE_COST,
        RAW_TAG_COLUMNS,
        RAW_TAG_PAYLOAD,
        USAGE_START,
    ];
}

/// Direction of a network data-transfer line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataTransferDirection {
    /// Inbound transfer.
    In,
    /// Outbound transfer.
    Out,
}

impl std::fmt::Display for DataTransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
        }
    }
}

/// Kind of workload identity a cost record was tag-matched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedIdentityKind {
    Cluster,
    ClusterAlias,
    Node,
    Namespace,
    PodLabel,
    VolumeLabel,
}

impl MatchedIdentityKind {
    /// All kinds, in match priority order.
    pub const ALL: [Self; 6] = [
        Self::Cluster,
        Self::ClusterAlias,
        Self::Node,
        Self::Namespace,
        Self::PodLabel,
        Self::VolumeLabel,
    ];
}

impl std::fmt::Display for MatchedIdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::ClusterAlias => write!(f, "cluster_alias"),
            Self::Node => write!(f, "node"),
            Self::Namespace => write!(f, "namespace"),
            Self::PodLabel => write!(f, "pod_label"),
            Self::VolumeLabel => write!(f, "volume_label"),
        }
    }
}

/// The outcome of a successful tag match.
///
/// Kind and value only exist together, so a record is tag-matched exactly
/// when it carries one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMatch {
    /// Which identity facet matched.
    pub kind: MatchedIdentityKind,
    /// The identity value (aliases carry an `(alias)` qualifier).
    pub value: String,
    /// The `key=value` tag that produced the match.
    pub tag: String,
}

/// One cloud-provider billing line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Provider-assigned resource id (for exact-match attribution upstream).
    pub resource_identifier: Option<String>,
    /// Product code (e.g. `AmazonEC2`).
    pub product_code: String,
    /// Usage type (e.g. `USE1-DataTransfer-Out-Bytes`).
    #[serde(default)]
    pub usage_type: Option<String>,
    /// Operation (e.g. `InterZone-In`).
    #[serde(default)]
    pub operation: Option<String>,
    /// Product family (e.g. `Data Transfer`).
    #[serde(default)]
    pub product_family: Option<String>,
    /// Line item type (e.g. `Usage`, `Tax`, `SavingsPlanCoveredUsage`).
    pub line_item_type: String,
    /// Unblended cost.
    pub unblended_cost: Decimal,
    /// Blended cost.
    pub blended_cost: Decimal,
    /// Savings-plan effective cost, if reported.
    #[serde(default)]
    pub savings_plan_effective_cost: Option<Decimal>,
    /// Sparse tag columns; drained by consolidation.
    #[serde(default)]
    pub raw_tag_columns: RawTagColumns,
    /// Whole-record tag payload (JSON object or `key:value|...`); drained by consolidation.
    #[serde(default)]
    pub raw_tag_payload: Option<String>,
    /// Start of the usage period.
    pub usage_start: DateTime<Utc>,

    /// Canonical tags produced by consolidation.
    #[serde(default)]
    pub consolidated_tags: TagMap,
    /// Set when the tag payload could not be parsed.
    #[serde(default)]
    pub tag_parse_failed: bool,
    /// Network transfer direction, for network records.
    #[serde(default)]
    pub data_transfer_direction: Option<DataTransferDirection>,
    /// Normalized cost figure across line item types.
    #[serde(default)]
    pub amortized_cost: Decimal,
    /// Set upstream when the resource id matched a workload resource.
    #[serde(default)]
    pub resource_matched: bool,
    /// Set by the match engine when a tag matched a workload identity.
    #[serde(default)]
    pub tag_match: Option<TagMatch>,
}

impl CostRecord {
    /// Create a record with zero costs and no tags.
    #[must_use]
    pub fn new(
        product_code: impl Into<String>,
        line_item_type: impl Into<String>,
        usage_start: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_identifier: None,
            product_code: product_code.into(),
            usage_type: None,
            operation: None,
            product_family: None,
            line_item_type: line_item_type.into(),
            unblended_cost: Decimal::ZERO,
            blended_cost: Decimal::ZERO,
            savings_plan_effective_cost: None,
            raw_tag_columns: RawTagColumns::new(),
            raw_tag_payload: None,
            usage_start,
            consolidated_tags: TagMap::new(),
            tag_parse_failed: false,
            data_transfer_direction: None,
            amortized_cost: Decimal::ZERO,
            resource_matched: false,
            tag_match: None,
        }
    }

    /// Set the resource identifier.
    #[must_use]
    pub fn with_resource_identifier(mut self, id: impl Into<String>) -> Self {
        self.resource_identifier = Some(id.into());
        self
    }

    /// Set the usage type.
    #[must_use]
    pub fn with_usage_type(mut self, usage_type: impl Into<String>) -> Self {
        self.usage_type = Some(usage_type.into());
        self
    }

    /// Set the operation.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set the product family.
    #[must_use]
    pub fn with_product_family(mut self, family: impl Into<String>) -> Self {
        self.product_family = Some(family.into());
        self
    }

    /// Set unblended and blended cost.
    #[must_use]
    pub fn with_costs(mut self, unblended: Decimal, blended: Decimal) -> Self {
        self.unblended_cost = unblended;
        self.blended_cost = blended;
        self
    }

    /// Set the savings-plan effective cost.
    #[must_use]
    pub fn with_savings_plan_effective_cost(mut self, cost: Decimal) -> Self {
        self.savings_plan_effective_cost = Some(cost);
        self
    }

    /// Add a raw tag column (`None` for a null cell).
    #[must_use]
    pub fn with_tag_column(mut self, column: impl Into<String>, value: Option<&str>) -> Self {
        self.raw_tag_columns
            .insert(column.into(), value.map(str::to_string));
        self
    }

    /// Set the whole-record tag payload.
    #[must_use]
    pub fn with_tag_payload(mut self, payload: impl Into<String>) -> Self {
        self.raw_tag_payload = Some(payload.into());
        self
    }

    /// Mark the record as matched by exact resource id.
    #[must_use]
    pub fn mark_resource_matched(mut self) -> Self {
        self.resource_matched = true;
        self
    }

    /// Whether the record was tag-matched.
    #[must_use]
    pub fn tag_matched(&self) -> bool {
        self.tag_match.is_some()
    }

    /// Whether the record is attributed by either resource id or tag.
    #[must_use]
    pub fn is_attributed(&self) -> bool {
        self.resource_matched || self.tag_matched()
    }

    /// Kind of the matched identity, if tag-matched.
    #[must_use]
    pub fn matched_identity_kind(&self) -> Option<MatchedIdentityKind> {
        self.tag_match.as_ref().map(|m| m.kind)
    }

    /// Value of the matched identity, if tag-matched.
    #[must_use]
    pub fn matched_identity_value(&self) -> Option<&str> {
        self.tag_match.as_ref().map(|m| m.value.as_str())
    }

    /// The tag that produced the match, if tag-matched.
    #[must_use]
    pub fn matched_tag(&self) -> Option<&str> {
        self.tag_match.as_ref().map(|m| m.tag.as_str())
    }

    /// Whether any raw tag source is still present.
    #[must_use]
    pub fn has_raw_tags(&self) -> bool {
        !self.raw_tag_columns.is_empty() || self.raw_tag_payload.is_some()
    }

    /// Render the consolidated tags as a JSON object (`{}` when empty).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn consolidated_tags_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.consolidated_tags)?)
    }
}

/// One row of the workload-side dataset used to build the identity index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    /// Cluster id.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Cluster alias (singular per run).
    #[serde(default)]
    pub cluster_alias: Option<String>,
    /// Node name.
    #[serde(default)]
    pub node: Option<String>,
    /// Namespace name.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Pod labels as JSON object or `key:value|key:value`.
    #[serde(default)]
    pub pod_labels: Option<String>,
    /// Volume labels as JSON object or `key:value|key:value`.
    #[serde(default)]
    pub volume_labels: Option<String>,
}

impl WorkloadRecord {
    /// Create a workload record for a cluster.
    #[must_use]
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: Some(cluster_id.into()),
            ..Default::default()
        }
    }

    /// Set the cluster alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.cluster_alias = Some(alias.into());
        self
    }

    /// Set the node name.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the pod label payload.
    #[must_use]
    pub fn with_pod_labels(mut self, labels: impl Into<String>) -> Self {
        self.pod_labels = Some(labels.into());
        self
    }

    /// Set the volume label payload.
    #[must_use]
    pub fn with_volume_labels(mut self, labels: impl Into<String>) -> Self {
        self.volume_labels = Some(labels.into());
        self
    }
}

/// The set of columns declared by the input batch.
///
/// Rules whose preconditions need a column absent from the schema are
/// disabled for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    columns: BTreeSet<String>,
}

impl RecordSchema {
    /// Schema declaring every known column.
    #[must_use]
    pub fn full() -> Self {
        Self::from_columns(columns::ALL.iter().copied())
    }

    /// Schema from a list of column names.
    pub fn from_columns<I, S>(cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: cols.into_iter().map(Into::into).collect(),
        }
    }

    /// Remove a column.
    #[must_use]
    pub fn without(mut self, column: &str) -> Self {
        self.columns.remove(column);
        self
    }

    /// Whether the schema declares a column.
    #[must_use]
    pub fn has(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    /// Require every listed column to be declared.
    ///
    /// # Errors
    ///
    /// Returns [`AttributionError::Validation`] naming the missing columns.
    pub fn require(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|c| !self.has(c))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AttributionError::Validation(format!(
                "schema must include: {}",
                missing.join(", ")
            )))
        }
    }
}
