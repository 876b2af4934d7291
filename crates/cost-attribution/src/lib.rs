//! Resource matching and cost classification for cloud billing records.
//!
//! This crate attributes cloud-provider cost line items to the workload
//! identities (cluster, node, namespace, labels) they belong to, and
//! normalizes cost fields whose meaning depends on context.
//!
//! ## Stages
//!
//! - **Tag consolidation** - sparse prefixed and direct tag columns become one
//!   canonical tag map per record
//! - **Classification** - network transfer direction, covered-usage zeroing
//!   and amortized cost
//! - **Matching** - priority-ordered tag match against a frozen
//!   [`WorkloadIdentityIndex`]
//! - **Execution mode** - streaming vs. in-memory, from row count and
//!   available memory
//!
//! ## Quick Start
//!
//! ```rust
//! use cto_cost_attribution::{
//!     AttributionConfig, AttributionPipeline, CancellationFlag, CostRecord, RecordSchema,
//!     StreamingModeSelector, WorkloadIdentityIndex, WorkloadRecord,
//! };
//! use cto_cost_attribution::streaming::FixedMemoryProbe;
//! use chrono::Utc;
//!
//! let workloads = vec![WorkloadRecord::new("cluster-a").with_node("node-1")];
//! let index = WorkloadIdentityIndex::build(&workloads);
//!
//! let config = AttributionConfig::default();
//! let pipeline = AttributionPipeline::new(config.clone(), &RecordSchema::full(), index)?;
//!
//! let records = vec![CostRecord::new("AmazonEC2", "Usage", Utc::now())
//!     .with_tag_column("resource_tags_user_openshift_node", Some("node-1"))];
//!
//! let selector = StreamingModeSelector::with_probe(&config, FixedMemoryProbe::gigabytes(16.0));
//! let decision = selector.decide(None, Some(records.len() as u64));
//!
//! let (records, stats) = pipeline.run(records, &decision, &CancellationFlag::new());
//! assert!(records[0].tag_matched());
//! assert_eq!(stats.matching.tag_matched, 1);
//! # Ok::<(), cto_cost_attribution::AttributionError>(())
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod identity;
pub mod matching;
pub mod pipeline;
pub mod records;
pub mod streaming;
pub mod tags;

pub use classify::{ClassificationStats, CostClassifier};
pub use config::{AttributionConfig, StreamingSetting};
pub use error::AttributionError;
pub use identity::{IdentityFacet, IdentityIndexBuilder, IndexBuildReport, WorkloadIdentityIndex};
pub use matching::{MatchEngine, MatchOutcome, MatchStats, QualityWarning};
pub use pipeline::{
    chunked, AttributionPipeline, BatchOutput, CancellationFlag, ChunkStats, DisabledRule,
    RecordOutcome, RunStatistics,
};
pub use records::{
    CostRecord, DataTransferDirection, MatchedIdentityKind, RecordSchema, TagMap, TagMatch,
    WorkloadRecord,
};
pub use streaming::{MemoryProbe, StreamingDecision, StreamingModeSelector, StreamingReason};
pub use tags::{SpecialTag, TagConsolidator};
