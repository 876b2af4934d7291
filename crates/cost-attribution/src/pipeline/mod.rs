//! Batch and chunk driver.
//!
//! Each record goes through consolidation, classification and matching as a
//! pure `CostRecord -> CostRecord` function applied with a rayon parallel map.
//! Statistics are folded per worker and reduced, then merged across chunks.

mod stats;

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::classify::CostClassifier;
use crate::config::AttributionConfig;
use crate::error::{AttributionError, Result};
use crate::identity::WorkloadIdentityIndex;
use crate::matching::{MatchEngine, MatchOutcome};
use crate::records::{CostRecord, RecordSchema};
use crate::streaming::StreamingDecision;
use crate::tags::TagConsolidator;

pub use stats::{ChunkStats, DisabledRule, RunStatistics};

/// Per-record result of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Match stage outcome.
    pub matched: MatchOutcome,
    /// Whether covered-usage costs were zeroed.
    pub covered_usage_zeroed: bool,
}

/// Output of one processed batch.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Augmented records.
    pub records: Vec<CostRecord>,
    /// Statistics for this batch only.
    pub stats: ChunkStats,
}

/// Shared flag checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Split an in-memory batch into chunks of at most `size` records.
pub fn chunked(records: Vec<CostRecord>, size: usize) -> impl Iterator<Item = Vec<CostRecord>> {
    let size = size.max(1);
    let mut iter = records.into_iter().peekable();
    std::iter::from_fn(move || {
        iter.peek()?;
        Some(iter.by_ref().take(size).collect())
    })
}

/// Runs the attribution stages over record batches.
#[derive(Debug, Clone)]
pub struct AttributionPipeline {
    config: AttributionConfig,
    consolidator: TagConsolidator,
    classifier: CostClassifier,
    engine: MatchEngine,
    disabled_rules: Vec<DisabledRule>,
}

impl AttributionPipeline {
    /// Build a pipeline for a batch schema and a frozen identity index.
    ///
    /// Classification rules whose columns are missing from `schema` are
    /// disabled for the run and reported in the statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: AttributionConfig,
        schema: &RecordSchema,
        index: impl Into<Arc<WorkloadIdentityIndex>>,
    ) -> Result<Self> {
        config.validate()?;

        let (classifier, missing) = CostClassifier::for_schema(schema);
        let disabled_rules = missing
            .into_iter()
            .filter_map(|e| match e {
                AttributionError::MissingColumn { rule, column } => Some(DisabledRule {
                    rule,
                    column,
                }),
                _ => None,
            })
            .collect();

        let engine = MatchEngine::new(index.into());
        let consolidator =
            TagConsolidator::default().with_enabled_keys(config.enabled_tag_keys.iter().cloned());

        Ok(Self {
            config,
            consolidator,
            classifier,
            engine,
            disabled_rules,
        })
    }

    /// Replace the tag consolidator. The configured `enabled_tag_keys` still apply.
    #[must_use]
    pub fn with_consolidator(mut self, consolidator: TagConsolidator) -> Self {
        self.consolidator =
            consolidator.with_enabled_keys(self.config.enabled_tag_keys.iter().cloned());
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    /// Rules disabled by the schema.
    #[must_use]
    pub fn disabled_rules(&self) -> &[DisabledRule] {
        &self.disabled_rules
    }

    /// Run every stage on one record.
    ///
    /// Consolidation also restricts the tag map to `enabled_tag_keys`, so
    /// matching and the returned record only carry enabled tags.
    #[must_use]
    pub fn process_record(&self, record: CostRecord) -> (CostRecord, RecordOutcome) {
        let record = self.consolidator.consolidate(record);
        let (record, covered_usage_zeroed) = self.classifier.classify(record);
        let (record, matched) = self.engine.apply(record);
        (
            record,
            RecordOutcome {
                matched,
                covered_usage_zeroed,
            },
        )
    }

    /// Process one batch in parallel.
    #[must_use]
    #[instrument(skip_all, fields(rows = records.len()))]
    pub fn process_batch(&self, records: Vec<CostRecord>) -> BatchOutput {
        let processed: Vec<(CostRecord, RecordOutcome)> = records
            .into_par_iter()
            .map(|record| self.process_record(record))
            .collect();

        let stats = processed
            .par_iter()
            .fold(ChunkStats::default, |mut acc, (record, outcome)| {
                acc.observe(record, *outcome);
                acc
            })
            .reduce(ChunkStats::default, ChunkStats::merge);

        let records = processed.into_iter().map(|(record, _)| record).collect();
        BatchOutput { records, stats }
    }

    /// Process chunks in order, handing each augmented chunk to `sink`.
    ///
    /// Cancellation is checked before each chunk. Statistics of the chunks
    /// completed so far are returned either way.
    pub fn run_chunks<I, F>(
        &self,
        chunks: I,
        cancel: &CancellationFlag,
        mut sink: F,
    ) -> RunStatistics
    where
        I: IntoIterator<Item = Vec<CostRecord>>,
        F: FnMut(Vec<CostRecord>),
    {
        let mut totals = ChunkStats::default();
        let mut chunks_processed = 0_u64;
        let mut cancelled = false;

        for chunk in chunks {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let output = self.process_batch(chunk);
            debug!(
                chunk = chunks_processed,
                records = output.stats.matching.total_records,
                tag_matched = output.stats.matching.tag_matched,
                "Processed chunk"
            );
            totals = totals.merge(output.stats);
            chunks_processed += 1;
            sink(output.records);
        }

        self.finish(totals, chunks_processed, cancelled)
    }

    /// Process an in-memory batch, chunked if the decision says to stream.
    pub fn run(
        &self,
        records: Vec<CostRecord>,
        decision: &StreamingDecision,
        cancel: &CancellationFlag,
    ) -> (Vec<CostRecord>, RunStatistics) {
        let chunk_size = match decision.chunk_size {
            Some(size) if decision.stream => size,
            _ => records.len(),
        };

        let mut output = Vec::with_capacity(records.len());
        let stats = self.run_chunks(chunked(records, chunk_size), cancel, |chunk| {
            output.extend(chunk);
        });
        (output, stats)
    }

    fn finish(&self, totals: ChunkStats, chunks_processed: u64, cancelled: bool) -> RunStatistics {
        let stats = RunStatistics::new(
            totals,
            self.engine.index().report(),
            self.disabled_rules.clone(),
            self.config.min_combined_match_rate,
            chunks_processed,
            cancelled,
        );

        if let Some(warning) = &stats.quality_warning {
            warn!(%warning, "Match quality below floor");
        }
        if cancelled {
            warn!(chunks_processed, "Run cancelled between chunks");
        }
        info!(
            total_records = stats.matching.total_records,
            resource_matched = stats.matching.resource_matched,
            tag_matched = stats.matching.tag_matched,
            unmatched = stats.matching.unmatched,
            combined_match_rate = stats.combined_match_rate(),
            unparseable_tag_records = stats.unparseable_tag_records(),
            chunks_processed,
            "Attribution run finished"
        );

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::WorkloadRecord;
    use chrono::Utc;

    fn pipeline() -> AttributionPipeline {
        let index = WorkloadIdentityIndex::build(&[WorkloadRecord::new("c1").with_node("n1")]);
        AttributionPipeline::new(AttributionConfig::default(), &RecordSchema::full(), index).unwrap()
    }

    fn tagged(node: &str) -> CostRecord {
        CostRecord::new("AmazonEC2", "Usage", Utc::now()).with_tag_column("openshift_node", Some(node))
    }

    #[test]
    fn test_chunked_splits_evenly() {
        let records: Vec<_> = (0..5).map(|_| tagged("n1")).collect();
        let sizes: Vec<usize> = chunked(records, 2).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunked(Vec::new(), 3).count(), 0);
    }

    #[test]
    fn test_process_batch_preserves_order() {
        let records = vec![tagged("n1"), tagged("other"), tagged("n1")];
        let output = pipeline().process_batch(records);

        assert_eq!(output.records.len(), 3);
        assert!(output.records[0].tag_matched());
        assert!(!output.records[1].tag_matched());
        assert_eq!(output.stats.matching.tag_matched, 2);
        assert_eq!(output.stats.matching.unmatched, 1);
    }

    #[test]
    fn test_custom_consolidator_keeps_enabled_keys() {
        let config = AttributionConfig {
            enabled_tag_keys: ["node".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let index = WorkloadIdentityIndex::build(&[WorkloadRecord::new("c1")]);
        let pipeline = AttributionPipeline::new(config, &RecordSchema::full(), index)
            .unwrap()
            .with_consolidator(TagConsolidator::new("tag_", ["node"]));

        let record = CostRecord::new("AmazonEC2", "Usage", Utc::now())
            .with_tag_column("tag_env", Some("prod"))
            .with_tag_column("node", Some("n1"));
        let (out, _) = pipeline.process_record(record);

        assert_eq!(out.consolidated_tags.len(), 1);
        assert_eq!(out.consolidated_tags["node"], "n1");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = AttributionConfig {
            chunk_size_rows: 0,
            ..Default::default()
        };
        let result = AttributionPipeline::new(
            config,
            &RecordSchema::full(),
            WorkloadIdentityIndex::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cancel_before_first_chunk() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let stats = pipeline().run_chunks(vec![vec![tagged("n1")]], &cancel, |_| {});
        assert!(stats.cancelled);
        assert_eq!(stats.chunks_processed, 0);
        assert_eq!(stats.matching.total_records, 0);
    }
}
