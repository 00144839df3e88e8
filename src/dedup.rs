//! # Dedup Module
//!
//! Collapses runs of consecutive versions that carry identical tracked attributes
//! into a single wider version.
//!
//! ## Algorithm
//!
//! A chain is scanned once in `valid_from` order while holding the head and the
//! tail of the current run. A version that matches the run head extends the run;
//! any other version closes it. A closed run becomes one record spanning
//! `[head.valid_from, tail.valid_to)` that keeps the head's surrogate id. The
//! last run is flushed at the end of the chain, so an open end always survives.
//!
//! Chains must already be sorted and contiguous. A chain that is not is rejected
//! with [`PipelineError::InputOrderingViolation`] and never repaired.

use crate::config::DedupConfig;
use crate::error::{OrderingFault, PipelineError};
use crate::model::{EntityId, IntervalRecord};
use crate::store::IntervalStore;
use crate::temporal::Succession;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Check that a chain is one entity's versions, sorted and contiguous, with any
/// open end last.
/// Ordering is checked over the whole chain before contiguity.
pub fn validate_chain(chain: &[IntervalRecord]) -> Result<(), PipelineError> {
    let Some(first) = chain.first() else {
        return Ok(());
    };
    let violation = |next: &IntervalRecord, fault| PipelineError::InputOrderingViolation {
        entity_id: first.entity_id.clone(),
        surrogate_id: next.surrogate_id,
        fault,
    };

    for pair in chain.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.entity_id != first.entity_id {
            return Err(violation(next, OrderingFault::ForeignEntity));
        }
        if next.validity.from < prev.validity.from {
            return Err(violation(next, OrderingFault::OutOfOrder));
        }
    }

    for pair in chain.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        match prev.validity.succession(&next.validity) {
            Succession::Adjacent => {}
            Succession::Gap => return Err(violation(next, OrderingFault::Gap)),
            Succession::Overlap => return Err(violation(next, OrderingFault::Overlap)),
            Succession::OutOfOrder => return Err(violation(next, OrderingFault::OutOfOrder)),
            Succession::AfterOpenEnd => return Err(violation(next, OrderingFault::OpenEndNotLast)),
        }
    }
    Ok(())
}

/// Two versions belong to the same run when their attributes and group match.
#[inline]
fn same_run(head: &IntervalRecord, next: &IntervalRecord) -> bool {
    head.attributes == next.attributes && head.group_key == next.group_key
}

fn merge_run(head: &IntervalRecord, tail: &IntervalRecord) -> IntervalRecord {
    IntervalRecord {
        validity: head.validity.span_to(&tail.validity),
        ..head.clone()
    }
}

/// Collapse one entity's chain in a single linear pass.
///
/// The output is contiguous like the input, is never
/// longer than the input, and covers the same span from the first `valid_from`
/// to the final end.
pub fn dedup_chain(chain: &[IntervalRecord]) -> Result<Vec<IntervalRecord>, PipelineError> {
    validate_chain(chain)?;

    let mut merged = Vec::new();
    let mut records = chain.iter();
    let Some(first) = records.next() else {
        return Ok(merged);
    };

    let mut head = first;
    let mut tail = first;
    for record in records {
        if same_run(head, record) {
            tail = record;
            continue;
        }
        merged.push(merge_run(head, tail));
        head = record;
        tail = record;
    }
    merged.push(merge_run(head, tail));

    Ok(merged)
}

/// Gaps-and-islands formulation of [`dedup_chain`].
///
/// Marks every version whose attributes differ from its predecessor, turns the
/// marks into island numbers with a running sum, then collapses each island to
/// its earliest start and latest end. Produces the same chains as
/// [`dedup_chain`]; kept as an independent cross-check.
pub fn dedup_chain_islands(chain: &[IntervalRecord]) -> Result<Vec<IntervalRecord>, PipelineError> {
    validate_chain(chain)?;

    let mut island = 0usize;
    let island_ids: Vec<usize> = chain
        .iter()
        .enumerate()
        .map(|(i, record)| {
            if i > 0 && !same_run(&chain[i - 1], record) {
                island += 1;
            }
            island
        })
        .collect();

    let mut islands: BTreeMap<usize, IntervalRecord> = BTreeMap::new();
    for (record, island) in chain.iter().zip(island_ids) {
        islands
            .entry(island)
            .and_modify(|merged| {
                merged.validity.from = merged.validity.from.min(record.validity.from);
                merged.validity.to = merged.validity.to.max(record.validity.to);
            })
            .or_insert_with(|| record.clone());
    }

    Ok(islands.into_values().collect())
}

/// Counters for one dedup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub entities: usize,
    pub input_records: usize,
    pub output_records: usize,
    pub rejected_entities: usize,
    pub rejected_records: usize,
    /// Chains that arrived unsorted and were sorted before compaction
    pub reordered_entities: usize,
}

impl DedupStats {
    /// Versions removed by merging.
    pub fn removed(&self) -> usize {
        self.input_records
            .saturating_sub(self.output_records + self.rejected_records)
    }
}

/// Result of compacting every chain in a store.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Compacted chains of the entities that passed validation
    pub chains: BTreeMap<EntityId, Vec<IntervalRecord>>,
    /// One ordering violation per rejected entity
    pub failures: Vec<PipelineError>,
    pub stats: DedupStats,
}

impl DedupOutcome {
    /// All compacted records, in entity order.
    pub fn records(&self) -> impl Iterator<Item = &IntervalRecord> {
        self.chains.values().flatten()
    }
}

/// Runs [`dedup_chain`] over every entity in a store.
#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Compact every chain. A rejected entity is reported and skipped; the
    /// other entities are still compacted.
    #[instrument(skip_all, fields(entities = store.entity_count()))]
    pub fn run(&self, store: &IntervalStore) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();

        for (entity_id, chain) in store.chains() {
            outcome.stats.entities += 1;
            outcome.stats.input_records += chain.len();

            let sorted = chain
                .windows(2)
                .all(|pair| pair[0].validity <= pair[1].validity);
            let result = if self.config.sort_chains && !sorted {
                warn!(entity = %entity_id, "Chain was not sorted; reordered before compaction");
                outcome.stats.reordered_entities += 1;
                let mut reordered = chain.to_vec();
                reordered.sort_by_key(|record| record.validity);
                dedup_chain(&reordered)
            } else {
                dedup_chain(chain)
            };

            match result {
                Ok(merged) => {
                    debug!(
                        entity = %entity_id,
                        before = chain.len(),
                        after = merged.len(),
                        "Compacted chain"
                    );
                    outcome.stats.output_records += merged.len();
                    outcome.chains.insert(entity_id.clone(), merged);
                }
                Err(err) => {
                    warn!(entity = %entity_id, error = %err, "Rejected chain");
                    outcome.stats.rejected_entities += 1;
                    outcome.stats.rejected_records += chain.len();
                    outcome.failures.push(err);
                }
            }
        }

        info!(
            entities = outcome.stats.entities,
            input = outcome.stats.input_records,
            output = outcome.stats.output_records,
            rejected = outcome.stats.rejected_entities,
            reordered = outcome.stats.reordered_entities,
            "Dedup pass complete"
        );
        outcome
    }
}
