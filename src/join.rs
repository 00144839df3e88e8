//! # Join Orchestrator
//!
//! Streams transactions once, enriches each with the user's active flag and the
//! dimension version in effect on the transaction date, then emits every row
//! sorted by `(occurred_on, transaction_id)`.
//!
//! ## Failure handling
//!
//! - Unknown group or no covering version: the row is still emitted with empty
//!   attributes.
//! - Unknown user: treated as inactive.
//! - Malformed transaction: recorded in [`JoinReport::failures`] and skipped.
//! - Systemic source error: aborts the pass with no rows emitted.
//!
//! ## Partitioning
//!
//! With more than one partition, parsed events are routed by a hash of their
//! group key and each shard is resolved in parallel. The resolver is read-only,
//! so shards share it without locking; the merged output is re-sorted.

use crate::error::PipelineError;
use crate::model::{
    RawTransaction, SurrogateId, TrackedAttributes, TransactionEvent, UserId,
};
use crate::resolver::{NoMatchReason, PointInTimeResolver, Resolution};
use crate::window::RollingWindow;
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use tracing::{debug, info, instrument, warn};

/// Lookup of a user's active flag.
pub trait ActiveUserLookup: Sync {
    /// Whether the user is active; unknown users are inactive.
    fn is_active(&self, user_id: &UserId) -> bool;
}

impl ActiveUserLookup for HashMap<UserId, bool> {
    fn is_active(&self, user_id: &UserId) -> bool {
        self.get(user_id).copied().unwrap_or(false)
    }
}

/// A set of active users.
impl ActiveUserLookup for HashSet<UserId> {
    fn is_active(&self, user_id: &UserId) -> bool {
        self.contains(user_id)
    }
}

/// A transaction joined with its user flag and dimension version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedRecord {
    pub transaction: TransactionEvent,
    pub is_active: bool,
    /// Version matched on the transaction date
    pub matched: Option<SurrogateId>,
    /// Attributes of the matched version; `None` when nothing matched
    pub attributes: Option<TrackedAttributes>,
    /// Why nothing matched
    pub no_match: Option<NoMatchReason>,
    /// The user's transactions in the preceding window, when enabled
    pub transactions_last_window: Option<u32>,
}

/// Counters for one join pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub seen: usize,
    pub emitted: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub unknown_group: usize,
    pub malformed: usize,
    pub active: usize,
}

/// Output of a join pass.
#[derive(Debug, Clone, Default)]
pub struct JoinReport {
    /// Enriched rows sorted by `(occurred_on, transaction_id)`
    pub rows: Vec<EnrichedRecord>,
    /// Malformed transactions that were skipped
    pub failures: Vec<PipelineError>,
    /// Transactions whose group had no interval chain, in output order
    pub unknown_groups: Vec<PipelineError>,
    pub stats: JoinStats,
}

impl JoinReport {
    /// Ids of transactions that could not be processed.
    pub fn failed_ids(&self) -> Vec<String> {
        self.failures.iter().filter_map(PipelineError::subject).collect()
    }
}

/// Joins a transaction stream against the resolver and an active-user lookup.
pub struct JoinOrchestrator<'a, U: ActiveUserLookup + ?Sized> {
    resolver: &'a PointInTimeResolver,
    users: &'a U,
    window: Option<RollingWindow>,
    partitions: usize,
}

impl<'a, U: ActiveUserLookup + ?Sized> JoinOrchestrator<'a, U> {
    pub fn new(resolver: &'a PointInTimeResolver, users: &'a U) -> Self {
        Self {
            resolver,
            users,
            window: None,
            partitions: 1,
        }
    }

    /// Attach rolling transaction counts to each row.
    pub fn with_window(mut self, window: RollingWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Resolve `partitions` group-key shards in parallel.
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Run one pass over raw transactions.
    ///
    /// Per-record failures are collected; the first systemic source error aborts
    /// the pass.
    #[instrument(skip_all, fields(partitions = self.partitions))]
    pub fn run<I>(&self, source: I) -> Result<JoinReport, PipelineError>
    where
        I: IntoIterator<Item = Result<RawTransaction, PipelineError>>,
    {
        let mut events = Vec::new();
        let mut failures = Vec::new();
        let mut seen = 0usize;

        for item in source {
            seen += 1;
            match item.and_then(RawTransaction::parse) {
                Ok(event) => events.push(event),
                Err(err) if err.is_systemic() => {
                    warn!(error = %err, "Transaction source failed; aborting pass");
                    return Err(err);
                }
                Err(err) => {
                    warn!(error = %err, "Skipping malformed transaction");
                    failures.push(err);
                }
            }
        }

        let mut report = self.run_events(events);
        report.stats.seen = seen;
        report.stats.malformed = failures.len();
        report.failures = failures;
        Ok(report)
    }

    /// Run one pass over already-parsed events.
    pub fn run_events(&self, events: Vec<TransactionEvent>) -> JoinReport {
        let counts: Vec<Option<u32>> = match &self.window {
            Some(window) => window.counts(&events).into_iter().map(Some).collect(),
            None => vec![None; events.len()],
        };
        let seen = events.len();

        let mut rows: Vec<EnrichedRecord> = if self.partitions > 1 {
            self.enrich_partitioned(events, counts)
        } else {
            events
                .into_iter()
                .zip(counts)
                .map(|(event, count)| self.enrich(event, count))
                .collect()
        };

        rows.sort_by(|a, b| {
            a.transaction
                .occurred_on
                .cmp(&b.transaction.occurred_on)
                .then_with(|| a.transaction.transaction_id.cmp(&b.transaction.transaction_id))
        });

        let mut stats = JoinStats {
            seen,
            emitted: rows.len(),
            ..Default::default()
        };
        let mut unknown_groups = Vec::new();
        for row in &rows {
            if row.is_active {
                stats.active += 1;
            }
            match row.no_match {
                None => stats.matched += 1,
                Some(reason) => {
                    stats.unmatched += 1;
                    if reason == NoMatchReason::UnknownGroup {
                        stats.unknown_group += 1;
                        unknown_groups.push(PipelineError::UnknownGroupReference {
                            transaction_id: row.transaction.transaction_id.clone(),
                            group_key: row.transaction.group_key.clone(),
                        });
                    }
                }
            }
        }

        info!(
            emitted = stats.emitted,
            matched = stats.matched,
            unmatched = stats.unmatched,
            unknown_group = stats.unknown_group,
            "Join pass complete"
        );

        JoinReport {
            rows,
            failures: Vec::new(),
            unknown_groups,
            stats,
        }
    }

    fn enrich(&self, event: TransactionEvent, window_count: Option<u32>) -> EnrichedRecord {
        let is_active = self.users.is_active(&event.user_id);
        let (matched, attributes, no_match) =
            match self.resolver.resolve(&event.group_key, event.occurred_on) {
                Resolution::Matched(record) => {
                    (Some(record.surrogate_id), Some(record.attributes.clone()), None)
                }
                Resolution::NoMatch(reason) => {
                    if reason == NoMatchReason::UnknownGroup {
                        debug!(
                            transaction = %event.transaction_id,
                            group = %event.group_key,
                            "Transaction references unknown group"
                        );
                    }
                    (None, None, Some(reason))
                }
            };

        EnrichedRecord {
            transaction: event,
            is_active,
            matched,
            attributes,
            no_match,
            transactions_last_window: window_count,
        }
    }

    fn enrich_partitioned(
        &self,
        events: Vec<TransactionEvent>,
        counts: Vec<Option<u32>>,
    ) -> Vec<EnrichedRecord> {
        let mut shards: Vec<Vec<(TransactionEvent, Option<u32>)>> =
            (0..self.partitions).map(|_| Vec::new()).collect();
        for (event, count) in events.into_iter().zip(counts) {
            let shard = shard_for(&event, self.partitions);
            shards[shard].push((event, count));
        }

        shards
            .into_par_iter()
            .flat_map_iter(|shard| {
                shard
                    .into_iter()
                    .map(|(event, count)| self.enrich(event, count))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Route an event to a shard by its group key.
fn shard_for(event: &TransactionEvent, partitions: usize) -> usize {
    let mut hasher = FxHasher::default();
    event.group_key.hash(&mut hasher);
    (hasher.finish() as usize) % partitions
}
