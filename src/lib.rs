//! # dimjoin
//!
//! Temporal dimension compaction and point-in-time joins.
//!
//! A slowly changing dimension stores one row per version of an entity, each
//! valid over a half-open date interval. This crate compacts adjacent versions
//! whose tracked attributes did not change, indexes the compacted versions for
//! "as of" lookups, and enriches a transaction stream with the version in
//! effect on each transaction date.

pub mod aggregate;
pub mod config;
pub mod dedup;
pub mod error;
pub mod generator;
pub mod io;
pub mod join;
pub mod model;
pub mod resolver;
pub mod store;
pub mod temporal;
pub mod test_support;
pub mod window;

// Re-export main types for convenience
pub use aggregate::{summarize_categories, CategorySummary};
pub use config::PipelineConfig;
pub use dedup::{dedup_chain, dedup_chain_islands, DedupEngine, DedupOutcome, DedupStats};
pub use error::{OrderingFault, PipelineError, RecordKind};
pub use join::{ActiveUserLookup, EnrichedRecord, JoinOrchestrator, JoinReport, JoinStats};
pub use model::{
    AttrValue, AttributeSchema, EntityId, GroupKey, IntervalRecord, SurrogateId,
    TrackedAttributes, TransactionEvent, UserId,
};
pub use resolver::{NoMatchReason, PointInTimeResolver, Resolution};
pub use store::IntervalStore;
pub use temporal::{EndDates, ValidTo, Validity};
pub use window::RollingWindow;

use anyhow::{Context, Result};
use model::RawTransaction;
use std::collections::BTreeMap;
use tracing::info;

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub dedup: DedupStats,
    /// Compacted chains of every accepted entity
    pub chains: BTreeMap<EntityId, Vec<IntervalRecord>>,
    pub join: JoinReport,
    pub summary: Vec<CategorySummary>,
    /// Rejected rows, chains and transactions from every stage
    pub failures: Vec<PipelineError>,
}

/// Main API: dedup, index, join and summarize under one configuration.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compact every chain in `store`.
    pub fn dedup(&self, store: &IntervalStore) -> DedupOutcome {
        DedupEngine::new(self.config.dedup.clone()).run(store)
    }

    /// Index compacted chains for point-in-time lookups.
    pub fn build_resolver(&self, outcome: &DedupOutcome) -> (PointInTimeResolver, Vec<PipelineError>) {
        PointInTimeResolver::build(
            outcome
                .chains
                .iter()
                .map(|(entity, chain)| (entity, chain.as_slice())),
        )
    }

    /// The join orchestrator configured for this pipeline.
    pub fn orchestrator<'a, U: ActiveUserLookup + ?Sized>(
        &self,
        resolver: &'a PointInTimeResolver,
        users: &'a U,
    ) -> JoinOrchestrator<'a, U> {
        let orchestrator =
            JoinOrchestrator::new(resolver, users).with_partitions(self.config.join.partitions);
        match self.window() {
            Some(window) => orchestrator.with_window(window),
            None => orchestrator,
        }
    }

    fn window(&self) -> Option<RollingWindow> {
        self.config
            .join
            .rolling_window
            .then(|| RollingWindow::new(self.config.join.window_days))
    }

    /// Run dedup, indexing, join and summary over in-memory inputs.
    ///
    /// Only a systemic source error is returned as `Err`; everything else is
    /// collected in [`PipelineReport::failures`].
    pub fn run<R, U, I>(
        &self,
        records: R,
        users: &U,
        transactions: I,
    ) -> Result<PipelineReport, PipelineError>
    where
        R: IntoIterator<Item = IntervalRecord>,
        U: ActiveUserLookup + ?Sized,
        I: IntoIterator<Item = Result<RawTransaction, PipelineError>>,
    {
        let store: IntervalStore = records.into_iter().collect();
        let outcome = self.dedup(&store);
        let (resolver, rejected) = self.build_resolver(&outcome);
        let join = self.orchestrator(&resolver, users).run(transactions)?;
        let summary = summarize_categories(&join.rows);

        let mut failures = outcome.failures;
        failures.extend(rejected);
        failures.extend(join.failures.iter().cloned());

        Ok(PipelineReport {
            dedup: outcome.stats,
            chains: outcome.chains,
            join,
            summary,
            failures,
        })
    }

    /// Read the configured input files, run the pipeline and write the
    /// enriched rows and category summary.
    pub fn run_files(&self) -> Result<PipelineReport> {
        let paths = &self.config.paths;
        let records = io::read_interval_records(&paths.agreements, &self.config.schema)?;
        let users = io::read_active_users(&paths.users)?;
        let transactions = io::open_transactions(&paths.transactions)?;

        let mut report = self
            .run(records.value, &users.value, transactions)
            .with_context(|| format!("failed to read {}", paths.transactions.display()))?;
        let mut failures = records.failures;
        failures.extend(users.failures);
        failures.append(&mut report.failures);
        report.failures = failures;

        let window_days = self.window().map(|window| window.days());
        io::write_enriched(
            io::create_output(&paths.output, paths.overwrite)?,
            &report.join.rows,
            &self.config.schema,
            window_days,
        )
        .with_context(|| format!("failed to write {}", paths.output.display()))?;
        io::write_category_summary(
            io::create_output(&paths.summary_output, paths.overwrite)?,
            &report.summary,
        )
        .with_context(|| format!("failed to write {}", paths.summary_output.display()))?;

        info!(
            rows = report.join.rows.len(),
            failures = report.failures.len(),
            output = %paths.output.display(),
            "Pipeline run complete"
        );
        Ok(report)
    }

    /// Read the configured dimension file, compact it and write the result.
    pub fn dedup_file(&self) -> Result<(DedupOutcome, Vec<PipelineError>)> {
        let paths = &self.config.paths;
        let records = io::read_interval_records(&paths.agreements, &self.config.schema)?;
        let store: IntervalStore = records.value.into_iter().collect();
        let outcome = self.dedup(&store);

        io::write_intervals(
            io::create_output(&paths.dedup_output, paths.overwrite)?,
            outcome.records(),
            &self.config.schema,
        )
        .with_context(|| format!("failed to write {}", paths.dedup_output.display()))?;
        info!(
            input = outcome.stats.input_records,
            output = outcome.stats.output_records,
            path = %paths.dedup_output.display(),
            "Wrote compacted dimension"
        );
        Ok((outcome, records.failures))
    }

    /// Generate a synthetic dataset and write it to the configured input paths.
    pub fn generate_files(&self) -> Result<generator::SyntheticDataset> {
        let paths = &self.config.paths;
        let dataset =
            generator::DataGenerator::new(self.config.generator.clone(), self.config.schema.clone())?
                .generate();

        io::write_users(
            io::create_output(&paths.users, paths.overwrite)?,
            dataset.users.iter().map(|(id, active)| (id, *active)),
        )?;
        io::write_transactions(
            io::create_output(&paths.transactions, paths.overwrite)?,
            &dataset.transactions,
        )?;
        io::write_intervals(
            io::create_output(&paths.agreements, paths.overwrite)?,
            &dataset.agreements,
            &self.config.schema,
        )?;
        Ok(dataset)
    }
}
