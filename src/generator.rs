//! Seeded synthetic data: users, transactions and agreement chains.
//!
//! The same seed and reference date always produce the same dataset.

use crate::config::{GeneratorConfig, DEFAULT_MAX_AMOUNT_CENTS};
use crate::model::{
    AttrKind, AttrValue, AttributeSchema, EntityId, GroupKey, IntervalRecord, RawTransaction,
    SurrogateId, TrackedAttributes, UserId,
};
use crate::temporal::{days_before, format_day, parse_day, ValidTo, Validity};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use time::{Date, Duration, OffsetDateTime};
use tracing::info;

const PRODUCT_CATALOGUE: [i64; 6] = [305, 333, 345, 539, 560, 612];
const TIERS: [&str; 3] = ["basic", "plus", "premium"];

/// One generated dataset.
#[derive(Debug, Clone, Default)]
pub struct SyntheticDataset {
    pub users: Vec<(UserId, bool)>,
    pub transactions: Vec<RawTransaction>,
    pub agreements: Vec<IntervalRecord>,
}

pub struct DataGenerator {
    rng: StdRng,
    config: GeneratorConfig,
    schema: AttributeSchema,
    reference: Date,
    next_sk: u64,
}

impl DataGenerator {
    pub fn new(config: GeneratorConfig, schema: AttributeSchema) -> Result<Self> {
        let reference = match &config.reference_date {
            Some(raw) => parse_day(raw)
                .with_context(|| format!("invalid generator.reference_date {raw:?}"))?,
            None => OffsetDateTime::now_utc().date(),
        };
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            schema,
            reference,
            next_sk: 0,
        })
    }

    pub fn reference_date(&self) -> Date {
        self.reference
    }

    pub fn generate(&mut self) -> SyntheticDataset {
        let users = self.generate_users();
        let transactions = self.generate_transactions(&users);
        let agreements = self.generate_agreements(&users);
        info!(
            users = users.len(),
            transactions = transactions.len(),
            agreements = agreements.len(),
            reference = %self.reference,
            "Generated synthetic dataset"
        );
        SyntheticDataset {
            users,
            transactions,
            agreements,
        }
    }

    fn next_uuid(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.random())
            .into_uuid()
            .to_string()
    }

    pub fn generate_users(&mut self) -> Vec<(UserId, bool)> {
        (0..self.config.users)
            .map(|_| {
                let id = UserId::from(self.next_uuid());
                let active = self.rng.random_bool(self.config.active_ratio.clamp(0.0, 1.0));
                (id, active)
            })
            .collect()
    }

    /// Transactions spread over a subset of users, each with one preferred category.
    pub fn generate_transactions(&mut self, users: &[(UserId, bool)]) -> Vec<RawTransaction> {
        if users.is_empty() {
            return Vec::new();
        }
        let mut pool: Vec<&UserId> = users.iter().map(|(id, _)| id).collect();
        pool.shuffle(&mut self.rng);
        pool.truncate(self.config.transacting_users.clamp(1, users.len()));

        let max_category = self.config.max_category;
        let preferred: Vec<u32> = pool
            .iter()
            .map(|_| self.rng.random_range(0..=max_category))
            .collect();

        let lookback = self.config.lookback_days;
        let blocked_ratio = self.config.blocked_ratio.clamp(0.0, 1.0);
        let preferred_ratio = self.config.preferred_category_ratio.clamp(0.0, 1.0);

        (0..self.config.transactions)
            .map(|i| {
                let slot = self.rng.random_range(0..pool.len());
                let category = if self.rng.random_bool(preferred_ratio) {
                    preferred[slot]
                } else {
                    self.rng.random_range(0..=max_category)
                };
                // Later transactions lean towards the reference date.
                let earliest = u32::try_from(i / pool.len()).unwrap_or(u32::MAX).min(lookback);
                let date = days_before(self.reference, self.rng.random_range(earliest..=lookback));
                let cents = self.rng.random_range(0..DEFAULT_MAX_AMOUNT_CENTS);

                RawTransaction {
                    transaction_id: self.next_uuid(),
                    date: format_day(date),
                    user_id: pool[slot].to_string(),
                    is_blocked: if self.rng.random_bool(blocked_ratio) {
                        "True"
                    } else {
                        "False"
                    }
                    .to_string(),
                    transaction_amount: Decimal::new(cents, 2).to_string(),
                    transaction_category_id: category.to_string(),
                    client_id: None,
                }
            })
            .collect()
    }

    /// One agreement chain per user, keyed by the user id as group.
    pub fn generate_agreements(&mut self, users: &[(UserId, bool)]) -> Vec<IntervalRecord> {
        let mut records = Vec::new();
        for (idx, (user, _)) in users.iter().enumerate() {
            let entity = EntityId::from(format!("{}", 100 + idx));
            let group = GroupKey::from(user.as_str());
            records.extend(self.generate_chain(entity, group));
        }
        records
    }

    fn generate_chain(&mut self, entity: EntityId, group: GroupKey) -> Vec<IntervalRecord> {
        let versions = self.rng.random_range(1..=self.config.max_versions.max(1));
        let mut from = days_before(self.reference, self.rng.random_range(365..=3650));
        let mut attributes = self.random_terms();
        let mut chain = Vec::with_capacity(versions);

        for version in 0..versions {
            if version > 0 && !self.rng.random_bool(self.config.repeat_terms_ratio.clamp(0.0, 1.0)) {
                attributes = self.random_terms();
            }
            let is_last = version + 1 == versions;
            let (to, next_from) = if is_last {
                (ValidTo::Open, from)
            } else {
                let end = from + Duration::days(self.rng.random_range(10..400));
                (ValidTo::Until(end), end)
            };

            self.next_sk += 1;
            chain.push(IntervalRecord::new(
                SurrogateId(self.next_sk),
                entity.clone(),
                Validity { from, to },
                group.clone(),
                attributes.clone(),
            ));
            from = next_from;
        }
        chain
    }

    fn random_terms(&mut self) -> TrackedAttributes {
        let values = self
            .schema
            .attributes
            .iter()
            .map(|spec| match spec.kind {
                AttrKind::Integer => {
                    AttrValue::Integer(PRODUCT_CATALOGUE[self.rng.random_range(0..PRODUCT_CATALOGUE.len())])
                }
                AttrKind::Decimal => {
                    let scale = spec.scale.unwrap_or(crate::config::DEFAULT_DECIMAL_SCALE);
                    let mut value = Decimal::new(self.rng.random_range(100..=800), 2);
                    value.rescale(scale);
                    AttrValue::Decimal(value)
                }
                AttrKind::Text => AttrValue::Text(TIERS[self.rng.random_range(0..TIERS.len())].to_string()),
            })
            .collect();
        TrackedAttributes::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::validate_chain;
    use crate::store::IntervalStore;

    fn config(seed: u64) -> GeneratorConfig {
        GeneratorConfig {
            seed,
            users: 50,
            transactions: 400,
            transacting_users: 20,
            reference_date: Some("2020-06-30".to_string()),
            ..Default::default()
        }
    }

    fn generate(seed: u64) -> SyntheticDataset {
        DataGenerator::new(config(seed), AttributeSchema::default())
            .unwrap()
            .generate()
    }

    #[test]
    fn test_same_seed_same_dataset() {
        let a = generate(7);
        let b = generate(7);
        assert_eq!(a.users, b.users);
        assert_eq!(a.transactions, b.transactions);
        assert_eq!(a.agreements, b.agreements);
        assert_ne!(a.users, generate(8).users);
    }

    #[test]
    fn test_transactions_parse_and_stay_in_window() {
        let dataset = generate(3);
        assert_eq!(dataset.transactions.len(), 400);
        let earliest = days_before(parse_day("2020-06-30").unwrap(), 100);
        let mut transacting = std::collections::HashSet::new();
        for raw in &dataset.transactions {
            let event = raw.clone().parse().unwrap();
            assert!(event.occurred_on >= earliest);
            assert!(event.occurred_on <= parse_day("2020-06-30").unwrap());
            assert!(event.amount >= Decimal::ZERO && event.amount < Decimal::new(50, 0));
            assert!(event.category_id <= 10);
            transacting.insert(event.user_id);
        }
        assert!(transacting.len() <= 20);
    }

    #[test]
    fn test_agreement_chains_are_valid() {
        let dataset = generate(11);
        let store: IntervalStore = dataset.agreements.into_iter().collect();
        assert_eq!(store.entity_count(), 50);
        for (_, chain) in store.chains() {
            assert!(validate_chain(chain).is_ok());
            assert!(chain.last().unwrap().validity.is_open());
        }
    }

    #[test]
    fn test_invalid_reference_date() {
        let mut cfg = config(1);
        cfg.reference_date = Some("June".to_string());
        assert!(DataGenerator::new(cfg, AttributeSchema::default()).is_err());
    }
}
