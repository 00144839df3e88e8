//! Fixtures and chain builders shared by unit tests, integration tests and benches.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::str::FromStr;
use time::{Date, Duration};

use crate::model::{
    AttrValue, EntityId, GroupKey, IntervalRecord, SurrogateId, TrackedAttributes,
};
use crate::temporal::{parse_day, EndDates, ValidTo, Validity};

/// Parse a `YYYY-MM-DD` literal.
pub fn day(raw: &str) -> Date {
    parse_day(raw).expect("valid test date")
}

/// `(product_id, interest_rate)` attributes as the default schema parses them.
pub fn terms(product_id: i64, rate: &str) -> TrackedAttributes {
    let mut rate = Decimal::from_str(rate).expect("valid test rate");
    rate.rescale(crate::config::DEFAULT_DECIMAL_SCALE);
    TrackedAttributes::new(vec![AttrValue::Integer(product_id), AttrValue::Decimal(rate)])
}

fn stored_agreement(
    sk: u64,
    entity: &str,
    (from, to): (&str, &str),
    end_dates: EndDates,
    group: &str,
    attributes: TrackedAttributes,
) -> IntervalRecord {
    let to = ValidTo::parse(to).expect("valid test end date");
    IntervalRecord::new(
        SurrogateId(sk),
        EntityId::from(entity),
        Validity::from_stored(day(from), to, end_dates).expect("valid test interval"),
        GroupKey::from(group),
        attributes,
    )
}

/// One agreement version with an exclusive `to`; `to` may be the `9999-12-31` sentinel.
pub fn agreement(
    sk: u64,
    entity: &str,
    from: &str,
    to: &str,
    group: &str,
    product_id: i64,
    rate: &str,
) -> IntervalRecord {
    stored_agreement(sk, entity, (from, to), EndDates::Exclusive, group, terms(product_id, rate))
}

/// One agreement version whose `to` is the last day it applies.
pub fn closed_agreement(
    sk: u64,
    entity: &str,
    from: &str,
    to: &str,
    group: &str,
    product_id: i64,
    rate: &str,
) -> IntervalRecord {
    stored_agreement(sk, entity, (from, to), EndDates::Inclusive, group, terms(product_id, rate))
}

/// The five-version chain of agreement 101 (client 20), stored with closed ends.
pub fn agreement_101_chain() -> Vec<IntervalRecord> {
    vec![
        closed_agreement(1, "101", "2015-01-01", "2015-02-20", "20", 305, "3.5"),
        closed_agreement(2, "101", "2015-02-21", "2015-05-17", "20", 345, "4.0"),
        closed_agreement(3, "101", "2015-05-18", "2015-07-05", "20", 345, "4.0"),
        closed_agreement(4, "101", "2015-07-06", "2015-08-22", "20", 539, "6.0"),
        closed_agreement(5, "101", "2015-08-23", "9999-12-31", "20", 345, "4.0"),
    ]
}

/// The ten-row sample dimension with closed ends: agreements 101, 102 and 103.
pub fn sample_dimension() -> Vec<IntervalRecord> {
    let mut records = agreement_101_chain();
    records.extend([
        closed_agreement(6, "102", "2016-01-01", "2016-06-30", "25", 333, "3.7"),
        closed_agreement(7, "102", "2016-07-01", "2016-07-25", "25", 333, "3.7"),
        closed_agreement(8, "102", "2016-07-26", "2016-09-15", "25", 333, "3.7"),
        closed_agreement(9, "102", "2016-09-16", "9999-12-31", "25", 560, "5.9"),
        closed_agreement(10, "103", "2011-05-22", "9999-12-31", "30", 560, "2.0"),
    ]);
    records
}

/// Build a valid chain from `(length_in_days, offer)` spans.
///
/// Each span becomes one version starting on the previous one's exclusive end; the
/// last version is open-ended. Offers index a small fixed catalogue, so equal
/// offers give equal attributes.
pub fn chain_from_spans(
    entity: &str,
    group: &str,
    first_sk: u64,
    start: Date,
    spans: &[(u16, u8)],
) -> Vec<IntervalRecord> {
    let mut records = Vec::with_capacity(spans.len());
    let mut from = start;
    for (i, (length, offer)) in spans.iter().enumerate() {
        let sk = SurrogateId(first_sk + i as u64);
        let attributes = offer_terms(*offer);
        let is_last = i + 1 == spans.len();
        let (to, next_from) = if is_last {
            (ValidTo::Open, from)
        } else {
            let end = from + Duration::days(i64::from((*length).max(1)));
            (ValidTo::Until(end), end)
        };
        records.push(IntervalRecord::new(
            sk,
            EntityId::from(entity),
            Validity { from, to },
            GroupKey::from(group),
            attributes,
        ));
        from = next_from;
    }
    records
}

fn offer_terms(offer: u8) -> TrackedAttributes {
    const CATALOGUE: [(i64, &str); 4] = [(305, "3.5"), (345, "4.0"), (539, "6.0"), (560, "5.9")];
    let (product_id, rate) = CATALOGUE[offer as usize % CATALOGUE.len()];
    terms(product_id, rate)
}

/// Seeded random chain of `len` versions drawn from a catalogue of `offers` terms.
pub fn random_chain(
    entity: &str,
    group: &str,
    first_sk: u64,
    len: usize,
    offers: u8,
    seed: u64,
) -> Vec<IntervalRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let spans: Vec<(u16, u8)> = (0..len)
        .map(|_| (rng.random_range(1..120), rng.random_range(0..offers.max(1))))
        .collect();
    chain_from_spans(entity, group, first_sk, day("2010-01-01"), &spans)
}

/// Linear-scan lookup over an unindexed chain: the first version containing `as_of`.
pub fn naive_resolve(records: &[IntervalRecord], as_of: Date) -> Option<&IntervalRecord> {
    records
        .iter()
        .find(|record| record.validity.contains(as_of))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::validate_chain;

    #[test]
    fn test_fixtures_are_valid_chains() {
        assert!(validate_chain(&agreement_101_chain()).is_ok());
        assert!(validate_chain(&sample_dimension()[5..9]).is_ok());
        let chain = chain_from_spans("1", "g", 1, day("2020-01-01"), &[(10, 0), (5, 0), (3, 1)]);
        assert!(validate_chain(&chain).is_ok());
        assert!(chain[2].validity.is_open());
    }

    #[test]
    fn test_random_chain_is_deterministic() {
        let a = random_chain("1", "g", 1, 20, 3, 7);
        let b = random_chain("1", "g", 1, 20, 3, 7);
        assert_eq!(a, b);
        assert!(validate_chain(&a).is_ok());
    }
}
