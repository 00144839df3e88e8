//! # Point-in-Time Resolver
//!
//! Answers "which version applied to this group on this day" against compacted
//! chains. Each group's versions are merged into one timeline sorted by
//! `valid_from`, so a lookup is a binary search followed by a single containment
//! check.

use crate::error::{OrderingFault, PipelineError};
use crate::model::{EntityId, GroupKey, IntervalRecord, TrackedAttributes};
use hashbrown::HashMap;
use std::collections::BTreeMap;
use time::Date;
use tracing::{debug, warn};

/// Why a lookup found no version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoMatchReason {
    /// The group has no indexed versions.
    UnknownGroup,
    /// The day precedes the group's earliest `valid_from`.
    BeforeInception,
    /// The day falls between two versions, or after a closed final version.
    Gap,
}

/// Outcome of a point-in-time lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Matched(&'a IntervalRecord),
    NoMatch(NoMatchReason),
}

impl<'a> Resolution<'a> {
    pub fn record(&self) -> Option<&'a IntervalRecord> {
        match self {
            Resolution::Matched(record) => Some(record),
            Resolution::NoMatch(_) => None,
        }
    }

    pub fn attributes(&self) -> Option<&'a TrackedAttributes> {
        self.record().map(|record| &record.attributes)
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Resolution::Matched(_))
    }
}

/// One group's versions sorted by `valid_from`, non-overlapping
#[derive(Debug, Clone, Default)]
pub struct GroupTimeline {
    starts: Vec<Date>,
    records: Vec<IntervalRecord>,
}

impl GroupTimeline {
    fn from_sorted(records: Vec<IntervalRecord>) -> Self {
        Self {
            starts: records.iter().map(|record| record.validity.from).collect(),
            records,
        }
    }

    /// Binary search for the last version starting on or before `as_of`.
    pub fn lookup(&self, as_of: Date) -> Resolution<'_> {
        let idx = self.starts.partition_point(|start| *start <= as_of);
        if idx == 0 {
            return Resolution::NoMatch(NoMatchReason::BeforeInception);
        }
        let candidate = &self.records[idx - 1];
        if candidate.validity.to.is_after(as_of) {
            Resolution::Matched(candidate)
        } else {
            Resolution::NoMatch(NoMatchReason::Gap)
        }
    }

    pub fn records(&self) -> &[IntervalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-group timelines built once from compacted chains; read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct PointInTimeResolver {
    groups: HashMap<GroupKey, GroupTimeline>,
}

impl PointInTimeResolver {
    /// Index compacted chains by the group key of each version.
    ///
    /// Versions of different entities may share a group as long as they do not
    /// overlap. Chains are indexed in the order given; a chain that overlaps
    /// versions already indexed for one of its groups is rejected whole and
    /// reported.
    pub fn build<'a, I>(chains: I) -> (Self, Vec<PipelineError>)
    where
        I: IntoIterator<Item = (&'a EntityId, &'a [IntervalRecord])>,
    {
        let mut timelines: HashMap<GroupKey, BTreeMap<Date, IntervalRecord>> = HashMap::new();
        let mut failures = Vec::new();

        for (entity_id, chain) in chains {
            let conflict = chain.iter().find(|record| {
                timelines
                    .get(&record.group_key)
                    .is_some_and(|timeline| overlaps_timeline(timeline, record))
            });
            if let Some(record) = conflict {
                warn!(
                    entity = %entity_id,
                    group = %record.group_key,
                    "Chain overlaps another entity of its group; not indexed"
                );
                failures.push(PipelineError::InputOrderingViolation {
                    entity_id: entity_id.clone(),
                    surrogate_id: record.surrogate_id,
                    fault: OrderingFault::GroupOverlap,
                });
                continue;
            }

            for record in chain {
                timelines
                    .entry(record.group_key.clone())
                    .or_default()
                    .insert(record.validity.from, record.clone());
            }
        }

        let groups: HashMap<GroupKey, GroupTimeline> = timelines
            .into_iter()
            .map(|(group, timeline)| {
                (group, GroupTimeline::from_sorted(timeline.into_values().collect()))
            })
            .collect();
        debug!(groups = groups.len(), "Built point-in-time index");

        (Self { groups }, failures)
    }

    /// Find the version of `group` whose validity contains `as_of`.
    pub fn resolve(&self, group: &GroupKey, as_of: Date) -> Resolution<'_> {
        match self.groups.get(group) {
            Some(timeline) => timeline.lookup(as_of),
            None => Resolution::NoMatch(NoMatchReason::UnknownGroup),
        }
    }

    /// The tracked attributes in effect for `group` on `as_of`, if any.
    pub fn resolve_attributes(&self, group: &GroupKey, as_of: Date) -> Option<&TrackedAttributes> {
        self.resolve(group, as_of).attributes()
    }

    pub fn timeline(&self, group: &GroupKey) -> Option<&GroupTimeline> {
        self.groups.get(group)
    }

    pub fn contains_group(&self, group: &GroupKey) -> bool {
        self.groups.contains_key(group)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn record_count(&self) -> usize {
        self.groups.values().map(GroupTimeline::len).sum()
    }
}

/// Whether `record` overlaps its neighbours in an already-indexed timeline.
fn overlaps_timeline(timeline: &BTreeMap<Date, IntervalRecord>, record: &IntervalRecord) -> bool {
    let from = record.validity.from;
    let before = timeline.range(..=from).next_back();
    let after = timeline.range(from..).next();
    before.is_some_and(|(_, prev)| prev.validity.overlaps(&record.validity))
        || after.is_some_and(|(_, next)| next.validity.overlaps(&record.validity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{dedup_chain, DedupEngine};
    use crate::store::IntervalStore;
    use crate::test_support::{
        agreement, agreement_101_chain, day, naive_resolve, random_chain, sample_dimension, terms,
    };

    fn resolver_for(records: Vec<IntervalRecord>) -> (PointInTimeResolver, Vec<PipelineError>) {
        let store: IntervalStore = records.into_iter().collect();
        let outcome = DedupEngine::default().run(&store);
        PointInTimeResolver::build(
            outcome
                .chains
                .iter()
                .map(|(entity, chain)| (entity, chain.as_slice())),
        )
    }

    #[test]
    fn test_resolve_agreement_101() {
        let (resolver, failures) = resolver_for(sample_dimension());
        assert!(failures.is_empty());
        let group = GroupKey::from("20");

        assert_eq!(
            resolver.resolve_attributes(&group, day("2015-06-01")),
            Some(&terms(345, "4.0"))
        );
        assert_eq!(
            resolver.resolve(&group, day("2014-12-31")),
            Resolution::NoMatch(NoMatchReason::BeforeInception)
        );
        assert_eq!(
            resolver.resolve_attributes(&group, day("2015-01-01")),
            Some(&terms(305, "3.5"))
        );
    }

    #[test]
    fn test_open_end_matches_far_future() {
        let (resolver, _) = resolver_for(sample_dimension());
        let resolution = resolver.resolve(&GroupKey::from("20"), day("9999-12-31"));
        assert_eq!(resolution.record().unwrap().surrogate_id.0, 5);
        let resolution = resolver.resolve(&GroupKey::from("30"), day("2400-01-01"));
        assert_eq!(resolution.record().unwrap().surrogate_id.0, 10);
    }

    #[test]
    fn test_closed_end_day_matches_its_version() {
        let (resolver, _) = resolver_for(agreement_101_chain());
        let group = GroupKey::from("20");
        assert_eq!(
            resolver.resolve_attributes(&group, day("2015-02-20")),
            Some(&terms(305, "3.5"))
        );
        assert_eq!(
            resolver.resolve(&group, day("2015-05-17")).record().map(|r| r.surrogate_id.0),
            Some(2)
        );
        assert_eq!(
            resolver.resolve_attributes(&group, day("2015-08-22")),
            Some(&terms(539, "6.0"))
        );
    }

    #[test]
    fn test_compacted_sample_agrees_with_naive_scan_of_raw_rows() {
        let raw = sample_dimension();
        let (resolver, failures) = resolver_for(raw.clone());
        assert!(failures.is_empty());

        for (group, entity) in [("20", "101"), ("25", "102")] {
            let chain: Vec<IntervalRecord> = raw
                .iter()
                .filter(|record| record.entity_id.as_str() == entity)
                .cloned()
                .collect();
            let group = GroupKey::from(group);
            let mut as_of = day("2014-12-01");
            while as_of < day("2017-01-01") {
                let expected = naive_resolve(&chain, as_of).map(|record| &record.attributes);
                assert_eq!(resolver.resolve_attributes(&group, as_of), expected, "{as_of}");
                as_of = as_of.next_day().unwrap();
            }
        }
    }

    #[test]
    fn test_unknown_group() {
        let (resolver, _) = resolver_for(sample_dimension());
        assert_eq!(
            resolver.resolve(&GroupKey::from("404"), day("2015-06-01")),
            Resolution::NoMatch(NoMatchReason::UnknownGroup)
        );
        assert!(!resolver.contains_group(&GroupKey::from("404")));
    }

    #[test]
    fn test_agrees_with_naive_scan_of_raw_chain() {
        let raw = random_chain("301", "g", 1, 30, 3, 11);
        let (resolver, failures) = resolver_for(raw.clone());
        assert!(failures.is_empty());
        let group = GroupKey::from("g");
        let mut as_of = day("2009-12-01");
        let last_start = raw.last().unwrap().validity.from;
        while as_of < last_start + time::Duration::days(30) {
            let expected = naive_resolve(&raw, as_of).map(|record| &record.attributes);
            assert_eq!(resolver.resolve_attributes(&group, as_of), expected, "{as_of}");
            as_of = as_of.next_day().unwrap();
        }
    }

    #[test]
    fn test_several_entities_share_a_group() {
        let first = vec![
            agreement(1, "201", "2015-01-01", "2015-06-01", "9", 1, "1.0"),
        ];
        let second = vec![
            agreement(2, "202", "2015-07-01", "2015-09-01", "9", 2, "2.0"),
            agreement(3, "202", "2015-09-01", "9999-12-31", "9", 3, "3.0"),
        ];
        let first = dedup_chain(&first).unwrap();
        let second = dedup_chain(&second).unwrap();
        let e1 = EntityId::from("201");
        let e2 = EntityId::from("202");
        let (resolver, failures) =
            PointInTimeResolver::build([(&e2, second.as_slice()), (&e1, first.as_slice())]);
        assert!(failures.is_empty());

        let group = GroupKey::from("9");
        assert_eq!(resolver.timeline(&group).unwrap().len(), 3);
        assert_eq!(resolver.resolve_attributes(&group, day("2015-03-01")), Some(&terms(1, "1.0")));
        assert_eq!(
            resolver.resolve(&group, day("2015-06-15")),
            Resolution::NoMatch(NoMatchReason::Gap)
        );
        assert_eq!(resolver.resolve_attributes(&group, day("2016-03-01")), Some(&terms(3, "3.0")));
    }

    #[test]
    fn test_overlapping_entity_in_group_rejected() {
        let first = vec![agreement(1, "201", "2015-01-01", "9999-12-31", "9", 1, "1.0")];
        let second = vec![agreement(2, "202", "2016-01-01", "9999-12-31", "9", 2, "2.0")];
        let e1 = EntityId::from("201");
        let e2 = EntityId::from("202");
        let (resolver, failures) =
            PointInTimeResolver::build([(&e1, first.as_slice()), (&e2, second.as_slice())]);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].subject().as_deref(), Some("202"));
        assert_eq!(resolver.record_count(), 1);
        assert_eq!(
            resolver.resolve_attributes(&GroupKey::from("9"), day("2017-01-01")),
            Some(&terms(1, "1.0"))
        );
    }
}
