//! Per-category spend summary over enriched rows.

use crate::join::EnrichedRecord;
use crate::model::UserId;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, HashSet};

/// Spend of active, unblocked users in one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub category_id: u32,
    /// Sum of the integer part of each amount
    pub total_amount: i64,
    pub distinct_users: usize,
}

/// Summarize enriched rows by category.
///
/// Blocked transactions and inactive users are ignored. Rows are ordered by
/// `total_amount` descending, then `category_id` ascending.
pub fn summarize_categories(rows: &[EnrichedRecord]) -> Vec<CategorySummary> {
    let mut totals: BTreeMap<u32, (i64, HashSet<&UserId>)> = BTreeMap::new();
    for row in rows {
        let tx = &row.transaction;
        if tx.is_blocked || !row.is_active {
            continue;
        }
        let whole = tx.amount.trunc().to_i64().unwrap_or_default();
        let entry = totals.entry(tx.category_id).or_default();
        entry.0 += whole;
        entry.1.insert(&tx.user_id);
    }

    let mut summary: Vec<CategorySummary> = totals
        .into_iter()
        .map(|(category_id, (total_amount, users))| CategorySummary {
            category_id,
            total_amount,
            distinct_users: users.len(),
        })
        .collect();
    summary.sort_by(|a, b| {
        b.total_amount
            .cmp(&a.total_amount)
            .then_with(|| a.category_id.cmp(&b.category_id))
    });
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupKey, TransactionEvent, TransactionId};
    use crate::test_support::day;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn row(id: &str, user: &str, category: u32, amount: &str, active: bool, blocked: bool) -> EnrichedRecord {
        EnrichedRecord {
            transaction: TransactionEvent {
                transaction_id: TransactionId::from(id),
                occurred_on: day("2020-01-05"),
                user_id: UserId::from(user),
                group_key: GroupKey::from(user),
                is_blocked: blocked,
                amount: Decimal::from_str(amount).unwrap(),
                category_id: category,
            },
            is_active: active,
            matched: None,
            attributes: None,
            no_match: None,
            transactions_last_window: None,
        }
    }

    #[test]
    fn test_summary_filters_and_truncates() {
        let rows = vec![
            row("t1", "a", 1, "10.99", true, false),
            row("t2", "b", 1, "5.50", true, false),
            row("t3", "a", 1, "1.20", true, false),
            row("t4", "c", 2, "40.00", false, false),
            row("t5", "d", 2, "3.00", true, true),
            row("t6", "d", 3, "16.01", true, false),
            row("t7", "e", 4, "0.99", true, false),
        ];
        let summary = summarize_categories(&rows);
        assert_eq!(
            summary,
            vec![
                CategorySummary {
                    category_id: 1,
                    total_amount: 16,
                    distinct_users: 2
                },
                CategorySummary {
                    category_id: 3,
                    total_amount: 16,
                    distinct_users: 1
                },
                CategorySummary {
                    category_id: 4,
                    total_amount: 0,
                    distinct_users: 1
                },
            ]
        );
    }

    #[test]
    fn test_summary_ties_break_on_category() {
        let rows = vec![
            row("t1", "a", 7, "3.00", true, false),
            row("t2", "b", 2, "3.90", true, false),
        ];
        let ids: Vec<u32> = summarize_categories(&rows)
            .iter()
            .map(|s| s.category_id)
            .collect();
        assert_eq!(ids, vec![2, 7]);
    }
}
