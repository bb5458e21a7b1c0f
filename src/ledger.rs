use crate::{
    expense::{Expense, ExpenseId},
    period::{PeriodPolicy, Week},
};
use chrono::{Datelike, FixedOffset};
use log::trace;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeSet, HashMap};

/// The spending limit for a single period when none is configured
pub const DEFAULT_BUDGET_LIMIT: Decimal = dec!(1600000);

/// The in-memory ledger, newest record first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    records: Vec<Expense>,
}

/// A copy of the ledger taken before a mutation that may need to be undone
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Vec<Expense>);

/// A category's share of a set of records
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryShare {
    pub category: String,
    pub total: Decimal,
    // Percentage of the overall total, 0-100
    pub share: Decimal,
}

/// Records of a period split into its two weeks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HalfBuckets<'a> {
    pub week_one: Vec<&'a Expense>,
    pub week_two: Vec<&'a Expense>,
}

/// Spending against the period limit
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetProgress {
    pub spent: Decimal,
    pub limit: Decimal,
    // Percentage of the limit used, capped at 100
    pub percent: Decimal,
    pub over_budget: bool,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    /// Build a ledger from records that are already newest-first
    pub fn from_records(records: Vec<Expense>) -> Self {
        Ledger { records }
    }

    pub fn records(&self) -> &[Expense] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &ExpenseId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }

    /// Every record whose period label is exactly `label`, newest first
    pub fn records_for_period(&self, label: &str) -> Vec<&Expense> {
        self.records.iter().filter(|r| r.period == label).collect()
    }

    /// Insert a record at the front. Duplicate ids are the caller's problem.
    pub fn add(&mut self, record: Expense) {
        self.records.insert(0, record);
    }

    /// Insert several records at the front, keeping their relative order
    pub fn add_all(&mut self, records: Vec<Expense>) {
        self.records.splice(0..0, records);
    }

    /// Remove the record with `id`. Removing an unknown id is not an error.
    pub fn remove(&mut self, id: &ExpenseId) -> Option<Expense> {
        let index = self.records.iter().position(|r| &r.id == id)?;
        Some(self.records.remove(index))
    }

    /// Remove every record whose id is in `ids`, returning how many were removed
    pub fn bulk_remove(&mut self, ids: &BTreeSet<ExpenseId>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !ids.contains(&r.id));
        let removed = before - self.records.len();

        trace!("bulk removed {} of {} requested ids", removed, ids.len());
        removed
    }

    pub fn replace_all(&mut self, records: Vec<Expense>) {
        self.records = records;
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.records.clone())
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.records = snapshot.0;
    }
}

/// Sum of the records' amounts. Amounts pulled from the remote are not bounded, so the
/// sum saturates rather than overflowing.
pub fn total<'a, I>(records: I) -> Decimal
where
    I: IntoIterator<Item = &'a Expense>,
{
    records
        .into_iter()
        .fold(Decimal::ZERO, |sum, r| sum.saturating_add(r.amount))
}

/// Total per category. Order is meaningless; see `category_breakdown` for display.
pub fn by_category<'a, I>(records: I) -> HashMap<String, Decimal>
where
    I: IntoIterator<Item = &'a Expense>,
{
    let mut totals = HashMap::new();

    for r in records {
        let sum = totals.entry(r.category.clone()).or_insert(Decimal::ZERO);
        *sum = sum.saturating_add(r.amount);
    }

    totals
}

/// Category totals sorted by total, largest first, with each category's percentage of
/// the grand total. Ties are broken by name so the order is stable.
pub fn category_breakdown(records: &[&Expense]) -> Vec<CategoryShare> {
    let grand_total = total(records.iter().copied());

    let mut shares: Vec<CategoryShare> = by_category(records.iter().copied())
        .into_iter()
        .map(|(category, total)| CategoryShare {
            share: percentage(total, grand_total).unwrap_or(Decimal::ZERO),
            category,
            total,
        })
        .collect();

    shares.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.category.cmp(&b.category))
    });
    shares
}

/// Split the records of period `label` into weeks using the day of month of each
/// record's date, as seen from `offset`. Records outside both weeks are left out.
pub fn bucket_by_half<'a>(
    records: &[&'a Expense],
    label: &str,
    policy: &dyn PeriodPolicy,
    offset: FixedOffset,
) -> HalfBuckets<'a> {
    let mut buckets = HalfBuckets::default();

    for r in records {
        let day = r.date.with_timezone(&offset).day();
        match policy.week_of(label, day) {
            Some(Week::One) => buckets.week_one.push(*r),
            Some(Week::Two) => buckets.week_two.push(*r),
            None => {}
        }
    }

    buckets
}

impl<'a> HalfBuckets<'a> {
    pub fn week_one_total(&self) -> Decimal {
        total(self.week_one.iter().copied())
    }

    pub fn week_two_total(&self) -> Decimal {
        total(self.week_two.iter().copied())
    }
}

impl BudgetProgress {
    pub fn new(spent: Decimal, limit: Decimal) -> Self {
        BudgetProgress {
            spent,
            limit,
            percent: percentage(spent, limit).map_or(dec!(100), |p| p.min(dec!(100))),
            over_budget: spent > limit,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.limit.saturating_sub(self.spent)
    }
}

// Percentage of `part` in `whole`, rounded to one decimal place. An empty whole is 0%;
// `None` when the result doesn't fit in a `Decimal`.
fn percentage(part: Decimal, whole: Decimal) -> Option<Decimal> {
    if whole.is_zero() {
        return Some(Decimal::ZERO);
    }

    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .map(|p| p.round_dp(1))
}
