use crate::{
    expense::{Directive, Expense, ExpenseId, FixedExpense},
    ledger::{Ledger, Snapshot},
    period::Period,
    remote::{NetworkError, Remote},
};
use chrono::{DateTime, Utc};
use log::{debug, error, trace, warn};
use std::{collections::BTreeSet, time::Duration};

/// What to do with the local mutation when its remote write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Keep the local change. The remote may or may not have it.
    BestEffort,
    /// Restore the ledger as it was before the mutation.
    RollbackOnError,
}

/// The kinds of mutation the gateway performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Delete,
    BulkDelete,
    ImportDefaults,
}

/// The result of a two-phase local-then-remote mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Applied locally; there is no remote to tell.
    Applied,
    /// Applied locally and the remote write was attempted. Whether the remote took it
    /// cannot be observed.
    AppliedRemoteUnknown,
    /// The remote write failed and the local change was undone.
    RolledBack(NetworkError),
}

/// Result of loading the fixed expense templates into a period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub created: Vec<ExpenseId>,
    pub failed_writes: usize,
    pub outcome: SyncOutcome,
}

/// A server-side import that has been requested but not yet observed in a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImport {
    pub period: String,
    // Number of records the period had when the import was requested
    pub baseline: usize,
    pub requested_at: DateTime<Utc>,
}

/// Result of waiting for a pending server-side import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleStatus {
    NothingPending,
    Settled { new_records: usize },
    StillPending,
}

/// How long and how often to poll for a server-side import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

/// Owns the ledger and keeps it in step with an optional remote.
///
/// Every mutation is applied locally before its remote call is made, so the local view
/// always reflects the user's own writes. What happens when the remote call fails is
/// decided by the operation's `ReconcilePolicy`.
pub struct Gateway<R> {
    ledger: Ledger,
    remote: Option<R>,
    pending: Option<PendingImport>,
}

impl Operation {
    pub fn policy(self) -> ReconcilePolicy {
        match self {
            Operation::Add | Operation::ImportDefaults => ReconcilePolicy::BestEffort,
            Operation::Delete | Operation::BulkDelete => ReconcilePolicy::RollbackOnError,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 4,
            initial_delay: Duration::from_secs(2),
            factor: 2,
        }
    }
}

impl<R: Remote> Gateway<R> {
    pub fn new(remote: R) -> Self {
        Gateway {
            ledger: Ledger::new(),
            remote: Some(remote),
            pending: None,
        }
    }

    /// A gateway that never talks to a remote
    pub fn local_only() -> Self {
        Gateway {
            ledger: Ledger::new(),
            remote: None,
            pending: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn remote(&self) -> Option<&R> {
        self.remote.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingImport> {
        self.pending.as_ref()
    }

    /// Replace the ledger with the remote's. The remote serves records oldest first, so
    /// they are reversed. On failure the ledger is left alone.
    pub fn pull_all(&mut self) -> Result<usize, NetworkError> {
        let remote = match self.remote.as_ref() {
            Some(r) => r,
            None => return Ok(self.ledger.len()),
        };

        let mut records = remote.fetch_all().map_err(|e| {
            error!("could not pull the remote ledger: {}", e);
            e
        })?;
        records.reverse();

        let count = records.len();
        self.ledger.replace_all(records);
        self.observe_pending();
        Ok(count)
    }

    pub fn push_add(&mut self, record: Expense) -> SyncOutcome {
        let directive = Directive::Add(record.clone());
        self.ledger.add(record);

        self.reconcile(Operation::Add, None, |remote| remote.post(&directive))
    }

    pub fn push_delete(&mut self, id: &ExpenseId) -> SyncOutcome {
        let backup = self.ledger.snapshot();
        if self.ledger.remove(id).is_none() {
            debug!("expense {} is not in the local ledger", id);
        }

        let directive = Directive::Delete { id: id.clone() };
        self.reconcile(Operation::Delete, Some(backup), |remote| {
            remote.post(&directive)
        })
    }

    /// Delete every id locally, then one remote delete per id in order. The first
    /// failure stops the loop and restores the whole pre-delete ledger, even though
    /// earlier deletes may already have reached the remote.
    pub fn push_bulk_delete(&mut self, ids: &BTreeSet<ExpenseId>) -> SyncOutcome {
        let backup = self.ledger.snapshot();
        self.ledger.bulk_remove(ids);

        self.reconcile(Operation::BulkDelete, Some(backup), |remote| {
            for (sent, id) in ids.iter().enumerate() {
                remote
                    .post(&Directive::Delete { id: id.clone() })
                    .map_err(|e| {
                        warn!("bulk delete stopped after {} of {} ids", sent, ids.len());
                        e
                    })?;
            }
            Ok(())
        })
    }

    /// Create one expense per template in `period`, add them all locally, then write
    /// them to the remote one at a time. A failed write doesn't stop the others.
    pub fn push_import_defaults(
        &mut self,
        period: &str,
        templates: &[FixedExpense],
        now: DateTime<Utc>,
    ) -> ImportReport {
        let records: Vec<Expense> = templates.iter().map(|t| t.to_expense(period, now)).collect();
        let created = records.iter().map(|r| r.id.clone()).collect();
        let directives: Vec<Directive> = records.iter().cloned().map(Directive::Add).collect();

        self.ledger.add_all(records);

        let mut failed_writes = 0;
        let outcome = self.reconcile(Operation::ImportDefaults, None, |remote| {
            let mut last_error = None;
            for directive in &directives {
                if let Err(e) = remote.post(directive) {
                    failed_writes += 1;
                    last_error = Some(e);
                }
            }
            last_error.map_or(Ok(()), Err)
        });

        ImportReport {
            created,
            failed_writes,
            outcome,
        }
    }

    /// Ask the remote to append the fixed expenses for `period` itself. Nothing changes
    /// locally; the records only show up in a later pull, so the request is remembered
    /// as pending until `settle_pending_import` (or a manual pull) sees them.
    ///
    /// The remote is read first so the pending import is measured against what the
    /// remote holds, not against local writes it may never have received. If that read
    /// fails the import is not requested.
    pub fn request_server_side_import(
        &mut self,
        period: &Period,
        label: &str,
        now: DateTime<Utc>,
    ) -> SyncOutcome {
        let remote = match self.remote.as_ref() {
            Some(r) => r,
            None => {
                warn!("no remote configured, server-side import of '{}' skipped", label);
                return SyncOutcome::Applied;
            }
        };

        let baseline = match remote.fetch_all() {
            Ok(records) => records.iter().filter(|r| r.period == label).count(),
            Err(e) => {
                error!("server-side import of '{}' not requested: {}", label, e);
                return SyncOutcome::RolledBack(e);
            }
        };

        let directive = Directive::ImportFixed {
            month: period.month_name().into(),
            year: period.year(),
            quincena: period.half().token().into(),
            full_quincena_name: label.into(),
        };

        match remote.post(&directive) {
            Ok(()) => {
                debug!("remote has {} records in '{}' before import", baseline, label);
                self.pending = Some(PendingImport {
                    period: label.into(),
                    baseline,
                    requested_at: now,
                });
                SyncOutcome::AppliedRemoteUnknown
            }
            Err(e) => {
                error!("server-side import of '{}' was not sent: {}", label, e);
                SyncOutcome::RolledBack(e)
            }
        }
    }

    /// Poll the remote with exponential backoff until the pending import's period
    /// grows, or the attempts run out. `sleep` is called before every pull.
    pub fn settle_pending_import<S>(&mut self, retry: &RetryPolicy, mut sleep: S) -> SettleStatus
    where
        S: FnMut(Duration),
    {
        let pending = match self.pending.clone() {
            Some(p) => p,
            None => return SettleStatus::NothingPending,
        };

        let mut delay = retry.initial_delay;
        for attempt in 1..=retry.attempts {
            sleep(delay);
            delay = delay.saturating_mul(retry.factor);

            if let Err(e) = self.pull_all() {
                warn!("attempt {} to observe import failed: {}", attempt, e);
                continue;
            }

            let count = self.ledger.records_for_period(&pending.period).len();
            trace!(
                "attempt {}: '{}' has {} records (was {})",
                attempt,
                pending.period,
                count,
                pending.baseline
            );

            // `pull_all` clears the marker once the period has grown
            if self.pending.is_none() {
                return SettleStatus::Settled {
                    new_records: count.saturating_sub(pending.baseline),
                };
            }
        }

        debug!("import of '{}' still not visible", pending.period);
        SettleStatus::StillPending
    }

    // Clear the pending import once a pull shows more records in its period than the
    // remote had when the import was requested
    fn observe_pending(&mut self) {
        let settled = match self.pending.as_ref() {
            Some(p) => self.ledger.records_for_period(&p.period).len() > p.baseline,
            None => false,
        };

        if settled {
            debug!("pending import is now visible in the ledger");
            self.pending = None;
        }
    }

    // Second phase of every mutation: run the remote calls and apply the operation's
    // policy if they fail.
    fn reconcile<F>(
        &mut self,
        operation: Operation,
        backup: Option<Snapshot>,
        send: F,
    ) -> SyncOutcome
    where
        F: FnOnce(&R) -> Result<(), NetworkError>,
    {
        let remote = match self.remote.as_ref() {
            Some(r) => r,
            None => return SyncOutcome::Applied,
        };

        let err = match send(remote) {
            Ok(()) => return SyncOutcome::AppliedRemoteUnknown,
            Err(e) => e,
        };

        match (operation.policy(), backup) {
            (ReconcilePolicy::RollbackOnError, Some(backup)) => {
                warn!("{:?} failed, rolling back local ledger: {}", operation, err);
                self.ledger.restore(backup);
                SyncOutcome::RolledBack(err)
            }
            _ => {
                warn!("{:?} not confirmed, keeping local change: {}", operation, err);
                SyncOutcome::AppliedRemoteUnknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expense::default_templates,
        period::{Half, PaydayPolicy, PeriodPolicy},
        remote::mock::MockRemote,
    };
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 9, 30, 0).unwrap()
    }

    fn expense(id: &str, amount: Decimal, period: &str) -> Expense {
        Expense {
            id: id.into(),
            amount,
            description: "x".into(),
            category: "Comida".into(),
            period: period.into(),
            date: now(),
        }
    }

    fn ids(ledger: &Ledger) -> Vec<String> {
        ledger.records().iter().map(|r| r.id.to_string()).collect()
    }

    fn no_sleep(_: Duration) {}

    #[test]
    fn pull_all_reverses_remote_order() {
        let remote = MockRemote::with_records(vec![
            expense("old", dec!(1), "P1"),
            expense("mid", dec!(1), "P1"),
            expense("new", dec!(1), "P1"),
        ]);
        let mut gateway = Gateway::new(remote);

        assert_eq!(gateway.pull_all(), Ok(3));
        assert_eq!(ids(gateway.ledger()), vec!["new", "mid", "old"]);
    }

    #[test]
    fn failed_pull_leaves_ledger_alone() {
        let remote = MockRemote::default();
        remote.fail_fetches();
        let mut gateway =
            Gateway::new(remote).with_ledger(Ledger::from_records(vec![expense("1", dec!(1), "P1")]));

        assert!(gateway.pull_all().is_err());
        assert_eq!(ids(gateway.ledger()), vec!["1"]);
    }

    #[test]
    fn local_only_mode_applies_without_remote() {
        let mut gateway: Gateway<MockRemote> = Gateway::local_only();

        assert_eq!(gateway.push_add(expense("1", dec!(5), "P1")), SyncOutcome::Applied);
        assert_eq!(gateway.pull_all(), Ok(1));
        assert_eq!(gateway.push_delete(&"1".into()), SyncOutcome::Applied);
        assert!(gateway.ledger().is_empty());
    }

    #[test]
    fn push_add_is_optimistic_and_posted() {
        let mut gateway = Gateway::new(MockRemote::default());

        let outcome = gateway.push_add(expense("1", dec!(1000), "P1"));
        assert_eq!(outcome, SyncOutcome::AppliedRemoteUnknown);
        assert!(gateway.ledger().contains(&"1".into()));

        let remote = gateway.remote().unwrap();
        assert!(matches!(&remote.posted.borrow()[0], Directive::Add(e) if e.id == ExpenseId::from("1")));
    }

    #[test]
    fn failed_add_is_not_rolled_back() {
        let remote = MockRemote::default();
        remote.fail_posts_from(0);
        let mut gateway = Gateway::new(remote);

        let outcome = gateway.push_add(expense("1", dec!(1000), "P1"));
        assert_eq!(outcome, SyncOutcome::AppliedRemoteUnknown);
        assert!(gateway.ledger().contains(&"1".into()));
    }

    #[test]
    fn failed_delete_rolls_back() {
        let remote = MockRemote::default();
        remote.fail_posts_from(0);
        let ledger = Ledger::from_records(vec![
            expense("2", dec!(2), "P1"),
            expense("1", dec!(1), "P1"),
        ]);
        let mut gateway = Gateway::new(remote).with_ledger(ledger.clone());

        let outcome = gateway.push_delete(&"1".into());
        assert!(matches!(outcome, SyncOutcome::RolledBack(NetworkError::Transport(_))));
        assert_eq!(gateway.ledger(), &ledger);
    }

    #[test]
    fn delete_reaches_remote() {
        let remote = MockRemote::with_records(vec![expense("1", dec!(1), "P1")]);
        let mut gateway = Gateway::new(remote);
        gateway.pull_all().unwrap();

        assert_eq!(
            gateway.push_delete(&"1".into()),
            SyncOutcome::AppliedRemoteUnknown
        );
        assert!(gateway.ledger().is_empty());
        assert!(gateway.remote().unwrap().records.borrow().is_empty());
    }

    #[test]
    fn bulk_delete_sends_one_directive_per_id() {
        let remote = MockRemote::with_records(vec![
            expense("a", dec!(1), "P1"),
            expense("b", dec!(1), "P1"),
            expense("c", dec!(1), "P1"),
        ]);
        let mut gateway = Gateway::new(remote);
        gateway.pull_all().unwrap();

        let selection: BTreeSet<ExpenseId> = ["a", "c"].iter().map(|s| ExpenseId::from(*s)).collect();
        assert_eq!(
            gateway.push_bulk_delete(&selection),
            SyncOutcome::AppliedRemoteUnknown
        );

        assert_eq!(ids(gateway.ledger()), vec!["b"]);
        assert_eq!(
            *gateway.remote().unwrap().posted.borrow(),
            vec![
                Directive::Delete { id: "a".into() },
                Directive::Delete { id: "c".into() },
            ]
        );
    }

    #[test]
    fn bulk_delete_failure_restores_everything() {
        let remote = MockRemote::with_records(vec![
            expense("a", dec!(1), "P1"),
            expense("b", dec!(1), "P1"),
            expense("c", dec!(1), "P1"),
        ]);
        remote.fail_posts_from(1);
        let mut gateway = Gateway::new(remote);
        gateway.pull_all().unwrap();
        let before = gateway.ledger().clone();

        let selection: BTreeSet<ExpenseId> =
            ["a", "b", "c"].iter().map(|s| ExpenseId::from(*s)).collect();
        let outcome = gateway.push_bulk_delete(&selection);

        assert!(matches!(outcome, SyncOutcome::RolledBack(_)));
        assert_eq!(gateway.ledger(), &before);
        // The loop stops at the first failure
        assert_eq!(gateway.remote().unwrap().posted.borrow().len(), 2);
        // ...but the first delete already landed remotely
        assert_eq!(gateway.remote().unwrap().records.borrow().len(), 2);
    }

    #[test]
    fn import_defaults_adds_locally_and_posts_each() {
        let mut gateway = Gateway::new(MockRemote::default());
        gateway.push_add(expense("mine", dec!(1), "P1"));

        let report = gateway.push_import_defaults("P1", &default_templates(), now());

        assert_eq!(report.created.len(), 5);
        assert_eq!(report.failed_writes, 0);
        assert_eq!(report.outcome, SyncOutcome::AppliedRemoteUnknown);
        assert_eq!(gateway.ledger().records_for_period("P1").len(), 6);
        assert_eq!(gateway.ledger().records()[0].description, "Arriendo");
        assert_eq!(gateway.ledger().records()[5].id, ExpenseId::from("mine"));
        assert_eq!(gateway.remote().unwrap().posted.borrow().len(), 6);
    }

    #[test]
    fn import_defaults_keeps_records_when_writes_fail() {
        let remote = MockRemote::default();
        remote.fail_posts_from(3);
        let mut gateway = Gateway::new(remote);

        let report = gateway.push_import_defaults("P1", &default_templates(), now());

        assert_eq!(report.failed_writes, 2);
        assert_eq!(report.outcome, SyncOutcome::AppliedRemoteUnknown);
        assert_eq!(gateway.ledger().len(), 5);
        assert_eq!(crate::ledger::total(gateway.ledger().records()), dec!(842500));
    }

    #[test]
    fn server_side_import_settles_once_records_appear() {
        let label = PaydayPolicy.current_period_label(now().date_naive());
        let period = PaydayPolicy.parse_label(&label).unwrap();
        assert_eq!(period.half(), Half::First);

        let remote = MockRemote::default();
        // One fetch measures the baseline, the import lands before the third
        remote.appear_after_fetches(
            3,
            vec![expense("f1", dec!(450000), &label), expense("f2", dec!(70000), &label)],
        );
        let mut gateway = Gateway::new(remote);

        assert_eq!(
            gateway.request_server_side_import(&period, &label, now()),
            SyncOutcome::AppliedRemoteUnknown
        );
        assert_eq!(gateway.pending().map(|p| p.baseline), Some(0));
        assert_eq!(
            gateway.remote().unwrap().posted.borrow()[0],
            Directive::ImportFixed {
                month: "Marzo".into(),
                year: 2026,
                quincena: "Q1".into(),
                full_quincena_name: label.clone(),
            }
        );

        let mut delays = Vec::new();
        let status = gateway.settle_pending_import(&RetryPolicy::default(), |d| delays.push(d));

        assert_eq!(status, SettleStatus::Settled { new_records: 2 });
        assert_eq!(
            delays,
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert!(gateway.pending().is_none());
        assert_eq!(gateway.ledger().records_for_period(&label).len(), 2);
    }

    #[test]
    fn manual_pull_clears_pending_import() {
        let label = "Marzo 2026 - Q2 (Día 30)";
        let remote = MockRemote::default();
        remote.appear_after_fetches(2, vec![expense("f1", dec!(450000), label)]);
        let mut gateway = Gateway::new(remote);

        gateway.request_server_side_import(&Period::new(2026, 3, Half::Second).unwrap(), label, now());
        assert!(gateway.pending().is_some());

        gateway.pull_all().unwrap();
        assert!(gateway.pending().is_none());
    }

    #[test]
    fn server_side_import_gives_up_after_attempts() {
        let mut gateway = Gateway::new(MockRemote::default());
        let period = Period::new(2026, 3, Half::Second).unwrap();

        gateway.request_server_side_import(&period, "Marzo 2026 - Q2 (Día 30)", now());
        let retry = RetryPolicy {
            attempts: 2,
            ..RetryPolicy::default()
        };

        assert_eq!(
            gateway.settle_pending_import(&retry, no_sleep),
            SettleStatus::StillPending
        );
        assert!(gateway.pending().is_some());
        assert_eq!(gateway.remote().unwrap().fetches.get(), 3);
    }

    #[test]
    fn unsent_local_records_do_not_settle_import() {
        let label = "Marzo 2026 - Q2 (Día 30)";
        // A best-effort add that never reached the remote
        let ledger = Ledger::from_records(vec![expense("unsent", dec!(5000), label)]);
        let mut gateway = Gateway::new(MockRemote::default()).with_ledger(ledger);
        let period = Period::new(2026, 3, Half::Second).unwrap();

        gateway.request_server_side_import(&period, label, now());
        assert_eq!(gateway.pending().map(|p| p.baseline), Some(0));

        let retry = RetryPolicy {
            attempts: 2,
            ..RetryPolicy::default()
        };
        assert_eq!(
            gateway.settle_pending_import(&retry, no_sleep),
            SettleStatus::StillPending
        );
        assert!(gateway.pending().is_some());
    }

    #[test]
    fn existing_remote_records_do_not_settle_import() {
        let label = "Marzo 2026 - Q2 (Día 30)";
        let remote = MockRemote::with_records(vec![
            expense("1", dec!(1), label),
            expense("2", dec!(2), label),
        ]);
        // No pull before the request, so the local ledger is still empty
        let mut gateway = Gateway::new(remote);
        let period = Period::new(2026, 3, Half::Second).unwrap();

        gateway.request_server_side_import(&period, label, now());
        assert_eq!(gateway.pending().map(|p| p.baseline), Some(2));

        let retry = RetryPolicy {
            attempts: 2,
            ..RetryPolicy::default()
        };
        assert_eq!(
            gateway.settle_pending_import(&retry, no_sleep),
            SettleStatus::StillPending
        );
        assert_eq!(gateway.ledger().len(), 2);
        assert!(gateway.pending().is_some());
    }

    #[test]
    fn import_not_requested_when_remote_unreadable() {
        let remote = MockRemote::default();
        remote.fail_fetches();
        let mut gateway = Gateway::new(remote);
        let period = Period::new(2026, 3, Half::Second).unwrap();

        let outcome = gateway.request_server_side_import(&period, "Marzo 2026 - Q2 (Día 30)", now());

        assert!(matches!(outcome, SyncOutcome::RolledBack(NetworkError::Transport(_))));
        assert!(gateway.remote().unwrap().posted.borrow().is_empty());
        assert!(gateway.pending().is_none());
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let mut gateway = Gateway::new(MockRemote::default());
        let period = Period::new(2026, 3, Half::Second).unwrap();
        gateway.request_server_side_import(&period, "Marzo 2026 - Q2 (Día 30)", now());

        let retry = RetryPolicy {
            attempts: 80,
            initial_delay: Duration::from_secs(u64::MAX / 2),
            factor: 2,
        };
        let mut delays = Vec::new();
        gateway.settle_pending_import(&retry, |d| delays.push(d));

        assert_eq!(delays.len(), 80);
        assert_eq!(delays[79], Duration::MAX);
    }

    #[test]
    fn server_side_import_not_sent() {
        let remote = MockRemote::default();
        remote.fail_posts_from(0);
        let mut gateway = Gateway::new(remote);
        let period = Period::new(2026, 3, Half::Second).unwrap();

        let outcome = gateway.request_server_side_import(&period, "x", now());
        assert!(matches!(outcome, SyncOutcome::RolledBack(_)));
        assert!(gateway.pending().is_none());
        assert_eq!(
            gateway.settle_pending_import(&RetryPolicy::default(), no_sleep),
            SettleStatus::NothingPending
        );
    }

    #[test]
    fn reconcile_policies() {
        assert_eq!(Operation::Add.policy(), ReconcilePolicy::BestEffort);
        assert_eq!(Operation::ImportDefaults.policy(), ReconcilePolicy::BestEffort);
        assert_eq!(Operation::Delete.policy(), ReconcilePolicy::RollbackOnError);
        assert_eq!(Operation::BulkDelete.policy(), ReconcilePolicy::RollbackOnError);
    }
}
