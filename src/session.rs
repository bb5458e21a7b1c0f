use crate::{
    config::Config,
    expense::{
        default_templates, parse_amount, Expense, ExpenseId, FixedExpense, ValidationError,
        CATEGORIES, DEFAULT_DESCRIPTION,
    },
    ledger::{self, BudgetProgress, CategoryShare, HalfBuckets},
    period::{PeriodError, PeriodPolicy},
    remote::{NetworkError, Remote},
    selection::Selection,
    sync::{Gateway, ImportReport, PendingImport, RetryPolicy, SettleStatus, SyncOutcome},
};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use log::{debug, info};
use rust_decimal::Decimal;
use std::{collections::BTreeSet, time::Duration};
use thiserror::Error;

/// Something the user asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SelectPeriod(String),
    Refresh,
    Add {
        amount: String,
        description: String,
        category: String,
    },
    Delete(ExpenseId),
    /// Delete several records at once, wherever they are, without going through
    /// select mode
    DeleteMany(BTreeSet<ExpenseId>),
    EnterSelect,
    ToggleSelect(ExpenseId),
    ExitSelect,
    BulkDelete,
    ImportDefaults,
    RequestServerImport,
    SettleImport,
}

/// What came of an intent
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    Noop,
    Refreshed { records: usize },
    Created { id: ExpenseId, outcome: SyncOutcome },
    Synced(SyncOutcome),
    Imported(ImportReport),
    Settle(SettleStatus),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("expense refused: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Period(#[from] PeriodError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// A read-only picture of everything the screen shows for the active period
#[derive(Debug)]
pub struct View<'a> {
    pub period: &'a str,
    pub records: Vec<&'a Expense>,
    pub total: Decimal,
    pub budget: BudgetProgress,
    pub categories: Vec<CategoryShare>,
    pub halves: HalfBuckets<'a>,
    pub selection: &'a Selection,
    pub pending: Option<&'a PendingImport>,
}

/// The single owner of the budgeting screen's state.
///
/// The presentation layer never mutates anything directly: it sends `Intent`s to
/// `dispatch` and renders the `View` returned by `snapshot`.
pub struct Session<R> {
    gateway: Gateway<R>,
    selection: Selection,
    policy: Box<dyn PeriodPolicy>,
    period: String,
    budget_limit: Decimal,
    utc_offset: FixedOffset,
    templates: Vec<FixedExpense>,
    retry: RetryPolicy,
    clock: fn() -> DateTime<Utc>,
    sleep: fn(Duration),
}

impl<R: Remote> Session<R> {
    /// Start a session on the period that is current according to `config`'s scheme
    pub fn new(gateway: Gateway<R>, config: &Config) -> Self {
        Session::with_clock(gateway, config, Utc::now)
    }

    pub fn with_clock(gateway: Gateway<R>, config: &Config, clock: fn() -> DateTime<Utc>) -> Self {
        let policy = config.scheme.policy();
        let today = clock().with_timezone(&config.utc_offset).date_naive();
        let period = policy.current_period_label(today);
        debug!("session starts on period '{}'", period);

        Session {
            gateway,
            selection: Selection::default(),
            policy,
            period,
            budget_limit: config.budget_limit,
            utc_offset: config.utc_offset,
            templates: default_templates(),
            retry: RetryPolicy::default(),
            clock,
            sleep: std::thread::sleep,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleep: fn(Duration)) -> Self {
        self.retry = retry;
        self.sleep = sleep;
        self
    }

    pub fn with_templates(mut self, templates: Vec<FixedExpense>) -> Self {
        self.templates = templates;
        self
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn policy(&self) -> &dyn PeriodPolicy {
        self.policy.as_ref()
    }

    pub fn gateway(&self) -> &Gateway<R> {
        &self.gateway
    }

    /// Every period the user may switch to
    pub fn periods(&self) -> Vec<String> {
        self.policy.enumerate_periods(self.today(), 1)
    }

    pub fn dispatch(&mut self, intent: Intent) -> Result<Feedback, SessionError> {
        debug!("dispatching {:?}", intent);

        let feedback = match intent {
            Intent::SelectPeriod(label) => {
                self.policy.parse_label(&label)?;
                if label != self.period {
                    self.selection.exit();
                    self.period = label;
                }
                Feedback::Noop
            }
            Intent::Refresh => Feedback::Refreshed {
                records: self.gateway.pull_all()?,
            },
            Intent::Add {
                amount,
                description,
                category,
            } => {
                let amount = parse_amount(&amount)?;
                let description = non_blank(description, DEFAULT_DESCRIPTION);
                let category = non_blank(category, CATEGORIES[0]);

                let record = Expense::new(
                    amount,
                    description,
                    category,
                    self.period.clone(),
                    (self.clock)(),
                );
                let id = record.id.clone();
                let outcome = self.gateway.push_add(record);

                Feedback::Created { id, outcome }
            }
            Intent::Delete(id) => Feedback::Synced(self.gateway.push_delete(&id)),
            Intent::DeleteMany(ids) if ids.is_empty() => Feedback::Noop,
            Intent::DeleteMany(ids) => Feedback::Synced(self.gateway.push_bulk_delete(&ids)),
            Intent::EnterSelect => {
                let available = self.gateway.ledger().records_for_period(&self.period).len();
                if !self.selection.enter(available) {
                    debug!("nothing to select in '{}'", self.period);
                }
                Feedback::Noop
            }
            Intent::ToggleSelect(id) => {
                self.selection.toggle(id);
                Feedback::Noop
            }
            Intent::ExitSelect => {
                self.selection.exit();
                Feedback::Noop
            }
            Intent::BulkDelete => {
                // Select mode ends as soon as the bulk action starts, whatever its outcome
                let ids = self.selection.take();
                if ids.is_empty() {
                    Feedback::Noop
                } else {
                    Feedback::Synced(self.gateway.push_bulk_delete(&ids))
                }
            }
            Intent::ImportDefaults => {
                let report =
                    self.gateway
                        .push_import_defaults(&self.period, &self.templates, (self.clock)());
                info!(
                    "loaded {} fixed expenses into '{}' ({} writes failed)",
                    report.created.len(),
                    self.period,
                    report.failed_writes
                );
                Feedback::Imported(report)
            }
            Intent::RequestServerImport => {
                let period = self.policy.parse_label(&self.period)?;
                Feedback::Synced(self.gateway.request_server_side_import(
                    &period,
                    &self.period,
                    (self.clock)(),
                ))
            }
            Intent::SettleImport => Feedback::Settle(
                self.gateway
                    .settle_pending_import(&self.retry, self.sleep),
            ),
        };

        Ok(feedback)
    }

    pub fn snapshot(&self) -> View<'_> {
        let records = self.gateway.ledger().records_for_period(&self.period);
        let total = ledger::total(records.iter().copied());

        View {
            period: &self.period,
            total,
            budget: BudgetProgress::new(total, self.budget_limit),
            categories: ledger::category_breakdown(&records),
            halves: ledger::bucket_by_half(
                &records,
                &self.period,
                self.policy.as_ref(),
                self.utc_offset,
            ),
            records,
            selection: &self.selection,
            pending: self.gateway.pending(),
        }
    }
}

impl<R> Session<R> {
    // The user's calendar day
    fn today(&self) -> NaiveDate {
        (self.clock)().with_timezone(&self.utc_offset).date_naive()
    }
}

fn non_blank(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.into()
    } else {
        value
    }
}
