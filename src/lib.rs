//! Fortnightly ("quincena") expense ledger.
//!
//! Expenses are grouped by half-month period, aggregated for display and kept in step
//! with a remote spreadsheet endpoint using optimistic local mutation.

pub mod config;
pub mod expense;
pub mod ledger;
pub mod period;
pub mod remote;
pub mod selection;
pub mod session;
pub mod sync;

pub use config::Config;
pub use expense::{Expense, ExpenseId};
pub use ledger::Ledger;
pub use period::{CalendarPolicy, PaydayPolicy, Period, PeriodPolicy, Scheme};
pub use remote::{HttpRemote, NetworkError, Remote};
pub use session::{Feedback, Intent, Session, SessionError};
pub use sync::{Gateway, SyncOutcome};
