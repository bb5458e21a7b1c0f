use clap::{Parser, Subcommand};
use log::{error, warn};
use quincena::{
    session::View,
    sync::{ImportReport, SettleStatus},
    Config, ExpenseId, Feedback, Gateway, HttpRemote, Intent, Session, SyncOutcome,
};
use rust_decimal::Decimal;
use std::{collections::BTreeSet, error::Error};

#[derive(Parser, Debug)]
#[command(name = "quincena", version, about = "Fortnightly expense ledger")]
struct Cli {
    /// Period label to work on (defaults to the current one)
    #[arg(short = 'p', long = "period", global = true)]
    period: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the selectable periods
    Periods,
    /// Show totals, categories and the weekly split
    Show,
    /// Record an expense
    Add {
        amount: String,
        #[arg(short = 'd', long = "description", default_value = "")]
        description: String,
        #[arg(short = 'c', long = "category", default_value = "")]
        category: String,
    },
    /// Delete one or more expenses by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Load the fixed expenses into the period
    ImportDefaults,
    /// Ask the remote sheet to load the fixed expenses itself
    ImportRemote {
        /// Poll until the imported expenses show up
        #[arg(long)]
        wait: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let gateway = match config.api_url.as_deref() {
        Some(url) => Gateway::new(HttpRemote::new(url)),
        None => {
            warn!("no endpoint configured, running local-only");
            Gateway::local_only()
        }
    };
    let mut session = Session::new(gateway, &config);

    if config.api_url.is_some() {
        if let Err(e) = session.dispatch(Intent::Refresh) {
            error!("starting from an empty ledger: {}", e);
        }
    }

    if let Some(period) = cli.period {
        session.dispatch(Intent::SelectPeriod(period))?;
    }

    match cli.command {
        Command::Periods => {
            for label in session.periods() {
                let marker = if label == session.period() { "*" } else { " " };
                println!("{} {}", marker, label);
            }
        }
        Command::Show => print_view(&session.snapshot()),
        Command::Add {
            amount,
            description,
            category,
        } => {
            let feedback = session.dispatch(Intent::Add {
                amount,
                description,
                category,
            })?;
            report(&feedback);
            print_view(&session.snapshot());
        }
        Command::Delete { ids } => {
            let feedback = if ids.len() == 1 {
                session.dispatch(Intent::Delete(ExpenseId::from(ids[0].as_str())))?
            } else {
                let ids: BTreeSet<ExpenseId> = ids.into_iter().map(ExpenseId::from).collect();
                session.dispatch(Intent::DeleteMany(ids))?
            };
            report(&feedback);
            print_view(&session.snapshot());
        }
        Command::ImportDefaults => {
            let feedback = session.dispatch(Intent::ImportDefaults)?;
            report(&feedback);
            print_view(&session.snapshot());
        }
        Command::ImportRemote { wait } => {
            report(&session.dispatch(Intent::RequestServerImport)?);
            if wait {
                report(&session.dispatch(Intent::SettleImport)?);
                print_view(&session.snapshot());
            }
        }
    }

    Ok(())
}

fn report(feedback: &Feedback) {
    match feedback {
        Feedback::Created { id, outcome } => {
            println!("created {}", id);
            report_outcome(outcome);
        }
        Feedback::Synced(outcome) => report_outcome(outcome),
        Feedback::Imported(ImportReport {
            created,
            failed_writes,
            ..
        }) => {
            println!("loaded {} fixed expenses", created.len());
            if *failed_writes > 0 {
                println!("{} of them could not be sent to the remote", failed_writes);
            }
        }
        Feedback::Settle(SettleStatus::Settled { new_records }) => {
            println!("remote import finished, {} new expenses", new_records)
        }
        Feedback::Settle(SettleStatus::StillPending) => {
            println!("remote import not visible yet, refresh later")
        }
        Feedback::Settle(SettleStatus::NothingPending) => println!("no remote import pending"),
        Feedback::Noop => println!("nothing changed"),
        Feedback::Refreshed { records } => println!("{} expenses on the remote", records),
    }
}

fn report_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Applied => println!("saved locally (no remote configured)"),
        SyncOutcome::AppliedRemoteUnknown => println!("sent to the remote"),
        SyncOutcome::RolledBack(e) => println!("undone, the remote could not be reached: {}", e),
    }
}

fn print_view(view: &View<'_>) {
    println!("{}", view.period);
    println!(
        "spent {} of {} ({}%){}",
        money(view.budget.spent),
        money(view.budget.limit),
        view.budget.percent,
        if view.budget.over_budget {
            " - over budget!"
        } else {
            ""
        }
    );
    println!(
        "week 1: {}  week 2: {}",
        money(view.halves.week_one_total()),
        money(view.halves.week_two_total())
    );

    for c in &view.categories {
        println!("  {:<12} {:>14} {:>6}%", c.category, money(c.total), c.share);
    }

    println!();
    for r in &view.records {
        println!(
            "  {:<22} {} {:>14}  {} [{}]",
            r.id,
            r.date.format("%d/%m"),
            money(r.amount),
            r.description,
            r.category
        );
    }
}

// "$1,234,567.5"
fn money(amount: Decimal) -> String {
    let text = amount.normalize().to_string();
    let (int, frac) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };
    let (sign, digits) = match int.strip_prefix('-') {
        Some(d) => ("-", d),
        None => ("", int),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac {
        Some(f) => format!("{}${}.{}", sign, grouped, f),
        None => format!("{}${}", sign, grouped),
    }
}
