use chrono::{Datelike, NaiveDate};
use log::trace;
use std::{fmt, str::FromStr};
use thiserror::Error;

// Labels are shown to (and typed by) Spanish-speaking users and are also the grouping
// key stored on the remote sheet, so the names must never change.
const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

const LABEL_SEPARATOR: &str = " - ";

/// One of the two halves of a month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Half {
    First,
    Second,
}

/// A fortnightly budgeting window.
///
/// Field order matters: the derived `Ord` sorts by year, then month, then half, which
/// is chronological. The month is always in 1-12; build periods with `Period::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
    half: Half,
}

/// Which week of a half-period an expense falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Week {
    One,
    Two,
}

/// How the days of a half-period are split into two weeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfSplit {
    /// Two inclusive day ranges. A range whose start is greater than its end wraps
    /// around the end of the month, e.g. `(30, 7)` covers the 30th, 31st and 1st-7th.
    Ranges {
        week_one: (u32, u32),
        week_two: (u32, u32),
    },
    /// Days up to and including the split day are week one, everything after is
    /// week two.
    SplitDay(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("'{0}' is not a recognised period label")]
    UnknownLabel(String),
    #[error("month {0} is out of range")]
    InvalidMonth(u32),
    #[error("unknown period scheme '{0}'")]
    UnknownScheme(String),
}

/// The available boundary policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Payday,
    Calendar,
}

/// The rules that map calendar dates onto periods and weeks.
pub trait PeriodPolicy {
    /// The period that `today` is budgeted against
    fn current_period(&self, today: NaiveDate) -> Period;

    /// Render a period as the label stored on each expense
    fn render(&self, period: &Period) -> String;

    /// The week split for a half
    fn split_boundary(&self, half: Half) -> HalfSplit;

    fn current_period_label(&self, today: NaiveDate) -> String {
        self.render(&self.current_period(today))
    }

    /// Parse a label produced by `render`. Labels from a different policy are
    /// rejected, even if they carry the same month and half.
    fn parse_label(&self, label: &str) -> Result<Period, PeriodError> {
        let period = parse_label_prefix(label)?;

        if self.render(&period) != label {
            return Err(PeriodError::UnknownLabel(label.into()));
        }

        Ok(period)
    }

    /// Every selectable label in chronological order: the second half of the previous
    /// December, followed by both halves of every month from January this year until
    /// December `years_ahead` years from now.
    fn enumerate_periods(&self, today: NaiveDate, years_ahead: u32) -> Vec<String> {
        let year = today.year();
        let mut labels = Vec::with_capacity(1 + 24 * (years_ahead as usize + 1));

        labels.push(self.render(&Period {
            year: year - 1,
            month: 12,
            half: Half::Second,
        }));

        for y in year..=year + years_ahead as i32 {
            for month in 1..=12 {
                for half in [Half::First, Half::Second] {
                    labels.push(self.render(&Period {
                        year: y,
                        month,
                        half,
                    }));
                }
            }
        }

        labels
    }

    /// Whether the label's half marker is the first-half token
    fn is_first_half(&self, label: &str) -> bool {
        label
            .rsplit(LABEL_SEPARATOR)
            .next()
            .map_or(false, |h| h.starts_with(Half::First.token()))
    }

    /// Bucket a day of the month into a week of the period labelled `label`
    fn week_of(&self, label: &str, day: u32) -> Option<Week> {
        let half = if self.is_first_half(label) {
            Half::First
        } else {
            Half::Second
        };

        let week = self.split_boundary(half).week_of(day);
        trace!("day {} of '{}' is in week {:?}", day, label, week);
        week
    }
}

/// Halves anchored on the paydays of the 15th and the 30th.
///
/// Money received on the 15th funds the first half, which therefore runs from the 15th
/// until the day before the 30th. Money received on the 30th funds the second half,
/// which runs into the first fortnight of the following month.
#[derive(Debug, Default, Clone, Copy)]
pub struct PaydayPolicy;

/// Halves that follow the calendar: the 1st-15th and the 16th to month end.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalendarPolicy;

impl PeriodPolicy for PaydayPolicy {
    fn current_period(&self, today: NaiveDate) -> Period {
        let day = today.day();
        let this_month = (today.year(), today.month());

        let ((year, month), half) = if day >= 30 {
            (this_month, Half::Second)
        } else if day >= 15 {
            (this_month, Half::First)
        } else {
            (previous_month(this_month.0, this_month.1), Half::Second)
        };

        Period { year, month, half }
    }

    fn render(&self, period: &Period) -> String {
        let payday = match period.half {
            Half::First => 15,
            Half::Second => 30,
        };

        format!("{} (Día {})", period.short_label(), payday)
    }

    fn split_boundary(&self, half: Half) -> HalfSplit {
        match half {
            Half::First => HalfSplit::Ranges {
                week_one: (15, 22),
                week_two: (23, 31),
            },
            Half::Second => HalfSplit::Ranges {
                week_one: (30, 7),
                week_two: (8, 14),
            },
        }
    }
}

impl PeriodPolicy for CalendarPolicy {
    fn current_period(&self, today: NaiveDate) -> Period {
        let half = if today.day() <= 15 {
            Half::First
        } else {
            Half::Second
        };

        Period {
            year: today.year(),
            month: today.month(),
            half,
        }
    }

    fn render(&self, period: &Period) -> String {
        period.short_label()
    }

    fn split_boundary(&self, half: Half) -> HalfSplit {
        match half {
            Half::First => HalfSplit::SplitDay(8),
            Half::Second => HalfSplit::SplitDay(23),
        }
    }
}

impl Half {
    /// The marker used in labels and in the import directive
    pub fn token(self) -> &'static str {
        match self {
            Half::First => "Q1",
            Half::Second => "Q2",
        }
    }
}

impl Period {
    pub fn new(year: i32, month: u32, half: Half) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }

        Ok(Period { year, month, half })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn half(&self) -> Half {
        self.half
    }

    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[self.month as usize - 1]
    }

    /// The policy-independent part of a label, e.g. "Marzo 2026 - Q1"
    pub fn short_label(&self) -> String {
        format!(
            "{} {}{}{}",
            self.month_name(),
            self.year,
            LABEL_SEPARATOR,
            self.half.token()
        )
    }

    /// The period immediately after this one
    pub fn succ(&self) -> Period {
        match self.half {
            Half::First => Period {
                half: Half::Second,
                ..*self
            },
            Half::Second => {
                let (year, month) = if self.month == 12 {
                    (self.year + 1, 1)
                } else {
                    (self.year, self.month + 1)
                };
                Period {
                    year,
                    month,
                    half: Half::First,
                }
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.short_label())
    }
}

impl Scheme {
    pub fn policy(self) -> Box<dyn PeriodPolicy> {
        match self {
            Scheme::Payday => Box::new(PaydayPolicy),
            Scheme::Calendar => Box::new(CalendarPolicy),
        }
    }
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Payday
    }
}

impl FromStr for Scheme {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "payday" => Ok(Scheme::Payday),
            "calendar" => Ok(Scheme::Calendar),
            other => Err(PeriodError::UnknownScheme(other.into())),
        }
    }
}

impl HalfSplit {
    pub fn week_of(&self, day: u32) -> Option<Week> {
        match *self {
            HalfSplit::Ranges { week_one, week_two } => {
                if in_range(week_one, day) {
                    Some(Week::One)
                } else if in_range(week_two, day) {
                    Some(Week::Two)
                } else {
                    None
                }
            }
            HalfSplit::SplitDay(split) if day <= split => Some(Week::One),
            HalfSplit::SplitDay(_) => Some(Week::Two),
        }
    }
}

fn in_range((start, end): (u32, u32), day: u32) -> bool {
    if start <= end {
        day >= start && day <= end
    } else {
        day >= start || day <= end
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

// Parses "<Month> <year> - Q<n>" and ignores anything after the half token. The caller
// is responsible for checking any policy-specific suffix.
fn parse_label_prefix(label: &str) -> Result<Period, PeriodError> {
    let unknown = || PeriodError::UnknownLabel(label.into());

    let (head, tail) = label.split_once(LABEL_SEPARATOR).ok_or_else(unknown)?;
    let (name, year) = head.split_once(' ').ok_or_else(unknown)?;

    let month = MONTH_NAMES
        .iter()
        .position(|m| *m == name)
        .ok_or_else(unknown)? as u32
        + 1;
    let year = year.parse::<i32>().map_err(|_| unknown())?;

    let half = if tail.starts_with(Half::First.token()) {
        Half::First
    } else if tail.starts_with(Half::Second.token()) {
        Half::Second
    } else {
        return Err(unknown());
    };

    Ok(Period { year, month, half })
}
