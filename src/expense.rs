use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

// This represents the number of decimal places that an amount can validly express.
// Pesos are usually whole numbers, but cents are tolerated.
const CURRENCY_PRECISION: u32 = 2;

// Length of the random suffix that keeps ids unique when two expenses are created in
// the same millisecond.
const ID_SUFFIX_LEN: usize = 6;

/// Description used when the user leaves the field blank
pub const DEFAULT_DESCRIPTION: &str = "Gasto Rápido";

/// The categories offered for new expenses. The set is open: records pulled from the
/// remote ledger may carry any category.
pub const CATEGORIES: [&str; 7] = [
    "Comida",
    "Transporte",
    "Servicios",
    "Ocio",
    "Arriendo",
    "Varios",
    "Deuda",
];

/// Opaque, unique identifier of an expense
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ExpenseId(String);

/// A single discretionary expense.
///
/// On the wire the period label is called `quincena`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    #[serde(serialize_with = "serialize_amount", deserialize_with = "deserialize_amount")]
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "quincena")]
    pub period: String,
    pub date: DateTime<Utc>,
}

/// A write sent to the remote ledger. The remote has no batch contract, so every
/// directive concerns a single record (or asks the remote to do the work itself).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum Directive {
    #[serde(rename = "add")]
    Add(Expense),
    #[serde(rename = "delete")]
    Delete { id: ExpenseId },
    #[serde(rename = "importar_fijos")]
    ImportFixed {
        month: String,
        year: i32,
        quincena: String,
        #[serde(rename = "fullQuincenaName")]
        full_quincena_name: String,
    },
}

/// A recurring expense that can be loaded into any period in one go
#[derive(Debug, Clone, PartialEq)]
pub struct FixedExpense {
    pub description: String,
    pub category: String,
    pub amount: Decimal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("an amount is required")]
    EmptyAmount,
    #[error("'{0}' is not a number")]
    InvalidAmount(String),
    #[error("amounts cannot be negative")]
    NegativeAmount,
    #[error("amounts cannot have more than 2 decimal places")]
    Precision,
}

impl ExpenseId {
    /// Create an id from the creation time plus a random suffix. The timestamp keeps
    /// ids roughly sortable; the suffix prevents collisions under rapid entry.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(char::from)
            .collect();

        ExpenseId(format!("{}-{}", now.timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExpenseId {
    fn from(s: &str) -> Self {
        ExpenseId(s.to_owned())
    }
}

impl From<String> for ExpenseId {
    fn from(s: String) -> Self {
        ExpenseId(s)
    }
}

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

// The spreadsheet happily turns numeric-looking ids into numbers, so accept both.
impl<'de> Deserialize<'de> for ExpenseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Int(i64),
            Float(f64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => ExpenseId(s),
            RawId::Int(i) => ExpenseId(i.to_string()),
            RawId::Float(f) if f.fract() == 0.0 => ExpenseId(format!("{:.0}", f)),
            RawId::Float(f) => ExpenseId(f.to_string()),
        })
    }
}

impl Expense {
    /// Create a new expense with a freshly generated id
    pub fn new<S: Into<String>>(
        amount: Decimal,
        description: S,
        category: S,
        period: S,
        date: DateTime<Utc>,
    ) -> Self {
        Expense {
            id: ExpenseId::generate(date),
            amount,
            description: description.into(),
            category: category.into(),
            period: period.into(),
            date,
        }
    }
}

impl FixedExpense {
    pub fn new<S: Into<String>>(description: S, category: S, amount: Decimal) -> Self {
        FixedExpense {
            description: description.into(),
            category: category.into(),
            amount,
        }
    }

    /// Materialise this template as an expense in `period`
    pub fn to_expense(&self, period: &str, date: DateTime<Utc>) -> Expense {
        Expense::new(
            self.amount,
            self.description.as_str(),
            self.category.as_str(),
            period,
            date,
        )
    }
}

/// The fixed expenses loaded by "import defaults"
pub fn default_templates() -> Vec<FixedExpense> {
    vec![
        FixedExpense::new("Arriendo", "Arriendo", dec!(450000)),
        FixedExpense::new("Comida Mensual", "Comida", dec!(240000)),
        FixedExpense::new("Servicios", "Servicios", dec!(55000)),
        FixedExpense::new("Internet", "Servicios", dec!(27500)),
        FixedExpense::new("Pasajes", "Transporte", dec!(70000)),
    ]
}

/// Validate a user-entered amount. This is the only place amounts are checked; the
/// aggregation code assumes every amount in the ledger is valid.
pub fn parse_amount(input: &str) -> Result<Decimal, ValidationError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(ValidationError::EmptyAmount);
    }

    let amount =
        Decimal::from_str(input).map_err(|_| ValidationError::InvalidAmount(input.into()))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ValidationError::NegativeAmount);
    }

    if amount.normalize().scale() > CURRENCY_PRECISION {
        return Err(ValidationError::Precision);
    }

    Ok(amount)
}

// Whole amounts go out as integers so the sheet doesn't show "1000.0".
fn serialize_amount<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    if amount.fract().is_zero() {
        if let Some(i) = amount.to_i64() {
            return serializer.serialize_i64(i);
        }
    }

    match amount.to_f64() {
        Some(f) => serializer.serialize_f64(f),
        None => Err(serde::ser::Error::custom(format!(
            "amount {} is out of range",
            amount
        ))),
    }
}

// Accepts a JSON number or a numeric string. A blank cell counts as zero.
fn deserialize_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match RawAmount::deserialize(deserializer)? {
        RawAmount::Int(i) => Ok(Decimal::from(i)),
        RawAmount::Float(f) => Decimal::from_f64(f)
            .ok_or_else(|| serde::de::Error::custom(format!("amount {} is out of range", f))),
        RawAmount::Text(s) if s.trim().is_empty() => Ok(Decimal::ZERO),
        RawAmount::Text(s) => Decimal::from_str(s.trim())
            .map_err(|_| serde::de::Error::custom(format!("'{}' is not a number", s))),
    }
}
