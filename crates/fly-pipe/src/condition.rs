//! Field conditions: decoding and evaluation.
//!
//! A match section maps field names to a [`FieldMatch`]:
//! ```text
//! FieldMatch  ::= { mode?: "and"|"or", conditions: [Condition, ...], type?: str, format?: str }
//! Condition   ::= [ Operator, Literal ]
//! Operator    ::= exact | iexact | regex | startswith | istartswith | endswith
//!               | iendswith | contains | icontains | ne | gt | lt | gte | lte
//! ```
//! Both the field value and every literal are converted with the field's
//! type and format before comparison. A `regex` condition holds when its
//! pattern matches a prefix of the field text.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use fly_types::{FlyError, Result, Value};
use regex::Regex;

use crate::convert::{convert, ValueType};
use crate::record::RecordAccessor;
use crate::rule::{expect_object, optional_mode, optional_string};

/// How a list of boolean results is folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    And,
    Or,
}

impl Mode {
    /// Fold results: `And` needs all (vacuously true when empty), `Or` needs
    /// any (vacuously false when empty).
    pub fn fold(self, results: &[bool]) -> bool {
        match self {
            Mode::And => results.iter().all(|r| *r),
            Mode::Or => results.iter().any(|r| *r),
        }
    }
}

impl FromStr for Mode {
    type Err = FlyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "and" => Ok(Mode::And),
            "or" => Ok(Mode::Or),
            other => Err(FlyError::InvalidRule(format!(
                "mode must be 'and' or 'or', got '{other}'"
            ))),
        }
    }
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOperator {
    Exact,
    IExact,
    Regex,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Contains,
    IContains,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl MatchOperator {
    pub fn name(self) -> &'static str {
        match self {
            MatchOperator::Exact => "exact",
            MatchOperator::IExact => "iexact",
            MatchOperator::Regex => "regex",
            MatchOperator::StartsWith => "startswith",
            MatchOperator::IStartsWith => "istartswith",
            MatchOperator::EndsWith => "endswith",
            MatchOperator::IEndsWith => "iendswith",
            MatchOperator::Contains => "contains",
            MatchOperator::IContains => "icontains",
            MatchOperator::Ne => "ne",
            MatchOperator::Gt => "gt",
            MatchOperator::Lt => "lt",
            MatchOperator::Gte => "gte",
            MatchOperator::Lte => "lte",
        }
    }

    /// Compare a converted field value against a converted literal.
    ///
    /// Text operators never match non-text operands, and ordering operators
    /// never match values that have no mutual order (e.g. text against a
    /// number, or a missing field).
    pub fn evaluate(self, field: &Value, expected: &Value) -> Result<bool> {
        let ordering = || field.partial_cmp(expected);
        let matched = match self {
            MatchOperator::Exact => field == expected,
            MatchOperator::Ne => field != expected,
            MatchOperator::Gt => ordering() == Some(Ordering::Greater),
            MatchOperator::Lt => ordering() == Some(Ordering::Less),
            MatchOperator::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            MatchOperator::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            MatchOperator::Regex => match (field.as_str(), expected.as_str()) {
                (Some(text), Some(pattern)) => matches_at_start(&compile_pattern(pattern)?, text),
                _ => false,
            },
            text_operator => match (field.as_str(), expected.as_str()) {
                (Some(text), Some(needle)) => text_operator.compare_text(text, needle),
                _ => false,
            },
        };
        Ok(matched)
    }

    fn compare_text(self, text: &str, needle: &str) -> bool {
        match self {
            MatchOperator::IExact
            | MatchOperator::IStartsWith
            | MatchOperator::IEndsWith
            | MatchOperator::IContains => {
                let (text, needle) = (text.to_lowercase(), needle.to_lowercase());
                match self {
                    MatchOperator::IExact => text == needle,
                    MatchOperator::IStartsWith => text.starts_with(&needle),
                    MatchOperator::IEndsWith => text.ends_with(&needle),
                    _ => text.contains(&needle),
                }
            }
            MatchOperator::StartsWith => text.starts_with(needle),
            MatchOperator::EndsWith => text.ends_with(needle),
            MatchOperator::Contains => text.contains(needle),
            _ => false,
        }
    }
}

impl FromStr for MatchOperator {
    type Err = FlyError;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s {
            "exact" => MatchOperator::Exact,
            "iexact" => MatchOperator::IExact,
            "regex" => MatchOperator::Regex,
            "startswith" => MatchOperator::StartsWith,
            "istartswith" => MatchOperator::IStartsWith,
            "endswith" => MatchOperator::EndsWith,
            "iendswith" => MatchOperator::IEndsWith,
            "contains" => MatchOperator::Contains,
            "icontains" => MatchOperator::IContains,
            "ne" => MatchOperator::Ne,
            "gt" => MatchOperator::Gt,
            "lt" => MatchOperator::Lt,
            "gte" => MatchOperator::Gte,
            "lte" => MatchOperator::Lte,
            other => {
                return Err(FlyError::UnsupportedOperator {
                    operator: other.to_string(),
                })
            }
        };
        Ok(op)
    }
}

impl fmt::Display for MatchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compile a condition pattern. Use [`matches_at_start`] to apply it.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| FlyError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// True when `re` matches a prefix of `text`.
///
/// The leftmost match starts at 0 whenever any match does.
pub fn matches_at_start(re: &Regex, text: &str) -> bool {
    re.find(text).is_some_and(|m| m.start() == 0)
}

/// A single `(operator, literal)` pair.
#[derive(Debug, Clone)]
pub struct Condition {
    pub operator: MatchOperator,
    pub value: Value,
    /// Compiled form of a textual `regex` literal.
    pattern: Option<Regex>,
}

impl Condition {
    /// Build a condition. A textual `regex` literal is compiled here; one
    /// that fails to compile is left for evaluation to report.
    pub fn new(operator: MatchOperator, value: impl Into<Value>) -> Self {
        let value = value.into();
        let pattern = match (operator, value.as_str()) {
            (MatchOperator::Regex, Some(pattern)) => compile_pattern(pattern).ok(),
            _ => None,
        };
        Self {
            operator,
            value,
            pattern,
        }
    }

    /// Evaluate against a converted field value and converted literal.
    ///
    /// The precompiled pattern serves only while the converted literal is
    /// still the text it was built from.
    pub fn evaluate(&self, field: &Value, expected: &Value) -> Result<bool> {
        match (&self.pattern, field.as_str(), expected.as_str()) {
            (Some(re), Some(text), Some(pattern)) if Some(pattern) == self.value.as_str() => {
                Ok(matches_at_start(re, text))
            }
            _ => self.operator.evaluate(field, expected),
        }
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.operator == other.operator && self.value == other.value
    }
}

/// Conditions on one field plus how they combine and convert.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub field: String,
    pub mode: Mode,
    pub conditions: Vec<Condition>,
    pub value_type: Option<ValueType>,
    pub format: Option<String>,
}

impl FieldMatch {
    /// Decode the match entry for `field`. A missing `conditions` key means
    /// an empty list.
    pub fn from_json(field: &str, json: &serde_json::Value) -> Result<Self> {
        let what = format!("match entry for '{field}'");
        let obj = expect_object(json, &what)?;
        let conditions = match obj.get("conditions") {
            None => Vec::new(),
            Some(raw) => parse_conditions(raw)?,
        };
        Ok(Self {
            field: field.to_string(),
            mode: optional_mode(obj, &what)?,
            conditions,
            value_type: optional_string(obj, "type", &what)?.map(|t| ValueType::parse(&t)),
            format: optional_string(obj, "format", &what)?,
        })
    }
}

/// Decode a `[[operator, literal], ...]` list.
pub fn parse_conditions(raw: &serde_json::Value) -> Result<Vec<Condition>> {
    let items = raw.as_array().ok_or_else(|| {
        FlyError::InvalidConditions(format!("conditions must be a list, got {raw}"))
    })?;

    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([serde_json::Value::String(op), literal]) => {
                Ok(Condition::new(op.parse()?, Value::from(literal)))
            }
            _ => Err(FlyError::InvalidConditions(format!(
                "condition must be an [operator, value] pair, got {item}"
            ))),
        })
        .collect()
}

/// Evaluate conditions against one field value.
///
/// The field value is converted once; each literal is converted with the same
/// type and format before its operator runs. Every condition is evaluated
/// before the results are folded by `mode`.
pub fn check_key(
    field_value: &Value,
    conditions: &[Condition],
    mode: Mode,
    value_type: Option<&ValueType>,
    format: Option<&str>,
) -> Result<bool> {
    let field_value = convert(field_value, value_type, format)?;

    let mut results = Vec::with_capacity(conditions.len());
    for condition in conditions {
        let expected = convert(&condition.value, value_type, format)?;
        results.push(condition.evaluate(&field_value, &expected)?);
    }
    Ok(mode.fold(&results))
}

/// Evaluate a whole match section against a record.
///
/// Absent fields read as `Value::Null`. Every field is evaluated before the
/// per-field results are folded by `mode`.
pub fn check_match<A: RecordAccessor>(
    accessor: &A,
    record: &A::Record,
    fields: &[FieldMatch],
    mode: Mode,
) -> Result<bool> {
    let mut results = Vec::with_capacity(fields.len());
    for field_match in fields {
        let value = accessor.get(record, &field_match.field);
        results.push(check_key(
            &value,
            &field_match.conditions,
            field_match.mode,
            field_match.value_type.as_ref(),
            field_match.format.as_deref(),
        )?);
    }
    Ok(mode.fold(&results))
}
