//! Rule configuration decoding.
//!
//! ```text
//! Rule ::= { priority?: int, mode?: "and"|"or", match?: { <field>: FieldMatch, ... }, alter?: AlterSection }
//! ```
//! Rules are decoded once from JSON into immutable values. Operator names are
//! checked here, so an unknown operator fails when the rule is loaded rather
//! than when a record first reaches it.

use std::str::FromStr;

use fly_types::{FlyError, Result};

use crate::alter::AlterSection;
use crate::condition::{FieldMatch, Mode};

/// One declarative unit of `{priority, mode, match, alter}`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rule {
    pub priority: i64,
    /// How per-field match results combine.
    pub mode: Mode,
    /// `None` when the rule has no (or an empty) match section and so always applies.
    pub matcher: Option<Vec<FieldMatch>>,
    pub alter: Option<AlterSection>,
}

impl Rule {
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let obj = expect_object(json, "rule")?;

        let priority = match obj.get("priority") {
            None | Some(serde_json::Value::Null) => 0,
            Some(raw) => raw.as_i64().ok_or_else(|| {
                FlyError::InvalidRule(format!("priority must be an integer, got {raw}"))
            })?,
        };

        let matcher = match obj.get("match") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => {
                let fields = expect_object(raw, "match section")?
                    .iter()
                    .map(|(field, entry)| FieldMatch::from_json(field, entry))
                    .collect::<Result<Vec<_>>>()?;
                (!fields.is_empty()).then_some(fields)
            }
        };

        let alter = match obj.get("alter") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(AlterSection::from_json(raw)?),
        };

        Ok(Self {
            priority,
            mode: optional_mode(obj, "rule")?,
            matcher,
            alter,
        })
    }
}

impl FromStr for Rule {
    type Err = FlyError;

    fn from_str(s: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(s)?;
        Rule::from_json(&json)
    }
}

/// Decode a rule set: either a list of rules or a single rule object.
pub fn parse_rules(json: &serde_json::Value) -> Result<Vec<Rule>> {
    match json {
        serde_json::Value::Array(items) => items.iter().map(Rule::from_json).collect(),
        single => Ok(vec![Rule::from_json(single)?]),
    }
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

pub(crate) fn expect_object<'a>(
    json: &'a serde_json::Value,
    what: &str,
) -> Result<&'a serde_json::Map<String, serde_json::Value>> {
    json.as_object()
        .ok_or_else(|| FlyError::InvalidRule(format!("{what} must be an object, got {json}")))
}

/// Read an optional string key; `null` counts as absent.
pub(crate) fn optional_string(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    what: &str,
) -> Result<Option<String>> {
    match obj.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(FlyError::InvalidRule(format!(
            "'{key}' of {what} must be a string, got {other}"
        ))),
    }
}

pub(crate) fn optional_mode(
    obj: &serde_json::Map<String, serde_json::Value>,
    what: &str,
) -> Result<Mode> {
    optional_string(obj, "mode", what)?
        .map(|m| m.parse::<Mode>())
        .transpose()
        .map(Option::unwrap_or_default)
}
