//! Record alteration: field drops and per-field operators.
//!
//! ```text
//! AlterSection ::= { drop?: "ALL" | [field, ...], <operator>: { <field>: AlterSpec, ... }, ... }
//! AlterSpec    ::= { value: any, type?: str, format?: str, replacement?: any }
//! ```
//! `drop` always runs first. A truthy non-list `drop` deletes the whole record
//! and no operator group runs.
//!
//! A missing current value is the identity of the operator: `incr` and `decr`
//! start from zero, `append` and `prepend` start from empty text (text
//! operand) or an empty list (anything else), and `replace` leaves the field
//! as it is. `mul` and `div` have no value to scale and reject a missing one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use fly_types::{FlyError, Result, Value};

use crate::convert::{convert, ValueType};
use crate::record::RecordAccessor;
use crate::rule::{expect_object, optional_string};

/// A field alteration operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterOperator {
    Set,
    Replace,
    Append,
    Prepend,
    Incr,
    Decr,
    Mul,
    /// True division: numbers always yield a float.
    Div,
    /// Set only when the record does not have the field yet.
    Default,
}

impl AlterOperator {
    pub fn name(self) -> &'static str {
        match self {
            AlterOperator::Set => "set",
            AlterOperator::Replace => "replace",
            AlterOperator::Append => "append",
            AlterOperator::Prepend => "prepend",
            AlterOperator::Incr => "incr",
            AlterOperator::Decr => "decr",
            AlterOperator::Mul => "mul",
            AlterOperator::Div => "div",
            AlterOperator::Default => "default",
        }
    }

    /// Compute the new field value from the current one and the converted
    /// operand.
    pub fn apply(self, current: Value, value: Value, spec: &AlterSpec) -> Result<Value> {
        match self {
            AlterOperator::Set | AlterOperator::Default => Ok(value),
            AlterOperator::Replace => {
                let replacement = spec.converted_option("replacement")?;
                replace(current, &value, replacement)
            }
            AlterOperator::Append => append(current, value),
            AlterOperator::Prepend => prepend(current, value),
            AlterOperator::Incr => add(current, value, self),
            AlterOperator::Decr => add(current, negate(value)?, self),
            AlterOperator::Mul => mul(current, value),
            AlterOperator::Div => div(current, value),
        }
    }

    fn incompatible(self, message: String) -> FlyError {
        FlyError::IncompatibleOperands {
            operator: self.name().to_string(),
            message,
        }
    }
}

impl FromStr for AlterOperator {
    type Err = FlyError;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s {
            "set" => AlterOperator::Set,
            "replace" => AlterOperator::Replace,
            "append" => AlterOperator::Append,
            "prepend" => AlterOperator::Prepend,
            "incr" => AlterOperator::Incr,
            "decr" => AlterOperator::Decr,
            "mul" => AlterOperator::Mul,
            "div" => AlterOperator::Div,
            "default" => AlterOperator::Default,
            other => {
                return Err(FlyError::UnknownOperator {
                    operator: other.to_string(),
                })
            }
        };
        Ok(op)
    }
}

impl fmt::Display for AlterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn replace(current: Value, target: &Value, replacement: Value) -> Result<Value> {
    match (current, target) {
        (Value::Str(text), Value::Str(needle)) => match replacement {
            Value::Str(with) => Ok(Value::Str(text.replace(needle.as_str(), &with))),
            other => Err(AlterOperator::Replace.incompatible(format!(
                "cannot substitute {} into text",
                other.kind()
            ))),
        },
        (Value::List(items), target) => Ok(Value::List(
            items
                .into_iter()
                .map(|item| if item == *target { replacement.clone() } else { item })
                .collect(),
        )),
        (current, _) => Ok(current),
    }
}

fn append(current: Value, value: Value) -> Result<Value> {
    match (current, value) {
        (Value::Str(mut text), Value::Str(tail)) => {
            text.push_str(&tail);
            Ok(Value::Str(text))
        }
        (Value::List(mut items), value) => {
            items.push(value);
            Ok(Value::List(items))
        }
        (Value::Null, Value::Str(text)) => Ok(Value::Str(text)),
        (Value::Null, value) => Ok(Value::List(vec![value])),
        (current, value) => Err(AlterOperator::Append.incompatible(format!(
            "cannot append {} to {}",
            value.kind(),
            current.kind()
        ))),
    }
}

fn prepend(current: Value, value: Value) -> Result<Value> {
    match (current, value) {
        (Value::Str(text), Value::Str(mut head)) => {
            head.push_str(&text);
            Ok(Value::Str(head))
        }
        (Value::List(mut items), value) => {
            items.insert(0, value);
            Ok(Value::List(items))
        }
        (Value::Null, Value::Str(text)) => Ok(Value::Str(text)),
        (Value::Null, value) => Ok(Value::List(vec![value])),
        (current, value) => Err(AlterOperator::Prepend.incompatible(format!(
            "cannot prepend {} to {}",
            value.kind(),
            current.kind()
        ))),
    }
}

fn negate(value: Value) -> Result<Value> {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| AlterOperator::Decr.incompatible("integer overflow".into())),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Duration(d) => Ok(Value::Duration(-d)),
        other => Err(AlterOperator::Decr.incompatible(format!(
            "cannot subtract {}",
            other.kind()
        ))),
    }
}

fn add(current: Value, value: Value, op: AlterOperator) -> Result<Value> {
    let overflow = || op.incompatible("result out of range".into());
    match (current, value) {
        (Value::Null, value @ (Value::Int(_) | Value::Float(_) | Value::Duration(_))) => Ok(value),
        (Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Duration(a), Value::Duration(b)) => {
            a.checked_add(&b).map(Value::Duration).ok_or_else(overflow)
        }
        (Value::DateTime(a), Value::Duration(b)) => {
            a.checked_add_signed(b).map(Value::DateTime).ok_or_else(overflow)
        }
        (Value::Date(a), Value::Duration(b)) => {
            a.checked_add_signed(b).map(Value::Date).ok_or_else(overflow)
        }
        (Value::Time(a), Value::Duration(b)) => Ok(Value::Time(a + b)),
        (current, value) => Err(op.incompatible(format!(
            "cannot add {} to {}",
            value.kind(),
            current.kind()
        ))),
    }
}

fn mul(current: Value, value: Value) -> Result<Value> {
    let op = AlterOperator::Mul;
    let overflow = || op.incompatible("result out of range".into());
    let scale_duration = |d: chrono::Duration, n: i64| {
        i32::try_from(n)
            .ok()
            .and_then(|n| d.checked_mul(n))
            .map(Value::Duration)
            .ok_or_else(overflow)
    };
    match (current, value) {
        (Value::Int(a), Value::Int(b)) => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 * b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a * b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
        (Value::Duration(d), Value::Int(n)) | (Value::Int(n), Value::Duration(d)) => {
            scale_duration(d, n)
        }
        (current, value) => Err(op.incompatible(format!(
            "cannot multiply {} by {}",
            current.kind(),
            value.kind()
        ))),
    }
}

fn div(current: Value, value: Value) -> Result<Value> {
    let op = AlterOperator::Div;
    let divisor = match value {
        Value::Int(0) => return Err(op.incompatible("division by zero".into())),
        Value::Float(f) if f == 0.0 => return Err(op.incompatible("division by zero".into())),
        value => value,
    };
    match (current, divisor) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Float(a as f64 / b as f64)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 / b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a / b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (Value::Duration(d), Value::Int(n)) => i32::try_from(n)
            .ok()
            .and_then(|n| d.checked_div(n))
            .map(Value::Duration)
            .ok_or_else(|| op.incompatible("result out of range".into())),
        (current, value) => Err(op.incompatible(format!(
            "cannot divide {} by {}",
            current.kind(),
            value.kind()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What a `drop` entry removes.
#[derive(Debug, Clone, PartialEq)]
pub enum DropTarget {
    /// The whole record.
    Record,
    /// Only the listed fields.
    Fields(Vec<String>),
}

/// Operand and options for one field under an operator group.
#[derive(Debug, Clone, PartialEq)]
pub struct AlterSpec {
    pub field: String,
    pub value: Value,
    pub value_type: Option<ValueType>,
    pub format: Option<String>,
    /// Operator-specific keys such as `replacement`.
    pub options: BTreeMap<String, Value>,
}

impl AlterSpec {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            value_type: None,
            format: None,
            options: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// The operand converted with this entry's type and format.
    pub fn converted_value(&self) -> Result<Value> {
        convert(&self.value, self.value_type.as_ref(), self.format.as_deref())
    }

    /// An option converted with this entry's type and format; absent options
    /// convert from null.
    pub fn converted_option(&self, key: &str) -> Result<Value> {
        let raw = self.options.get(key).cloned().unwrap_or_default();
        convert(&raw, self.value_type.as_ref(), self.format.as_deref())
    }

    pub fn from_json(field: &str, json: &serde_json::Value) -> Result<Self> {
        let what = format!("alter entry for '{field}'");
        let obj = expect_object(json, &what)?;
        let options = obj
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "value" | "type" | "format"))
            .map(|(key, value)| (key.clone(), Value::from(value)))
            .collect();
        Ok(Self {
            field: field.to_string(),
            value: obj.get("value").map(Value::from).unwrap_or_default(),
            value_type: optional_string(obj, "type", &what)?.map(|t| ValueType::parse(&t)),
            format: optional_string(obj, "format", &what)?,
            options,
        })
    }
}

/// One operator applied to a list of fields, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlterGroup {
    pub operator: AlterOperator,
    pub fields: Vec<AlterSpec>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlterSection {
    pub drop: Option<DropTarget>,
    pub groups: Vec<AlterGroup>,
}

impl AlterSection {
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let obj = expect_object(json, "alter section")?;
        let mut section = AlterSection::default();

        for (key, entry) in obj {
            if key == "drop" {
                section.drop = parse_drop(entry)?;
                continue;
            }
            let operator: AlterOperator = key.parse()?;
            let fields = expect_object(entry, &format!("alter group '{key}'"))?
                .iter()
                .map(|(field, spec)| AlterSpec::from_json(field, spec))
                .collect::<Result<Vec<_>>>()?;
            section.groups.push(AlterGroup { operator, fields });
        }
        Ok(section)
    }
}

fn parse_drop(entry: &serde_json::Value) -> Result<Option<DropTarget>> {
    if let Some(items) = entry.as_array() {
        let fields = items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    FlyError::InvalidRule(format!("drop list entries must be field names, got {item}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Some(DropTarget::Fields(fields)));
    }
    Ok(Value::from(entry).is_truthy().then_some(DropTarget::Record))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Whether the record survived an alteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retained,
    Deleted,
}

/// Apply an alter section to `record`.
///
/// Not transactional: if an operator fails, fields already written stay
/// written.
pub fn alter<A: RecordAccessor>(
    accessor: &A,
    record: &mut A::Record,
    section: &AlterSection,
) -> Result<Disposition> {
    match &section.drop {
        Some(DropTarget::Record) => return Ok(Disposition::Deleted),
        Some(DropTarget::Fields(fields)) => {
            for field in fields {
                accessor.delete(record, field);
            }
        }
        None => {}
    }

    for group in &section.groups {
        for spec in &group.fields {
            let present = accessor.has(record, &spec.field);
            match group.operator {
                AlterOperator::Default if present => continue,
                AlterOperator::Replace if !present => continue,
                _ => {}
            }
            let current = accessor.get(record, &spec.field);
            let value = spec.converted_value()?;
            let updated = group.operator.apply(current, value, spec)?;
            accessor.set(record, &spec.field, updated)?;
        }
    }
    Ok(Disposition::Retained)
}
