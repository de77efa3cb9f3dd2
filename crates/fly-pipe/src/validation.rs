//! Rule-set validation: lint rules and diagnostics.
//!
//! Decoding already rejects malformed rules and unknown operators. The lints
//! here catch rules that decode fine but will not do what their author meant.
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail
//! on any `Error`-severity issue.

use serde::Serialize;

use fly_types::{FlyError, Result, Value};

use crate::alter::{AlterOperator, AlterSpec, DropTarget};
use crate::condition::{compile_pattern, FieldMatch, MatchOperator};
use crate::convert::ValueType;
use crate::rule::Rule;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// Position of the offending rule in the slice passed to [`validate`].
    pub rule_index: Option<usize>,
    pub field: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn match_fields(rule: &Rule) -> impl Iterator<Item = &FieldMatch> {
    rule.matcher.iter().flatten()
}

fn alter_specs(rule: &Rule) -> impl Iterator<Item = (AlterOperator, &AlterSpec)> {
    rule.alter
        .iter()
        .flat_map(|section| &section.groups)
        .flat_map(|group| group.fields.iter().map(move |spec| (group.operator, spec)))
}

/// Every `(rule index, field, type, format)` a rule set converts with.
fn typed_fields(rules: &[Rule]) -> Vec<(usize, &str, &ValueType, Option<&str>)> {
    let mut out = Vec::new();
    for (index, rule) in rules.iter().enumerate() {
        for fm in match_fields(rule) {
            if let Some(ref vt) = fm.value_type {
                out.push((index, fm.field.as_str(), vt, fm.format.as_deref()));
            }
        }
        for (_, spec) in alter_specs(rule) {
            if let Some(ref vt) = spec.value_type {
                out.push((index, spec.field.as_str(), vt, spec.format.as_deref()));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct UnknownValueTypeRule;
impl LintRule for UnknownValueTypeRule {
    fn name(&self) -> &str { "unknown_value_type" }
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic> {
        typed_fields(rules)
            .into_iter()
            .filter_map(|(index, field, vt, _)| match vt {
                ValueType::Other(name) => Some(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!(
                        "Field '{field}' names unknown type '{name}'; values pass through unconverted"
                    ),
                    rule_index: Some(index),
                    field: Some(field.to_string()),
                    fix: Some(
                        "Use one of bool, int, float, str, datetime, date, time, timedelta, json"
                            .into(),
                    ),
                }),
                _ => None,
            })
            .collect()
    }
}

struct IgnoredFormatRule;
impl LintRule for IgnoredFormatRule {
    fn name(&self) -> &str { "ignored_format" }
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic> {
        typed_fields(rules)
            .into_iter()
            .filter(|(_, _, vt, format)| vt.is_primitive() && format.is_some())
            .map(|(index, field, vt, _)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Field '{field}' has a format that type '{vt}' ignores"),
                rule_index: Some(index),
                field: Some(field.to_string()),
                fix: Some("Remove the format or use a temporal type".into()),
            })
            .collect()
    }
}

struct RegexSyntaxRule;
impl LintRule for RegexSyntaxRule {
    fn name(&self) -> &str { "regex_syntax" }
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            // Typed literals are only known after conversion.
            let untyped = match_fields(rule)
                .filter(|fm| matches!(fm.value_type, None | Some(ValueType::Str)));
            for fm in untyped {
                for condition in &fm.conditions {
                    if condition.operator != MatchOperator::Regex {
                        continue;
                    }
                    let Value::Str(ref pattern) = condition.value else {
                        continue;
                    };
                    if let Err(e) = compile_pattern(pattern) {
                        diags.push(Diagnostic {
                            rule: self.name().into(),
                            severity: Severity::Error,
                            message: e.to_string(),
                            rule_index: Some(index),
                            field: Some(fm.field.clone()),
                            fix: Some("Fix the regular expression syntax".into()),
                        });
                    }
                }
            }
        }
        diags
    }
}

struct DropShadowsAlterRule;
impl LintRule for DropShadowsAlterRule {
    fn name(&self) -> &str { "drop_shadows_alter" }
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic> {
        rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| {
                let section = rule.alter.as_ref()?;
                let shadowed = section.drop == Some(DropTarget::Record) && !section.groups.is_empty();
                shadowed.then(|| Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!(
                        "Rule drops the whole record, so its {} operator group(s) never run",
                        section.groups.len()
                    ),
                    rule_index: Some(index),
                    field: None,
                    fix: Some("Remove the operator groups or drop only specific fields".into()),
                })
            })
            .collect()
    }
}

struct ReplaceWithoutReplacementRule;
impl LintRule for ReplaceWithoutReplacementRule {
    fn name(&self) -> &str { "replace_without_replacement" }
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            for (operator, spec) in alter_specs(rule) {
                if operator == AlterOperator::Replace && spec.option("replacement").is_none() {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "replace on '{}' has no replacement value",
                            spec.field
                        ),
                        rule_index: Some(index),
                        field: Some(spec.field.clone()),
                        fix: Some("Add a \"replacement\" key".into()),
                    });
                }
            }
        }
        diags
    }
}

struct EmptyRuleRule;
impl LintRule for EmptyRuleRule {
    fn name(&self) -> &str { "empty_rule" }
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic> {
        rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| {
                rule.matcher.is_none()
                    && rule
                        .alter
                        .as_ref()
                        .map_or(true, |s| s.drop.is_none() && s.groups.is_empty())
            })
            .map(|(index, rule)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Rule at priority {} neither matches nor alters", rule.priority),
                rule_index: Some(index),
                field: None,
                fix: Some("Add a match or alter section, or remove the rule".into()),
            })
            .collect()
    }
}

struct EmptyConditionsRule;
impl LintRule for EmptyConditionsRule {
    fn name(&self) -> &str { "empty_conditions" }
    fn apply(&self, rules: &[Rule]) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            for fm in match_fields(rule).filter(|fm| fm.conditions.is_empty()) {
                let outcome = if fm.mode.fold(&[]) { "always" } else { "never" };
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Info,
                    message: format!(
                        "Field '{}' has no conditions and {outcome} matches",
                        fm.field
                    ),
                    rule_index: Some(index),
                    field: Some(fm.field.clone()),
                    fix: None,
                });
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return every diagnostic.
pub fn validate(rules: &[Rule]) -> Vec<Diagnostic> {
    let lints: Vec<Box<dyn LintRule>> = vec![
        Box::new(UnknownValueTypeRule),
        Box::new(IgnoredFormatRule),
        Box::new(RegexSyntaxRule),
        Box::new(DropShadowsAlterRule),
        Box::new(ReplaceWithoutReplacementRule),
        Box::new(EmptyRuleRule),
        Box::new(EmptyConditionsRule),
    ];

    let mut diagnostics = Vec::new();
    for lint in &lints {
        diagnostics.extend(lint.apply(rules));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(rules: &[Rule]) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(rules);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(FlyError::Validation(errors.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
