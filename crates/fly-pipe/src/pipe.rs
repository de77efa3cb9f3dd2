//! Rule scheduler: runs a rule set over a record in priority order.
//!
//! A [`Pipe`] sorts its rules once at construction. Every [`Pipe::process`]
//! call walks that sorted slice with its own iterator, so one pipe can be
//! shared by reference across threads and reused for any number of records.

use fly_types::Result;

use crate::alter::{alter, Disposition};
use crate::condition::check_match;
use crate::record::RecordAccessor;
use crate::rule::{parse_rules, Rule};

// ---------------------------------------------------------------------------
// Single rule
// ---------------------------------------------------------------------------

/// Apply one rule to `record`.
///
/// Returns `Ok(None)` when the rule deleted the record. A rule without a
/// match section always applies; a rule that does not match returns the
/// record untouched.
pub fn apply<A: RecordAccessor>(
    accessor: &A,
    mut record: A::Record,
    rule: &Rule,
) -> Result<Option<A::Record>> {
    if let Some(ref fields) = rule.matcher {
        if !check_match(accessor, &record, fields, rule.mode)? {
            tracing::debug!(priority = rule.priority, "Rule did not match");
            return Ok(Some(record));
        }
    }

    let Some(ref section) = rule.alter else {
        tracing::debug!(priority = rule.priority, "Rule matched, nothing to alter");
        return Ok(Some(record));
    };

    match alter(accessor, &mut record, section)? {
        Disposition::Retained => {
            tracing::debug!(priority = rule.priority, "Rule matched, record altered");
            Ok(Some(record))
        }
        Disposition::Deleted => {
            tracing::debug!(priority = rule.priority, "Rule matched, record dropped");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Pipe
// ---------------------------------------------------------------------------

/// An immutable rule set ordered by ascending priority.
#[derive(Debug, Clone, Default)]
pub struct Pipe {
    rules: Vec<Rule>,
}

impl Pipe {
    /// Build a pipe, sorting `rules` by ascending priority. Rules sharing a
    /// priority keep their relative order.
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(|rule| rule.priority);
        Self { rules }
    }

    /// Decode a rule set from JSON text (a list of rules or a single rule).
    pub fn from_json(source: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(source)?;
        Self::from_value(&json)
    }

    pub fn from_value(json: &serde_json::Value) -> Result<Self> {
        Ok(Self::new(parse_rules(json)?))
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule over `record` in priority order.
    ///
    /// Stops at the first rule that deletes the record (or leaves it empty)
    /// and returns `Ok(None)`; later rules are never evaluated. Errors
    /// propagate immediately.
    pub fn process<A: RecordAccessor>(
        &self,
        accessor: &A,
        record: A::Record,
    ) -> Result<Option<A::Record>> {
        let mut record = record;
        for (index, rule) in self.rules.iter().enumerate() {
            match apply(accessor, record, rule)? {
                Some(next) if !accessor.is_empty(&next) => record = next,
                _ => {
                    tracing::debug!(
                        index,
                        priority = rule.priority,
                        skipped = self.rules.len() - index - 1,
                        "Record deleted, remaining rules skipped"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(record))
    }
}

impl From<Vec<Rule>> for Pipe {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}
