//! Declarative record rules: matching, alteration, and priority scheduling.
//!
//! This crate implements the fly rule engine: value conversion, field
//! conditions, alter operators, rule decoding, the [`Pipe`] scheduler, and the
//! built-in lint rules.

pub mod alter;
pub mod condition;
pub mod convert;
pub mod pipe;
pub mod record;
pub mod rule;
pub mod validation;

pub use alter::{alter, AlterGroup, AlterOperator, AlterSection, AlterSpec, Disposition, DropTarget};
pub use condition::{
    check_key, check_match, compile_pattern, matches_at_start, parse_conditions, Condition,
    FieldMatch, MatchOperator, Mode,
};
pub use convert::{convert, parse_timestamp, ValueType};
pub use pipe::{apply, Pipe};
pub use record::{AttributeAccessor, Attributes, MapRecord, MappingAccessor, RecordAccessor};
pub use rule::{parse_rules, Rule};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
