//! Field access on records.
//!
//! Rules never touch a record directly; they go through a [`RecordAccessor`].
//! Two accessors are provided: [`MappingAccessor`] for key/value maps and
//! [`AttributeAccessor`] for structured values implementing [`Attributes`].

use std::fmt;
use std::marker::PhantomData;

use fly_types::{Result, Value};
use indexmap::IndexMap;

/// A key/value record. Fields keep the order they were first written in.
pub type MapRecord = IndexMap<String, Value>;

/// Read, write, delete and test named fields on a record.
///
/// Reading an absent field yields `Value::Null`, the missing sentinel.
pub trait RecordAccessor {
    type Record;

    fn get(&self, record: &Self::Record, field: &str) -> Value;

    fn set(&self, record: &mut Self::Record, field: &str, value: Value) -> Result<()>;

    /// Remove a field. Absent fields are ignored.
    fn delete(&self, record: &mut Self::Record, field: &str);

    fn has(&self, record: &Self::Record, field: &str) -> bool;

    /// An empty record is falsy and ends processing like a deleted one.
    fn is_empty(&self, _record: &Self::Record) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Mapping records
// ---------------------------------------------------------------------------

/// Accessor for [`MapRecord`]s: fields are keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingAccessor;

impl RecordAccessor for MappingAccessor {
    type Record = MapRecord;

    fn get(&self, record: &MapRecord, field: &str) -> Value {
        record.get(field).cloned().unwrap_or(Value::Null)
    }

    fn set(&self, record: &mut MapRecord, field: &str, value: Value) -> Result<()> {
        record.insert(field.to_string(), value);
        Ok(())
    }

    fn delete(&self, record: &mut MapRecord, field: &str) {
        record.shift_remove(field);
    }

    fn has(&self, record: &MapRecord, field: &str) -> bool {
        record.contains_key(field)
    }

    fn is_empty(&self, record: &MapRecord) -> bool {
        record.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Attribute records
// ---------------------------------------------------------------------------

/// A structured value whose named attributes can be read and written.
///
/// An attribute that is currently unset reports `None`.
pub trait Attributes {
    fn attribute(&self, name: &str) -> Option<Value>;

    /// Write an attribute. Implementations reject names they do not carry
    /// and values of the wrong shape with `FlyError::Attribute`.
    fn set_attribute(&mut self, name: &str, value: Value) -> Result<()>;

    /// Unset an attribute. Unknown or already unset names are ignored.
    fn remove_attribute(&mut self, name: &str);

    fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}

/// Accessor for any `T: Attributes`: fields are attributes.
pub struct AttributeAccessor<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> AttributeAccessor<T> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> Default for AttributeAccessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AttributeAccessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeAccessor<T> {}

impl<T> fmt::Debug for AttributeAccessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AttributeAccessor")
    }
}

impl<T: Attributes> RecordAccessor for AttributeAccessor<T> {
    type Record = T;

    fn get(&self, record: &T, field: &str) -> Value {
        record.attribute(field).unwrap_or(Value::Null)
    }

    fn set(&self, record: &mut T, field: &str, value: Value) -> Result<()> {
        record.set_attribute(field, value)
    }

    fn delete(&self, record: &mut T, field: &str) {
        record.remove_attribute(field);
    }

    fn has(&self, record: &T, field: &str) -> bool {
        record.has_attribute(field)
    }
}
