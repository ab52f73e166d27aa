//! Request shape validation
//!
//! Each event declares the fields it requires and their JSON kind. Fields are
//! checked in declaration order and the first mismatch is reported.

use crate::error::{Error, Result};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Kind::String, Value::String(_))
                | (Kind::Number, Value::Number(_))
                | (Kind::Boolean, Value::Bool(_))
                | (Kind::Object, Value::Object(_))
                | (Kind::Array, Value::Array(_))
        )
    }
}

/// Required fields of one event: `(name, kind)` pairs.
pub type Shape = &'static [(&'static str, Kind)];

pub fn validate(data: &Value, shape: Shape) -> Result<()> {
    for (field, kind) in shape {
        let ok = data.get(field).is_some_and(|value| kind.matches(value));
        if !ok {
            return Err(Error::TypeNotMatch((*field).to_string()));
        }
    }
    Ok(())
}

/// Optional string field; present but non-string counts as a mismatch.
pub fn optional_str<'a>(data: &'a Value, field: &str) -> Result<Option<&'a str>> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(Error::TypeNotMatch(field.to_string())),
    }
}

/// Read a field already checked by [`validate`].
pub fn str_field<'a>(data: &'a Value, field: &str) -> Result<&'a str> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::TypeNotMatch(field.to_string()))
}
