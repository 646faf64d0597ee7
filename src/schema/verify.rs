//! Structural verification of outgoing JSON against a message descriptor.
//!
//! Runs before a value is turned into a dynamic message so callers get the
//! offending field path instead of a generic deserialization failure.
//! Unknown keys are ignored.

use prost_reflect::{Cardinality, FieldDescriptor, Kind, MessageDescriptor};
use serde_json::Value;

use crate::error::{RegistryError, Result};

/// Check `value` against `descriptor`, reporting the first violation
pub fn verify_message(descriptor: &MessageDescriptor, value: &Value) -> Result<()> {
    Verifier {
        root: descriptor.full_name(),
    }
    .message(descriptor, value, "")
}

struct Verifier<'a> {
    root: &'a str,
}

impl Verifier<'_> {
    fn fail(&self, path: &str, reason: impl Into<String>) -> RegistryError {
        let path = if path.is_empty() { "<root>" } else { path };
        RegistryError::verification(self.root, path, reason)
    }

    fn message(&self, descriptor: &MessageDescriptor, value: &Value, path: &str) -> Result<()> {
        let object = value
            .as_object()
            .ok_or_else(|| self.fail(path, "object expected"))?;

        for field in descriptor.fields() {
            let field_path = join(path, field.name());
            let present = object
                .get(field.name())
                .or_else(|| object.get(field.json_name()))
                .filter(|v| !v.is_null());

            match present {
                Some(v) => self.field(&field, v, &field_path)?,
                None if field.cardinality() == Cardinality::Required => {
                    return Err(self.fail(&field_path, "missing required field"));
                }
                None => {}
            }
        }

        for oneof in descriptor.oneofs() {
            let set = oneof
                .fields()
                .filter(|f| {
                    object
                        .get(f.name())
                        .or_else(|| object.get(f.json_name()))
                        .is_some_and(|v| !v.is_null())
                })
                .count();
            if set > 1 {
                return Err(self.fail(&join(path, oneof.name()), "multiple values"));
            }
        }

        Ok(())
    }

    fn field(&self, field: &FieldDescriptor, value: &Value, path: &str) -> Result<()> {
        if field.is_map() {
            let object = value
                .as_object()
                .ok_or_else(|| self.fail(path, "object expected"))?;
            let Kind::Message(entry) = field.kind() else {
                return Ok(());
            };
            let value_kind = entry.map_entry_value_field().kind();
            for (key, item) in object {
                self.scalar(&value_kind, item, &format!("{}[{}]", path, key))?;
            }
            return Ok(());
        }

        if field.is_list() {
            let items = value
                .as_array()
                .ok_or_else(|| self.fail(path, "array expected"))?;
            let kind = field.kind();
            for (i, item) in items.iter().enumerate() {
                self.scalar(&kind, item, &format!("{}[{}]", path, i))?;
            }
            return Ok(());
        }

        self.scalar(&field.kind(), value, path)
    }

    fn scalar(&self, kind: &Kind, value: &Value, path: &str) -> Result<()> {
        let ok = match kind {
            Kind::Double | Kind::Float => {
                value.is_number() || matches!(value.as_str(), Some("NaN" | "Infinity" | "-Infinity"))
            }
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
                return self.integer(value, path, i64::from(i32::MIN), i64::from(i32::MAX));
            }
            Kind::Uint32 | Kind::Fixed32 => {
                return self.integer(value, path, 0, i64::from(u32::MAX));
            }
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
                value.is_i64() || value.as_str().is_some_and(|s| s.parse::<i64>().is_ok())
            }
            Kind::Uint64 | Kind::Fixed64 => {
                value.is_u64() || value.as_str().is_some_and(|s| s.parse::<u64>().is_ok())
            }
            Kind::Bool => value.is_boolean(),
            Kind::String => value.is_string(),
            Kind::Bytes => value.is_string() || is_byte_array(value),
            Kind::Enum(descriptor) => match value {
                Value::String(name) => descriptor.get_value_by_name(name).is_some(),
                Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()).is_some(),
                _ => false,
            },
            Kind::Message(descriptor) => return self.message(descriptor, value, path),
        };

        if ok {
            Ok(())
        } else {
            Err(self.fail(path, expectation(kind)))
        }
    }

    fn integer(&self, value: &Value, path: &str, min: i64, max: i64) -> Result<()> {
        match value.as_i64() {
            Some(n) if (min..=max).contains(&n) => Ok(()),
            Some(_) => Err(self.fail(path, "integer out of range")),
            None => Err(self.fail(path, "integer expected")),
        }
    }
}

fn expectation(kind: &Kind) -> String {
    match kind {
        Kind::Double | Kind::Float => "number expected".to_string(),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 | Kind::Uint64 | Kind::Fixed64 => {
            "integer|Long expected".to_string()
        }
        Kind::Bool => "boolean expected".to_string(),
        Kind::String => "string expected".to_string(),
        Kind::Bytes => "buffer expected".to_string(),
        Kind::Enum(descriptor) => format!("enum value of {} expected", descriptor.full_name()),
        _ => "integer expected".to_string(),
    }
}

/// An array of integers that each fit in a byte
pub(crate) fn is_byte_array(value: &Value) -> bool {
    value.as_array().is_some_and(|items| {
        items
            .iter()
            .all(|item| item.as_u64().is_some_and(|b| b <= u64::from(u8::MAX)))
    })
}

fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}
