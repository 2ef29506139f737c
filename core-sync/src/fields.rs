//! Field projection
//!
//! Builds the body sent to the server from a local record and a field list.
//! Dotted names walk nested objects (`Owner.Name`).

use bridge_traits::store::Record;
use serde_json::{Map, Value};

/// Value of a (possibly dotted) field path
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    /// Some segment of the path does not exist
    Absent,
    /// The path exists and holds JSON `null`
    Null,
    Value(&'a Value),
}

/// Look up `path`, splitting on `.`.
pub fn field_value<'a>(record: &'a Record, path: &str) -> FieldValue<'a> {
    let mut segments = path.split('.');
    let first = match segments.next() {
        Some(first) => first,
        None => return FieldValue::Absent,
    };

    let mut current = match record.get(first) {
        Some(value) => value,
        None => return FieldValue::Absent,
    };
    for segment in segments {
        current = match current.as_object().and_then(|obj| obj.get(segment)) {
            Some(value) => value,
            None => return FieldValue::Absent,
        };
    }

    if current.is_null() {
        FieldValue::Null
    } else {
        FieldValue::Value(current)
    }
}

/// Project `fieldlist` out of `record`, skipping the id and modification-date
/// fields.
///
/// Absent fields are left out; explicit nulls are kept so the server clears
/// the value.
pub fn project_fields(
    record: &Record,
    fieldlist: &[String],
    id_field: &str,
    modification_date_field: &str,
) -> Map<String, Value> {
    let mut fields = Map::new();
    for name in fieldlist {
        if name == id_field || name == modification_date_field {
            continue;
        }
        match field_value(record, name) {
            FieldValue::Absent => {}
            FieldValue::Null => {
                fields.insert(name.clone(), Value::Null);
            }
            FieldValue::Value(value) => {
                fields.insert(name.clone(), value.clone());
            }
        }
    }
    fields
}
