//! Mapping from inferred schemas to relational column types

use crate::infer::builder::{FieldSchema, Schema, ValueType};
use std::collections::{BTreeMap, BTreeSet};

/// Relational column types the normalizer can create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Numeric,
    Boolean,
    Jsonb,
    TextArray,
    NumericArray,
    BooleanArray,
    JsonbArray,
}

impl ColumnType {
    /// Declared SQL type for this column
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Jsonb => "JSONB",
            ColumnType::TextArray => "TEXT[]",
            ColumnType::NumericArray => "NUMERIC[]",
            ColumnType::BooleanArray => "BOOLEAN[]",
            ColumnType::JsonbArray => "JSONB[]",
        }
    }

    /// Parses a declared SQL type back into a column type
    pub fn from_sql_type(sql_type: &str) -> Option<ColumnType> {
        match sql_type {
            "TEXT" => Some(ColumnType::Text),
            "NUMERIC" => Some(ColumnType::Numeric),
            "BOOLEAN" => Some(ColumnType::Boolean),
            "JSONB" => Some(ColumnType::Jsonb),
            "TEXT[]" => Some(ColumnType::TextArray),
            "NUMERIC[]" => Some(ColumnType::NumericArray),
            "BOOLEAN[]" => Some(ColumnType::BooleanArray),
            "JSONB[]" => Some(ColumnType::JsonbArray),
            _ => None,
        }
    }
}

/// Maps an inferred schema to a column set
///
/// string → text, integer/number → numeric, boolean → boolean, object →
/// jsonb, array of scalar T → array-of-T, array of mixed/object → jsonb
/// array, array with no observed elements → text array. Unresolvable
/// unions fall back to text with a warning.
pub fn to_column_types(schema: &Schema) -> BTreeMap<String, ColumnType> {
    let mut columns = BTreeMap::new();
    for (name, field) in schema.properties() {
        columns.insert(name.clone(), field_column(name, field));
    }
    columns
}

enum Resolved {
    One(ValueType),
    Mixed,
    Empty,
}

/// Collapses a type union; integer and number share a relational type
fn resolve(types: &BTreeSet<ValueType>) -> Resolved {
    if types.len() == 2
        && types.contains(&ValueType::Integer)
        && types.contains(&ValueType::Number)
    {
        return Resolved::One(ValueType::Number);
    }
    let mut iter = types.iter();
    match (iter.next(), iter.next()) {
        (None, _) => Resolved::Empty,
        (Some(t), None) => Resolved::One(*t),
        _ => Resolved::Mixed,
    }
}

fn field_column(name: &str, field: &FieldSchema) -> ColumnType {
    match resolve(field.types()) {
        Resolved::One(ValueType::Null) => ColumnType::Text,
        Resolved::One(ValueType::Boolean) => ColumnType::Boolean,
        Resolved::One(ValueType::Integer) | Resolved::One(ValueType::Number) => ColumnType::Numeric,
        Resolved::One(ValueType::String) => ColumnType::Text,
        Resolved::One(ValueType::Object) => ColumnType::Jsonb,
        Resolved::One(ValueType::Array) => array_column(field),
        Resolved::Mixed => {
            tracing::warn!("Field '{}' has mixed types {:?}, using text", name, field.types());
            ColumnType::Text
        }
        Resolved::Empty => ColumnType::Text,
    }
}

fn array_column(field: &FieldSchema) -> ColumnType {
    let Some(items) = field.item_schema() else {
        // No elements ever observed
        return ColumnType::TextArray;
    };
    match resolve(items.types()) {
        Resolved::One(ValueType::String) => ColumnType::TextArray,
        Resolved::One(ValueType::Integer) | Resolved::One(ValueType::Number) => {
            ColumnType::NumericArray
        }
        Resolved::One(ValueType::Boolean) => ColumnType::BooleanArray,
        Resolved::One(ValueType::Object) | Resolved::One(ValueType::Array) => ColumnType::JsonbArray,
        Resolved::One(ValueType::Null) | Resolved::Empty => ColumnType::TextArray,
        Resolved::Mixed => ColumnType::JsonbArray,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::builder::infer;
    use serde_json::json;

    #[test]
    fn test_column_mapping_for_representative_row() {
        let schema = infer(
            &[json!({
                "name": "ben",
                "age": 100,
                "is_human": true,
                "height": 1.8,
                "address": {"street": "123 Main St", "city": "New York"},
                "friends": ["joe", "jane", "jim"],
                "pets": [{"name": "fido"}, {"name": "fluffy"}],
                "other": [{"key": "a"}, 4, "b", true, 1.2],
                "friend_ids": [1, 2, 3],
            })],
            None,
        );

        let columns = to_column_types(&schema);
        assert_eq!(columns["name"], ColumnType::Text);
        assert_eq!(columns["age"], ColumnType::Numeric);
        assert_eq!(columns["is_human"], ColumnType::Boolean);
        assert_eq!(columns["height"], ColumnType::Numeric);
        assert_eq!(columns["address"], ColumnType::Jsonb);
        assert_eq!(columns["friends"], ColumnType::TextArray);
        assert_eq!(columns["pets"], ColumnType::JsonbArray);
        assert_eq!(columns["other"], ColumnType::JsonbArray);
        assert_eq!(columns["friend_ids"], ColumnType::NumericArray);
    }

    #[test]
    fn test_nullable_field_uses_observed_type() {
        let schema = infer(
            &[
                json!({"id": 1, "name": "ben", "age": 100}),
                json!({"id": 2, "name": null}),
            ],
            None,
        );

        let columns = to_column_types(&schema);
        assert_eq!(columns["id"], ColumnType::Numeric);
        assert_eq!(columns["name"], ColumnType::Text);
        assert_eq!(columns["age"], ColumnType::Numeric);
    }

    #[test]
    fn test_all_null_field_is_text() {
        let schema = infer(&[json!({"zero": null})], None);
        assert_eq!(to_column_types(&schema)["zero"], ColumnType::Text);
    }

    #[test]
    fn test_empty_array_defaults_to_text_array() {
        let schema = infer(&[json!({"tags": []})], None);
        assert_eq!(to_column_types(&schema)["tags"], ColumnType::TextArray);
    }

    #[test]
    fn test_mixed_scalar_union_is_text() {
        let schema = infer(&[json!({"v": 1}), json!({"v": "x"})], None);
        assert_eq!(to_column_types(&schema)["v"], ColumnType::Text);
    }

    #[test]
    fn test_int_and_float_union_is_numeric() {
        let schema = infer(&[json!({"v": 1}), json!({"v": 1.5})], None);
        assert_eq!(to_column_types(&schema)["v"], ColumnType::Numeric);
    }

    #[test]
    fn test_sql_type_names() {
        assert_eq!(ColumnType::Text.sql_type(), "TEXT");
        assert_eq!(ColumnType::Numeric.sql_type(), "NUMERIC");
        assert_eq!(ColumnType::JsonbArray.sql_type(), "JSONB[]");
    }
}
