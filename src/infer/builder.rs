//! Incremental JSON schema inference
//!
//! Builds a structural schema by merging per-row type observations, the
//! way the normalizer samples staged rows before creating a table. Schemas
//! merge with a prior, so inference can continue from an earlier batch.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// JSON value types distinguished by the inferencer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Array,
}

impl ValueType {
    fn of(value: &Value) -> ValueType {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    ValueType::Integer
                } else {
                    ValueType::Number
                }
            }
            Value::String(_) => ValueType::String,
            Value::Object(_) => ValueType::Object,
            Value::Array(_) => ValueType::Array,
        }
    }
}

/// Observed type information for one field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSchema {
    types: BTreeSet<ValueType>,
    items: Option<Box<FieldSchema>>,
}

impl FieldSchema {
    fn observe(&mut self, value: &Value) {
        self.types.insert(ValueType::of(value));
        if let Value::Array(elements) = value {
            for element in elements {
                self.items
                    .get_or_insert_with(Default::default)
                    .observe(element);
            }
        }
    }

    /// Null-typed members are pruned from unions: `[string, null]`
    /// normalizes to `string`; an all-null field stays null-typed.
    fn prune_nulls(&mut self) {
        if self.types.len() > 1 {
            self.types.remove(&ValueType::Null);
        }
        if let Some(items) = &mut self.items {
            items.prune_nulls();
        }
    }

    /// The observed type union for this field
    pub fn types(&self) -> &BTreeSet<ValueType> {
        &self.types
    }

    /// Merged schema of observed array elements, if any were seen
    pub fn item_schema(&self) -> Option<&FieldSchema> {
        self.items.as_deref()
    }
}

/// Structural schema over a set of object rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    properties: BTreeMap<String, FieldSchema>,
}

impl Schema {
    pub fn properties(&self) -> &BTreeMap<String, FieldSchema> {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Incremental schema builder
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues inference from a previously built schema
    pub fn with_prior(prior: Schema) -> Self {
        Self { schema: prior }
    }

    /// Merges one row's type observations into the schema
    ///
    /// Non-object rows contribute nothing; staged payloads are objects.
    pub fn add_object(&mut self, row: &Value) {
        let Value::Object(map) = row else {
            return;
        };
        for (key, value) in map {
            self.schema
                .properties
                .entry(key.clone())
                .or_default()
                .observe(value);
        }
    }

    /// Finalizes the schema, pruning null types from unions
    pub fn build(mut self) -> Schema {
        for field in self.schema.properties.values_mut() {
            field.prune_nulls();
        }
        self.schema
    }
}

/// Infers a schema over a batch of rows, optionally merging with a prior
pub fn infer(rows: &[Value], prior: Option<Schema>) -> Schema {
    let mut builder = match prior {
        Some(schema) => SchemaBuilder::with_prior(schema),
        None => SchemaBuilder::new(),
    };
    for row in rows {
        builder.add_object(row);
    }
    builder.build()
}
