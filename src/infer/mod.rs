//! JSON schema inference for the normalizer
//!
//! This module turns batches of raw payloads into a structural schema and
//! maps that schema to relational column types that drive dynamic table
//! creation and evolution.

mod builder;
mod columns;

pub use builder::{infer, FieldSchema, Schema, SchemaBuilder, ValueType};
pub use columns::{to_column_types, ColumnType};
