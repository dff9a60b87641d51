//! Request building and template substitution
//!
//! Templates contain `{name}` placeholders. Substitution is partial:
//! unknown placeholders survive untouched, so bindings can be applied in
//! layers (dependency params first, cursor last).

use crate::client::RequestAttributes;
use crate::config::{CursorLocation, PaginationSpec, RequestTemplate};
use serde_json::Value;
use std::collections::BTreeMap;

/// Substitutes known `{name}` placeholders, leaving unknown ones in place
pub fn partial_format(template: &str, params: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match params.get(name) {
                    Some(value) => out.push_str(&value_to_param(value)),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                // Unterminated brace, keep literally
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Renders a JSON value for use inside a URL or query parameter
pub fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => crate::storage::canonical_json(other),
    }
}

/// Builds request attributes from a template with bound parameters
pub fn build_request(
    template: &RequestTemplate,
    params: &BTreeMap<String, Value>,
) -> RequestAttributes {
    RequestAttributes {
        method: template.method.to_uppercase(),
        url: partial_format(&template.url, params),
        params: template
            .params
            .iter()
            .map(|(k, v)| (k.clone(), partial_format(v, params)))
            .collect(),
        body: template
            .body
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(partial_format(v, params))))
            .collect(),
    }
}

/// Injects the cursor into a request at the configured location
pub fn inject_cursor(attrs: &mut RequestAttributes, pagination: &PaginationSpec, cursor: &Value) {
    match pagination.location {
        CursorLocation::Query => {
            if let Some(param) = &pagination.param {
                attrs.params.insert(param.clone(), value_to_param(cursor));
            }
        }
        CursorLocation::Url => {
            let mut params = BTreeMap::new();
            params.insert("cursor".to_string(), cursor.clone());
            attrs.url = partial_format(&attrs.url, &params);
        }
        CursorLocation::Body => {
            if let Some(param) = &pagination.param {
                attrs.body.insert(param.clone(), cursor.clone());
            }
        }
    }
}

/// Looks up a dotted path in a JSON tree
pub fn path_get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Python-style truthiness for cursor and stop-rule values
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Treats a response fragment as a list of items
///
/// Arrays yield their elements; anything else is a single item (an XML
/// list with one element converts to a plain object, not an array).
pub fn extract_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}
