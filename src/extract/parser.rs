//! Response body parsing
//!
//! Every strategy downstream works on JSON trees; Atom/XML responses are
//! converted into one (elements become objects, repeated sibling elements
//! become arrays, attributes get an `@` prefix, text-only elements become
//! strings).

use crate::config::ResponseFormat;
use crate::{Result, TributaryError};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

/// Parses a response body according to the entity's declared format
pub fn parse_body(format: ResponseFormat, text: &str) -> Result<Value> {
    match format {
        ResponseFormat::Json => Ok(serde_json::from_str(text)?),
        ResponseFormat::Atom | ResponseFormat::Xml => xml_to_value(text),
    }
}

#[derive(Default)]
struct XmlNode {
    fields: serde_json::Map<String, Value>,
    text: String,
}

impl XmlNode {
    fn insert_child(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            Some(Value::Array(siblings)) => siblings.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
    }

    fn finish(mut self) -> Value {
        let text = self.text.trim();
        if self.fields.is_empty() {
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            }
        } else {
            if !text.is_empty() {
                self.fields
                    .insert("#text".to_string(), Value::String(text.to_string()));
            }
            Value::Object(self.fields)
        }
    }
}

fn xml_err(e: impl std::fmt::Display) -> TributaryError {
    TributaryError::Xml(e.to_string())
}

/// Converts an XML document into a JSON tree
pub fn xml_to_value(text: &str) -> Result<Value> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<(String, XmlNode)> = vec![(String::new(), XmlNode::default())];

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let mut node = XmlNode::default();
                for attr in start.attributes() {
                    let attr = attr.map_err(xml_err)?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr.unescape_value().map_err(xml_err)?.into_owned();
                    node.fields.insert(key, Value::String(value));
                }
                stack.push((name, node));
            }
            Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let mut node = XmlNode::default();
                for attr in start.attributes() {
                    let attr = attr.map_err(xml_err)?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr.unescape_value().map_err(xml_err)?.into_owned();
                    node.fields.insert(key, Value::String(value));
                }
                if let Some((_, parent)) = stack.last_mut() {
                    parent.insert_child(name, node.finish());
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_err)?;
                if let Some((_, node)) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                let bytes = t.into_inner();
                if let Some((_, node)) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&bytes));
                }
            }
            Event::End(_) => {
                let (name, node) = stack.pop().ok_or_else(|| xml_err("unbalanced document"))?;
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| xml_err("unbalanced document"))?;
                parent.1.insert_child(name, node.finish());
            }
            Event::Eof => break,
            _ => {} // declarations, comments, processing instructions
        }
    }

    let (_, root) = stack.pop().ok_or_else(|| xml_err("empty document"))?;
    if !stack.is_empty() {
        return Err(xml_err("unbalanced document"));
    }
    Ok(Value::Object(root.fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json() {
        let value = parse_body(ResponseFormat::Json, r#"{"ok": true}"#).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_body(ResponseFormat::Json, "not json").is_err());
    }

    #[test]
    fn test_xml_text_elements() {
        let value = xml_to_value("<item><id>7</id><title>hello</title></item>").unwrap();
        assert_eq!(value, json!({"item": {"id": "7", "title": "hello"}}));
    }

    #[test]
    fn test_xml_repeated_siblings_become_array() {
        let value =
            xml_to_value("<feed><entry><id>1</id></entry><entry><id>2</id></entry></feed>")
                .unwrap();
        assert_eq!(
            value,
            json!({"feed": {"entry": [{"id": "1"}, {"id": "2"}]}})
        );
    }

    #[test]
    fn test_xml_attributes_prefixed() {
        let value = xml_to_value(r#"<link href="https://example.org/next" rel="next"/>"#).unwrap();
        assert_eq!(
            value,
            json!({"link": {"@href": "https://example.org/next", "@rel": "next"}})
        );
    }

    #[test]
    fn test_atom_feed_shape() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Feed</title>
  <entry>
    <id>urn:1</id>
    <title>First</title>
    <summary>one</summary>
  </entry>
  <entry>
    <id>urn:2</id>
    <title>Second</title>
    <summary>two</summary>
  </entry>
</feed>"#;

        let value = parse_body(ResponseFormat::Atom, atom).unwrap();
        let entries = &value["feed"]["entry"];
        assert_eq!(entries.as_array().unwrap().len(), 2);
        assert_eq!(entries[0]["id"], json!("urn:1"));
        assert_eq!(entries[1]["title"], json!("Second"));
    }

    #[test]
    fn test_xml_mixed_text_kept_under_text_key() {
        let value = xml_to_value("<p>before<b>bold</b></p>").unwrap();
        assert_eq!(value["p"]["#text"], json!("before"));
        assert_eq!(value["p"]["b"], json!("bold"));
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(xml_to_value("<a><b></a>").is_err());
    }
}
