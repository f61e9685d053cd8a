//! Writes values as markup following the grammar, so that decoding the output
//! against the same schema gives the value back.

use serde_json::Value;

use super::grammar::singular_tag;
use super::schema::{literal_text, Field, Schema};

/// Encodes `value` under `tag` as `schema` describes it. Absent optional
/// values encode to an empty string.
pub fn encode(value: &Value, schema: &Schema, tag: &str) -> String {
    encode_node(Some(value), schema, tag).unwrap_or_default()
}

/// A complete `<call>` block.
pub fn encode_call(tool_name: &str, parameters: &Value, schema: &Schema) -> String {
    format!(
        "<call><name>{}</name>{}</call>",
        escape_xml(tool_name),
        match encode_node(Some(parameters), schema, "parameters") {
            Some(body) => body,
            None => "<parameters/>".to_string(),
        }
    )
}

/// Schema-less rendering used for tool output written back to the transcript.
pub fn encode_value(value: &Value, tag: &str) -> String {
    let tag = sanitize_tag(tag);
    let body = value_body(value);
    if body.is_empty() {
        format!("<{} />", tag)
    } else {
        format!("<{}>{}</{}>", tag, body, tag)
    }
}

fn encode_node(value: Option<&Value>, schema: &Schema, tag: &str) -> Option<String> {
    let value = value.filter(|v| !v.is_null());
    match schema {
        Schema::Optional { inner } | Schema::WithDefault { inner, .. } => {
            value.and_then(|v| encode_node(Some(v), inner, tag))
        }
        Schema::String => value.map(|v| leaf(tag, &text_body(&scalar_text(v)))),
        Schema::Number | Schema::Boolean | Schema::Enum { .. } => {
            value.map(|v| leaf(tag, &escape_xml(&scalar_text(v))))
        }
        Schema::Literal { value: literal } => {
            Some(leaf(tag, &escape_xml(&literal_text(value.unwrap_or(literal)))))
        }
        Schema::Array { element } => {
            let items = value.and_then(Value::as_array)?;
            let item_tag = singular_tag(tag);
            let body: String = items
                .iter()
                .filter_map(|item| encode_node(Some(item), element, &item_tag))
                .collect();
            Some(format!("<{}>{}</{}>", tag, body, tag))
        }
        Schema::Object { fields } => Some(encode_object(value?, fields, tag)),
        Schema::Union { options } => {
            let value = value?;
            let option = options
                .iter()
                .find(|option| accepts(option, value))
                .or_else(|| options.first())?;
            encode_node(Some(value), option, tag)
        }
        Schema::DiscriminatedUnion {
            discriminator,
            options,
        } => {
            let value = value?;
            let wanted = value.get(discriminator).map(literal_text)?;
            let option = options.iter().find(|option| {
                option
                    .discriminator_value(discriminator)
                    .map(literal_text)
                    .is_some_and(|tag| tag == wanted)
            })?;
            encode_node(Some(value), option, tag)
        }
        Schema::Map { value: value_schema } => {
            let entries = value.and_then(Value::as_object)?;
            let mut body = String::new();
            for (key, item) in entries {
                let key = sanitize_tag(key);
                let encoded = match value_schema {
                    Some(value_schema) => encode_node(Some(item), value_schema, &key),
                    None => Some(encode_value(item, &key)),
                };
                body.push_str(&encoded.unwrap_or_default());
            }
            Some(format!("<{}>{}</{}>", tag, body, tag))
        }
    }
}

fn encode_object(value: &Value, fields: &[Field], tag: &str) -> String {
    let mut attributes = String::new();
    let mut body = String::new();
    for field in fields {
        let field_value = value.get(&field.name);
        if field.attribute {
            if let Some(v) = field_value.filter(|v| !v.is_null()) {
                attributes.push_str(&format!(
                    " {}=\"{}\"",
                    field.name,
                    escape_xml(&scalar_text(v))
                ));
            }
            continue;
        }
        if let Some(encoded) = encode_node(field_value, &field.schema, &field.name) {
            body.push_str(&encoded);
        }
    }
    format!("<{}{}>{}</{}>", tag, attributes, body, tag)
}

/// Shallow structural check used to pick a union alternative.
fn accepts(schema: &Schema, value: &Value) -> bool {
    match (schema, value) {
        (Schema::Optional { inner } | Schema::WithDefault { inner, .. }, v) => {
            v.is_null() || accepts(inner, v)
        }
        (Schema::String, Value::String(_)) => true,
        (Schema::Number, Value::Number(_)) => true,
        (Schema::Boolean, Value::Bool(_)) => true,
        (Schema::Enum { values }, Value::String(s)) => values.contains(s),
        (Schema::Literal { value: literal }, v) => literal == v,
        (Schema::Array { element }, Value::Array(items)) => {
            items.iter().all(|item| accepts(element, item))
        }
        (Schema::Object { fields }, Value::Object(map)) => fields.iter().all(|field| {
            match map.get(&field.name) {
                Some(v) => accepts(&field.schema, v),
                None => field.schema.is_wrapper(),
            }
        }),
        (Schema::Union { options }, v) => options.iter().any(|option| accepts(option, v)),
        (Schema::DiscriminatedUnion { options, .. }, v) => {
            options.iter().any(|option| accepts(option, v))
        }
        (Schema::Map { .. }, Value::Object(_)) => true,
        _ => false,
    }
}

fn leaf(tag: &str, body: &str) -> String {
    format!("<{}>{}</{}>", tag, body, tag)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Plain text is trimmed by the parser, so anything whitespace-sensitive or
/// multi-line goes into CDATA.
fn text_body(text: &str) -> String {
    if text.contains('\n') || text.trim() != text {
        format!("<![CDATA[{}]]>", escape_cdata(text))
    } else {
        escape_xml(text)
    }
}

fn value_body(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => text_body(s),
        Value::Array(items) => {
            let mut parts = String::new();
            for item in items {
                parts.push_str(&encode_value(item, "item"));
            }
            parts
        }
        Value::Object(map) => {
            let mut parts = String::new();
            for (key, item) in map {
                parts.push_str(&encode_value(item, key));
            }
            parts
        }
    }
}

pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn escape_cdata(text: &str) -> String {
    text.replace("]]>", "]]]]><![CDATA[>")
}

fn sanitize_tag(name: &str) -> String {
    let mut result = String::new();
    for (i, ch) in name.chars().enumerate() {
        let valid = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.'
        };
        result.push(if valid { ch } else { '_' });
    }
    if result.is_empty() {
        "_".to_string()
    } else {
        result
    }
}
