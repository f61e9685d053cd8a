//! Schema-directed decoding of a [`Markup`] tree into a typed JSON value.
//!
//! The generic tree cannot tell a one-element array from a wrapping object,
//! so arrays are disambiguated here against the schema and the singular form
//! of the enclosing tag. Every failure is returned as a [`ValidationFailure`]
//! carrying the path that was being decoded.

use serde_json::{Map, Number, Value};

use super::diagnostics::{FailureKind, PathSegment, ValidationFailure};
use super::grammar::singular_tag;
use super::markup::{Markup, MarkupMap};
use super::schema::{literal_text, Field, Schema};

pub type DecodeResult<T> = std::result::Result<T, ValidationFailure>;

/// Decodes the contents of a `<parameters>` tag.
pub fn decode(markup: &Markup, schema: &Schema) -> DecodeResult<Value> {
    decode_tagged(markup, schema, "parameters")
}

/// Decodes a value that was written under `tag`. Absent optional values
/// decode to `null`.
pub fn decode_tagged(markup: &Markup, schema: &Schema, tag: &str) -> DecodeResult<Value> {
    Ok(decode_node(Some(markup), schema, tag, &[])?.unwrap_or(Value::Null))
}

/// `Ok(None)` means "absent": the caller omits the field.
fn decode_node(
    input: Option<&Markup>,
    schema: &Schema,
    tag: &str,
    path: &[PathSegment],
) -> DecodeResult<Option<Value>> {
    let present = input.filter(|m| !matches!(m, Markup::Empty));

    match schema {
        Schema::Optional { inner } => match present {
            Some(m) if !treats_blank_as_absent(m, inner) => decode_node(Some(m), inner, tag, path),
            _ => Ok(None),
        },
        Schema::WithDefault { inner, default } => match present {
            Some(m) if !treats_blank_as_absent(m, inner) => decode_node(Some(m), inner, tag, path),
            _ => Ok(Some(default.clone())),
        },
        Schema::Union { options } => decode_union(present, options, schema, tag, path),
        _ => {
            let Some(markup) = present else {
                return Err(ValidationFailure::missing(path, schema, tag));
            };
            decode_present(markup, schema, tag, path).map(Some)
        }
    }
}

fn decode_present(
    markup: &Markup,
    schema: &Schema,
    tag: &str,
    path: &[PathSegment],
) -> DecodeResult<Value> {
    match schema {
        Schema::String => match markup {
            Markup::Text(s) => Ok(Value::String(s.clone())),
            other => Err(ValidationFailure::mismatch(path, schema, tag, other)),
        },
        Schema::Number => markup
            .as_text()
            .and_then(parse_number)
            .ok_or_else(|| ValidationFailure::mismatch(path, schema, tag, markup)),
        Schema::Boolean => markup
            .as_text()
            .and_then(parse_bool)
            .map(Value::Bool)
            .ok_or_else(|| ValidationFailure::mismatch(path, schema, tag, markup)),
        Schema::Enum { values } => {
            let matched = markup.as_text().map(str::trim).and_then(|text| {
                values
                    .iter()
                    .find(|v| v.as_str() == text)
                    .or_else(|| values.iter().find(|v| v.eq_ignore_ascii_case(text)))
            });
            match matched {
                Some(value) => Ok(Value::String(value.clone())),
                None => Err(ValidationFailure::new(
                    path,
                    FailureKind::InvalidEnum {
                        allowed: values.clone(),
                    },
                    schema,
                    tag,
                    Some(markup),
                )),
            }
        }
        Schema::Literal { value } => {
            if markup.as_text().is_some_and(|text| literal_matches(value, text)) {
                Ok(value.clone())
            } else {
                Err(ValidationFailure::new(
                    path,
                    FailureKind::LiteralMismatch,
                    schema,
                    tag,
                    Some(markup),
                ))
            }
        }
        Schema::Array { element } => decode_array(markup, element, schema, tag, path),
        Schema::Object { fields } => decode_object(markup, fields, schema, tag, path),
        Schema::DiscriminatedUnion {
            discriminator,
            options,
        } => decode_discriminated(markup, discriminator, options, schema, tag, path),
        Schema::Map { value } => decode_map(markup, value.as_deref(), schema, tag, path),
        Schema::Optional { .. } | Schema::WithDefault { .. } | Schema::Union { .. } => {
            decode_node(Some(markup), schema, tag, path)
                .map(|value| value.unwrap_or(Value::Null))
        }
    }
}

/// First option that decodes wins; if none does, every attempt is kept for
/// the diagnostic.
fn decode_union(
    input: Option<&Markup>,
    options: &[Schema],
    schema: &Schema,
    tag: &str,
    path: &[PathSegment],
) -> DecodeResult<Option<Value>> {
    let mut attempts = Vec::with_capacity(options.len());
    for option in options {
        match decode_node(input, option, tag, path) {
            Ok(value) => return Ok(value),
            Err(failure) => attempts.push(failure),
        }
    }
    Err(ValidationFailure::new(
        path,
        FailureKind::NoUnionMatch { attempts },
        schema,
        tag,
        input,
    ))
}

/// Settles what list a non-list markup node stands for.
///
/// The last arm wraps the whole node as a single element. That is a
/// best-effort guess kept for compatibility: a multi-key object or a key that
/// does not match the singular tag may be malformed input rather than one
/// array element.
fn array_items(markup: &Markup, item_tag: &str) -> Vec<Markup> {
    match markup {
        Markup::List(items) => items.clone(),
        Markup::Empty => Vec::new(),
        Markup::Text(text) if text.trim().is_empty() => Vec::new(),
        Markup::Text(_) => vec![markup.clone()],
        Markup::Map(map) => match map.single() {
            Some((key, Markup::List(items))) if key == item_tag => items.clone(),
            Some((key, Markup::List(items))) => items
                .iter()
                .map(|item| {
                    let mut wrapped = MarkupMap::new();
                    wrapped.insert(key, item.clone());
                    Markup::Map(wrapped)
                })
                .collect(),
            Some((key, value)) if key == item_tag => vec![value.clone()],
            _ => vec![markup.clone()],
        },
    }
}

fn decode_array(
    markup: &Markup,
    element: &Schema,
    schema: &Schema,
    tag: &str,
    path: &[PathSegment],
) -> DecodeResult<Value> {
    let item_tag = singular_tag(tag);
    let items = array_items(markup, &item_tag);
    if items.is_empty() && !markup.is_blank() {
        return Err(ValidationFailure::mismatch(path, schema, tag, markup));
    }

    let mut values = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let item_path = child_path(path, PathSegment::Index(idx));
        if let Some(value) = decode_node(Some(item), element, &item_tag, &item_path)? {
            values.push(value);
        }
    }
    Ok(Value::Array(values))
}

fn decode_object(
    markup: &Markup,
    fields: &[Field],
    schema: &Schema,
    tag: &str,
    path: &[PathSegment],
) -> DecodeResult<Value> {
    let empty = MarkupMap::new();
    let map = match markup {
        Markup::Map(map) => map,
        other if other.is_blank() => &empty,
        other => return Err(ValidationFailure::mismatch(path, schema, tag, other)),
    };

    // Keys the schema does not declare are ignored.
    let mut object = Map::new();
    for field in fields {
        let field_path = child_path(path, PathSegment::Field(field.name.clone()));
        if let Some(value) = decode_node(map.get(&field.name), &field.schema, &field.name, &field_path)? {
            object.insert(field.name.clone(), value);
        }
    }
    Ok(Value::Object(object))
}

fn decode_discriminated(
    markup: &Markup,
    discriminator: &str,
    options: &[Schema],
    schema: &Schema,
    tag: &str,
    path: &[PathSegment],
) -> DecodeResult<Value> {
    let Markup::Map(map) = markup else {
        return Err(ValidationFailure::mismatch(path, schema, tag, markup));
    };

    let wanted = map
        .get(discriminator)
        .and_then(Markup::as_text)
        .map(str::trim);
    let selected = wanted.and_then(|wanted| {
        options.iter().find(|option| {
            option
                .discriminator_value(discriminator)
                .is_some_and(|value| literal_matches(value, wanted))
        })
    });

    match selected {
        Some(option) => decode_present(markup, option, tag, path),
        None => {
            let allowed = options
                .iter()
                .filter_map(|o| o.discriminator_value(discriminator))
                .map(literal_text)
                .collect();
            let received = map.get(discriminator).unwrap_or(markup);
            Err(ValidationFailure::new(
                &child_path(path, PathSegment::Field(discriminator.to_string())),
                FailureKind::UnknownVariant {
                    discriminator: discriminator.to_string(),
                    allowed,
                },
                schema,
                tag,
                Some(received),
            ))
        }
    }
}

fn decode_map(
    markup: &Markup,
    value_schema: Option<&Schema>,
    schema: &Schema,
    tag: &str,
    path: &[PathSegment],
) -> DecodeResult<Value> {
    let empty = MarkupMap::new();
    let map = match markup {
        Markup::Map(map) => map,
        other if other.is_blank() => &empty,
        other => return Err(ValidationFailure::mismatch(path, schema, tag, other)),
    };

    let mut object = Map::new();
    for (key, child) in map.iter() {
        let value = match value_schema {
            Some(value_schema) => {
                let key_path = child_path(path, PathSegment::Field(key.to_string()));
                decode_node(Some(child), value_schema, key, &key_path)?
            }
            None => Some(child.to_value()),
        };
        if let Some(value) = value {
            object.insert(key.to_string(), value);
        }
    }
    Ok(Value::Object(object))
}

/// Blank text under an optional non-string field reads as "not provided".
fn treats_blank_as_absent(markup: &Markup, inner: &Schema) -> bool {
    markup.is_blank() && !matches!(inner.unwrapped(), Schema::String)
}

fn literal_matches(literal: &Value, text: &str) -> bool {
    let text = text.trim();
    match literal {
        Value::String(s) => s == text,
        Value::Bool(b) => parse_bool(text) == Some(*b),
        Value::Number(n) => parse_number(text).is_some_and(|parsed| match parsed {
            Value::Number(parsed) => parsed.as_f64() == n.as_f64(),
            _ => false,
        }),
        _ => false,
    }
}

fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(int) = text.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    if let Ok(uint) = text.parse::<u64>() {
        return Some(Value::Number(uint.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn child_path(path: &[PathSegment], segment: PathSegment) -> Vec<PathSegment> {
    let mut out = Vec::with_capacity(path.len() + 1);
    out.extend_from_slice(path);
    out.push(segment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::markup::parse_markup;
    use serde_json::json;

    fn decode_str(xml: &str, schema: &Schema) -> DecodeResult<Value> {
        let markup = parse_markup(xml).unwrap();
        decode(&markup, schema)
    }

    fn params(fields: impl IntoIterator<Item = Field>) -> Schema {
        Schema::object(fields)
    }

    #[test]
    fn test_array_of_repeated_tags() {
        let schema = params([Field::new("tags", Schema::array(Schema::string()))]);
        let value = decode_str("<tags><tag>a</tag><tag>b</tag></tags>", &schema).unwrap();
        assert_eq!(value, json!({"tags": ["a", "b"]}));
    }

    #[test]
    fn test_array_single_wrapped_element() {
        let schema = params([Field::new("tags", Schema::array(Schema::string()))]);
        let value = decode_str("<tags><tag>solo</tag></tags>", &schema).unwrap();
        assert_eq!(value, json!({"tags": ["solo"]}));
    }

    #[test]
    fn test_array_scalar_is_wrapped() {
        let schema = params([Field::new("tags", Schema::array(Schema::string()))]);
        let value = decode_str("<tags>solo</tags>", &schema).unwrap();
        assert_eq!(value, json!({"tags": ["solo"]}));
    }

    #[test]
    fn test_array_fallback_wraps_whole_object() {
        let schema = params([Field::new("tags", Schema::array(Schema::map(None)))]);
        let value = decode_str("<tags><other>x</other></tags>", &schema).unwrap();
        assert_eq!(value, json!({"tags": [{"other": "x"}]}));
    }

    #[test]
    fn test_array_items_wraps_unrelated_key_for_string_elements() {
        let markup = parse_markup("<tags><other>x</other></tags>").unwrap();
        let tags = markup.as_map().and_then(|m| m.get("tags")).unwrap();
        let items = array_items(tags, &singular_tag("tags"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].to_value(), json!({"other": "x"}));

        // The wrapped object is then not a valid string element.
        let schema = params([Field::new("tags", Schema::array(Schema::string()))]);
        let err = decode_str("<tags><other>x</other></tags>", &schema).unwrap_err();
        assert_eq!(err.path_string(), "tags[0]");
        assert_eq!(err.kind, FailureKind::TypeMismatch);
    }

    #[test]
    fn test_array_mismatched_repeated_key_rewraps_each_element() {
        let element = Schema::object([Field::new("path", Schema::string())]);
        let schema = params([Field::new("files", Schema::array(element))]);
        let value = decode_str(
            "<files><path>a.rs</path><path>b.rs</path></files>",
            &schema,
        )
        .unwrap();
        assert_eq!(value, json!({"files": [{"path": "a.rs"}, {"path": "b.rs"}]}));
    }

    #[test]
    fn test_array_of_objects() {
        let element = Schema::object([
            Field::new("path", Schema::string()),
            Field::new("line", Schema::number().optional()),
        ]);
        let schema = params([Field::new("files", Schema::array(element))]);
        let value = decode_str(
            "<files><file><path>a.rs</path><line>3</line></file><file><path>b.rs</path></file></files>",
            &schema,
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"files": [{"path": "a.rs", "line": 3}, {"path": "b.rs"}]})
        );
    }

    #[test]
    fn test_array_repeated_without_wrapper() {
        let schema = params([Field::new("tag", Schema::array(Schema::string()))]);
        let value = decode_str("<tag>a</tag><tag>b</tag>", &schema).unwrap();
        assert_eq!(value, json!({"tag": ["a", "b"]}));
    }

    #[test]
    fn test_empty_array_wrapper() {
        let schema = params([Field::new("tags", Schema::array(Schema::string()))]);
        assert_eq!(decode_str("<tags></tags>", &schema).unwrap(), json!({"tags": []}));
    }

    #[test]
    fn test_array_element_failure_path() {
        let schema = params([Field::new("counts", Schema::array(Schema::number()))]);
        let err = decode_str("<counts><count>1</count><count>x</count></counts>", &schema)
            .unwrap_err();
        assert_eq!(err.path_string(), "counts[1]");
        assert_eq!(err.kind, FailureKind::TypeMismatch);
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let schema = params([
            Field::new("a", Schema::string()),
            Field::new("b", Schema::string()),
        ]);
        let value = decode_str("<a>1</a><b>2</b><c>3</c>", &schema).unwrap();
        assert_eq!(value, json!({"a": "1", "b": "2"}));
    }

    #[test]
    fn test_missing_required_field() {
        let schema = params([
            Field::new("a", Schema::string()),
            Field::new("b", Schema::string()),
        ]);
        let err = decode_str("<a>1</a>", &schema).unwrap_err();
        assert_eq!(err.kind, FailureKind::Missing);
        assert_eq!(err.path_string(), "b");
        assert!(err.render().contains("<b>string</b>"));
    }

    #[test]
    fn test_optional_and_default() {
        let schema = params([
            Field::new("path", Schema::string()),
            Field::new("limit", Schema::number().with_default(20)),
            Field::new("recursive", Schema::boolean().optional()),
            Field::new("glob", Schema::string().optional()),
        ]);
        let value = decode_str("<path>src</path><recursive/><glob></glob>", &schema).unwrap();
        assert_eq!(value, json!({"path": "src", "limit": 20, "glob": ""}));
    }

    #[test]
    fn test_self_closing_required_is_missing() {
        let schema = params([Field::new("path", Schema::string())]);
        let err = decode_str("<path/>", &schema).unwrap_err();
        assert_eq!(err.kind, FailureKind::Missing);
    }

    #[test]
    fn test_scalars() {
        let schema = params([
            Field::new("count", Schema::number()),
            Field::new("ratio", Schema::number()),
            Field::new("flag", Schema::boolean()),
            Field::new("mode", Schema::enumeration(["fast", "slow"])),
            Field::new("kind", Schema::literal("search")),
        ]);
        let value = decode_str(
            "<count> 42 </count><ratio>0.5</ratio><flag>Yes</flag><mode>FAST</mode><kind>search</kind>",
            &schema,
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"count": 42, "ratio": 0.5, "flag": true, "mode": "fast", "kind": "search"})
        );
    }

    #[test]
    fn test_invalid_enum_names_allowed_values() {
        let schema = params([Field::new("mode", Schema::enumeration(["fast", "slow"]))]);
        let err = decode_str("<mode>medium</mode>", &schema).unwrap_err();
        assert_eq!(
            err.kind,
            FailureKind::InvalidEnum {
                allowed: vec!["fast".into(), "slow".into()]
            }
        );
        assert!(err.summary().contains("fast, slow"));
    }

    #[test]
    fn test_union_first_match_wins() {
        let schema = params([Field::new(
            "value",
            Schema::union([Schema::number(), Schema::boolean(), Schema::string()]),
        )]);
        assert_eq!(decode_str("<value>7</value>", &schema).unwrap(), json!({"value": 7}));
        assert_eq!(
            decode_str("<value>true</value>", &schema).unwrap(),
            json!({"value": true})
        );
        assert_eq!(
            decode_str("<value>seven</value>", &schema).unwrap(),
            json!({"value": "seven"})
        );
    }

    #[test]
    fn test_union_failure_aggregates_attempts() {
        let schema = params([Field::new(
            "value",
            Schema::union([Schema::number(), Schema::boolean()]),
        )]);
        let err = decode_str("<value>maybe</value>", &schema).unwrap_err();
        match &err.kind {
            FailureKind::NoUnionMatch { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected failure kind {:?}", other),
        }
        assert_eq!(err.path_string(), "value");
    }

    fn target_schema() -> Schema {
        Schema::discriminated_union(
            "type",
            [
                Schema::object([
                    Field::new("type", Schema::literal("endpoint")),
                    Field::new("url", Schema::string().optional()),
                    Field::new("method", Schema::string().optional()),
                ]),
                Schema::object([
                    Field::new("type", Schema::literal("page")),
                    Field::new("url", Schema::string().optional()),
                    Field::new("title", Schema::string().optional()),
                ]),
            ],
        )
    }

    #[test]
    fn test_discriminated_union_routes_by_tag() {
        let schema = params([Field::new("target", target_schema())]);
        let value = decode_str(
            "<target><type>page</type><url>/home</url><method>GET</method></target>",
            &schema,
        )
        .unwrap();
        assert_eq!(value, json!({"target": {"type": "page", "url": "/home"}}));
    }

    #[test]
    fn test_discriminated_union_unknown_tag() {
        let schema = params([Field::new("target", target_schema())]);
        let err = decode_str("<target><type>widget</type></target>", &schema).unwrap_err();
        assert_eq!(
            err.kind,
            FailureKind::UnknownVariant {
                discriminator: "type".into(),
                allowed: vec!["endpoint".into(), "page".into()],
            }
        );
        assert_eq!(err.path_string(), "target.type");
    }

    #[test]
    fn test_typed_map() {
        let schema = params([Field::new("env", Schema::map(Some(Schema::number())))]);
        let value = decode_str("<env><retries>3</retries><timeout>30</timeout></env>", &schema)
            .unwrap();
        assert_eq!(value, json!({"env": {"retries": 3, "timeout": 30}}));

        let err = decode_str("<env><retries>many</retries></env>", &schema).unwrap_err();
        assert_eq!(err.path_string(), "env.retries");
    }

    #[test]
    fn test_untyped_map_passes_through() {
        let schema = params([Field::new("meta", Schema::map(None))]);
        let value = decode_str("<meta><a>1</a><b><c>2</c></b></meta>", &schema).unwrap();
        assert_eq!(value, json!({"meta": {"a": "1", "b": {"c": "2"}}}));
    }

    #[test]
    fn test_attribute_fields_decode_like_children() {
        let schema = params([Field::new(
            "edit",
            Schema::object([
                Field::new("path", Schema::string()).attribute(),
                Field::new("content", Schema::string()),
            ]),
        )]);
        let value = decode_str(
            r#"<edit path="src/lib.rs"><content>fn main() {}</content></edit>"#,
            &schema,
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"edit": {"path": "src/lib.rs", "content": "fn main() {}"}})
        );
    }

    #[test]
    fn test_object_given_text_is_mismatch() {
        let schema = params([Field::new(
            "range",
            Schema::object([Field::new("start", Schema::number())]),
        )]);
        let err = decode_str("<range>1-5</range>", &schema).unwrap_err();
        assert_eq!(err.kind, FailureKind::TypeMismatch);
        assert!(err.render().contains("<start>number</start>"));
    }
}
