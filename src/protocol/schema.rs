//! Schema IR: a closed description of the value a tool parameter must hold.
//!
//! Tool authors build these once at registration time; the grammar renderer,
//! the decoder and the encoder all walk the same tree with exhaustive matches.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

use super::error::{ProtocolError, Result};
use super::grammar::singular_tag;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schema {
    String,
    Number,
    Boolean,
    Enum {
        values: Vec<String>,
    },
    Literal {
        value: Value,
    },
    Optional {
        inner: Box<Schema>,
    },
    WithDefault {
        inner: Box<Schema>,
        default: Value,
    },
    Array {
        element: Box<Schema>,
    },
    Object {
        fields: Vec<Field>,
    },
    Union {
        options: Vec<Schema>,
    },
    DiscriminatedUnion {
        discriminator: String,
        options: Vec<Schema>,
    },
    Map {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Box<Schema>>,
    },
}

/// A named member of an object schema. Fields keep declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered as an attribute on the parent's opening tag instead of a child tag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attribute: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            description: None,
            attribute: false,
        }
    }

    pub fn attribute(mut self) -> Self {
        self.attribute = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Schema {
    pub fn string() -> Self {
        Schema::String
    }

    pub fn number() -> Self {
        Schema::Number
    }

    pub fn boolean() -> Self {
        Schema::Boolean
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Schema::Literal {
            value: value.into(),
        }
    }

    pub fn array(element: Schema) -> Self {
        Schema::Array {
            element: Box::new(element),
        }
    }

    pub fn object(fields: impl IntoIterator<Item = Field>) -> Self {
        Schema::Object {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn union(options: impl IntoIterator<Item = Schema>) -> Self {
        Schema::Union {
            options: options.into_iter().collect(),
        }
    }

    pub fn discriminated_union(
        discriminator: impl Into<String>,
        options: impl IntoIterator<Item = Schema>,
    ) -> Self {
        Schema::DiscriminatedUnion {
            discriminator: discriminator.into(),
            options: options.into_iter().collect(),
        }
    }

    pub fn map(value: Option<Schema>) -> Self {
        Schema::Map {
            value: value.map(Box::new),
        }
    }

    pub fn optional(self) -> Self {
        Schema::Optional {
            inner: Box::new(self),
        }
    }

    pub fn with_default(self, default: impl Into<Value>) -> Self {
        Schema::WithDefault {
            inner: Box::new(self),
            default: default.into(),
        }
    }

    /// Strips `optional`/`withDefault` wrappers.
    pub fn unwrapped(&self) -> &Schema {
        match self {
            Schema::Optional { inner } | Schema::WithDefault { inner, .. } => inner.unwrapped(),
            other => other,
        }
    }

    pub fn is_wrapper(&self) -> bool {
        matches!(self, Schema::Optional { .. } | Schema::WithDefault { .. })
    }

    /// True when the rendered form nests child tags.
    pub fn is_composite(&self) -> bool {
        match self.unwrapped() {
            Schema::Array { .. }
            | Schema::Object { .. }
            | Schema::DiscriminatedUnion { .. }
            | Schema::Map { .. } => true,
            _ => false,
        }
    }

    pub fn fields(&self) -> Option<&[Field]> {
        match self.unwrapped() {
            Schema::Object { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields()?.iter().find(|f| f.name == name)
    }

    /// The literal value carried by a discriminated-union option.
    pub fn discriminator_value(&self, discriminator: &str) -> Option<&Value> {
        match self.field(discriminator)?.schema.unwrapped() {
            Schema::Literal { value } => Some(value),
            _ => None,
        }
    }

    /// Short label used in templates and diagnostics.
    pub fn type_label(&self) -> String {
        match self {
            Schema::String => "string".to_string(),
            Schema::Number => "number".to_string(),
            Schema::Boolean => "boolean".to_string(),
            Schema::Enum { values } => format!("enum({})", values.join("|")),
            Schema::Literal { value } => format!("literal({})", value),
            Schema::Optional { inner } => inner.type_label(),
            Schema::WithDefault { inner, .. } => inner.type_label(),
            Schema::Array { element } => format!("array({})", element.type_label()),
            Schema::Object { .. } => "object".to_string(),
            Schema::Union { .. } => "union".to_string(),
            Schema::DiscriminatedUnion { discriminator, .. } => {
                format!("object tagged by <{}>", discriminator)
            }
            Schema::Map { .. } => "map".to_string(),
        }
    }

    /// Every tag name a well-formed rendering of this schema can contain.
    pub fn tag_vocabulary(&self, root_tag: &str) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        collect_tags(self, root_tag, &mut tags);
        tags
    }

    /// Checks the structural invariants the decoder relies on.
    pub fn validate(&self) -> Result<()> {
        self.validate_at("$")
    }

    fn validate_at(&self, path: &str) -> Result<()> {
        match self {
            Schema::String | Schema::Number | Schema::Boolean => Ok(()),
            Schema::Enum { values } => {
                if values.is_empty() {
                    return Err(ProtocolError::invalid_schema(path, "enum has no values"));
                }
                Ok(())
            }
            Schema::Literal { value } => match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
                other => Err(ProtocolError::invalid_schema(
                    path,
                    format!("literal must be a string, number or boolean, got {}", other),
                )),
            },
            Schema::Optional { inner } | Schema::WithDefault { inner, .. } => {
                inner.validate_at(path)
            }
            Schema::Array { element } => element.validate_at(&format!("{}[]", path)),
            Schema::Object { fields } => {
                let mut seen = HashSet::new();
                for field in fields {
                    if field.name.trim().is_empty() {
                        return Err(ProtocolError::invalid_schema(path, "field with empty name"));
                    }
                    if !seen.insert(field.name.as_str()) {
                        return Err(ProtocolError::invalid_schema(
                            path,
                            format!("duplicate field '{}'", field.name),
                        ));
                    }
                    if field.attribute && field.schema.is_composite() {
                        return Err(ProtocolError::invalid_schema(
                            format!("{}.{}", path, field.name),
                            "attribute fields must be primitive",
                        ));
                    }
                    field.schema.validate_at(&format!("{}.{}", path, field.name))?;
                }
                Ok(())
            }
            Schema::Union { options } => {
                if options.is_empty() {
                    return Err(ProtocolError::invalid_schema(path, "union has no options"));
                }
                for (idx, option) in options.iter().enumerate() {
                    option.validate_at(&format!("{}|{}", path, idx))?;
                }
                Ok(())
            }
            Schema::DiscriminatedUnion {
                discriminator,
                options,
            } => {
                if options.is_empty() {
                    return Err(ProtocolError::invalid_schema(
                        path,
                        "discriminated union has no options",
                    ));
                }
                let mut tags = HashSet::new();
                for (idx, option) in options.iter().enumerate() {
                    let option_path = format!("{}|{}", path, idx);
                    let Schema::Object { fields } = option else {
                        return Err(ProtocolError::invalid_schema(
                            option_path,
                            "discriminated union options must be objects",
                        ));
                    };
                    let literal_fields = fields
                        .iter()
                        .filter(|f| matches!(f.schema, Schema::Literal { .. }))
                        .filter(|f| &f.name == discriminator)
                        .count();
                    if literal_fields != 1 {
                        return Err(ProtocolError::invalid_schema(
                            option_path,
                            format!(
                                "option must carry exactly one literal field named '{}'",
                                discriminator
                            ),
                        ));
                    }
                    let tag = option
                        .discriminator_value(discriminator)
                        .map(literal_text)
                        .unwrap_or_default();
                    if !tags.insert(tag.clone()) {
                        return Err(ProtocolError::invalid_schema(
                            option_path,
                            format!("duplicate discriminator value '{}'", tag),
                        ));
                    }
                    option.validate_at(&option_path)?;
                }
                Ok(())
            }
            Schema::Map { value } => match value {
                Some(value) => value.validate_at(&format!("{}{{}}", path)),
                None => Ok(()),
            },
        }
    }
}

/// Text form of a literal as it appears between tags.
pub fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn collect_tags(schema: &Schema, tag: &str, tags: &mut BTreeSet<String>) {
    tags.insert(tag.to_string());
    match schema {
        Schema::Optional { inner } | Schema::WithDefault { inner, .. } => {
            collect_tags(inner, tag, tags)
        }
        Schema::Array { element } => collect_tags(element, &singular_tag(tag), tags),
        Schema::Object { fields } => {
            for field in fields {
                collect_tags(&field.schema, &field.name, tags);
            }
        }
        Schema::Union { options } | Schema::DiscriminatedUnion { options, .. } => {
            for option in options {
                collect_tags(option, tag, tags);
            }
        }
        Schema::Map { value: Some(value) } => collect_tags(value, tag, tags),
        Schema::String
        | Schema::Number
        | Schema::Boolean
        | Schema::Enum { .. }
        | Schema::Literal { .. }
        | Schema::Map { value: None } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_or_endpoint() -> Schema {
        Schema::discriminated_union(
            "type",
            [
                Schema::object([
                    Field::new("type", Schema::literal("endpoint")),
                    Field::new("url", Schema::string()),
                ]),
                Schema::object([
                    Field::new("type", Schema::literal("page")),
                    Field::new("url", Schema::string().optional()),
                ]),
            ],
        )
    }

    #[test]
    fn test_valid_discriminated_union() {
        assert!(page_or_endpoint().validate().is_ok());
    }

    #[test]
    fn test_discriminated_union_requires_literal() {
        let schema = Schema::discriminated_union(
            "type",
            [Schema::object([Field::new("type", Schema::string())])],
        );
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one literal field"));
    }

    #[test]
    fn test_discriminated_union_rejects_duplicate_tags() {
        let option = Schema::object([Field::new("type", Schema::literal("a"))]);
        let schema = Schema::discriminated_union("type", [option.clone(), option]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let schema = Schema::object([
            Field::new("a", Schema::string()),
            Field::new("a", Schema::number()),
        ]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_empty_enum_rejected() {
        assert!(Schema::enumeration(Vec::<String>::new()).validate().is_err());
    }

    #[test]
    fn test_serde_shape() {
        let schema = Schema::object([
            Field::new("path", Schema::string()).attribute(),
            Field::new("limit", Schema::number().with_default(10)),
        ]);
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "object",
                "fields": [
                    {"name": "path", "schema": {"type": "string"}, "attribute": true},
                    {"name": "limit", "schema": {"type": "with_default", "inner": {"type": "number"}, "default": 10}}
                ]
            })
        );
        let back: Schema = serde_json::from_value(value).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_tag_vocabulary() {
        let schema = Schema::object([
            Field::new("files", Schema::array(Schema::object([Field::new("path", Schema::string())]))),
            Field::new("target", page_or_endpoint()),
        ]);
        let tags = schema.tag_vocabulary("parameters");
        for tag in ["parameters", "files", "file", "path", "target", "type", "url"] {
            assert!(tags.contains(tag), "missing {}", tag);
        }
    }
}
