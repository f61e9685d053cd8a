//! Renders a [`Schema`] as the markup template a model is asked to reproduce.

use serde_json::Value;

use super::schema::{literal_text, Field, Schema};

const INDENT: &str = "  ";
const SINGULAR_SUFFIX: &str = "Item";
const ANY_KEY_TAG: &str = "anyKey";
pub const DEFAULT_UNION_FIELD_LIMIT: usize = 3;

/// Tag used for one element of an array rendered under `tag`.
///
/// `files` -> `file`, `entries` -> `entry`, `matches` -> `match`; tags that are
/// already singular (or irregular) get a generic suffix: `data` -> `dataItem`.
pub fn singular_tag(tag: &str) -> String {
    let lower = tag.to_ascii_lowercase();
    if lower.len() > 3 && lower.ends_with("ies") {
        return format!("{}y", &tag[..tag.len() - 3]);
    }
    for suffix in ["sses", "shes", "ches", "xes"] {
        if lower.len() > suffix.len() && lower.ends_with(suffix) {
            return tag[..tag.len() - 2].to_string();
        }
    }
    if lower.len() > 1
        && lower.ends_with('s')
        && !lower.ends_with("ss")
        && !lower.ends_with("us")
        && !lower.ends_with("is")
    {
        return tag[..tag.len() - 1].to_string();
    }
    format!("{}{}", tag, SINGULAR_SUFFIX)
}

#[derive(Debug, Clone)]
pub struct GrammarRenderer {
    union_field_limit: usize,
}

impl Default for GrammarRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_UNION_FIELD_LIMIT)
    }
}

/// Renders with default options.
pub fn render(schema: &Schema, tag: &str) -> String {
    GrammarRenderer::default().render(schema, tag)
}

impl GrammarRenderer {
    pub fn new(union_field_limit: usize) -> Self {
        Self {
            union_field_limit: union_field_limit.max(1),
        }
    }

    pub fn render(&self, schema: &Schema, tag: &str) -> String {
        let mut lines = Vec::new();
        self.render_node(schema, tag, &[], 0, &mut lines);
        lines.join("\n")
    }

    /// The whole call block template for one tool.
    pub fn render_call(&self, tool_name: &str, parameters: &Schema) -> String {
        let mut lines = vec![
            "<call>".to_string(),
            format!("{}<name>{}</name>", INDENT, tool_name),
        ];
        self.render_node(parameters, "parameters", &[], 1, &mut lines);
        lines.push("</call>".to_string());
        lines.join("\n")
    }

    fn render_node(
        &self,
        schema: &Schema,
        tag: &str,
        markers: &[String],
        depth: usize,
        lines: &mut Vec<String>,
    ) {
        let pad = INDENT.repeat(depth);
        match schema {
            Schema::Optional { inner } => {
                let markers = with_marker(markers, "optional".to_string());
                self.render_node(inner, tag, &markers, depth, lines);
            }
            Schema::WithDefault { inner, default } => {
                let markers = with_marker(markers, format!("default: {}", default_text(default)));
                self.render_node(inner, tag, &markers, depth, lines);
            }
            Schema::String
            | Schema::Number
            | Schema::Boolean
            | Schema::Enum { .. }
            | Schema::Literal { .. } => {
                lines.push(format!(
                    "{}<{}>{}{}</{}>",
                    pad,
                    tag,
                    schema.type_label(),
                    inline_markers(markers),
                    tag
                ));
            }
            Schema::Union { options } => {
                let summary: Vec<String> = options.iter().map(|o| self.summarize(o)).collect();
                lines.push(format!(
                    "{}<{}>union({}){}</{}>",
                    pad,
                    tag,
                    summary.join(" | "),
                    inline_markers(markers),
                    tag
                ));
            }
            Schema::Array { element } => {
                lines.push(format!("{}<{}>{}", pad, tag, inline_markers(markers)));
                let item = singular_tag(tag);
                self.render_node(element, &item, &["repeats".to_string()], depth + 1, lines);
                lines.push(format!("{}</{}>", pad, tag));
            }
            Schema::Object { fields } => {
                let attributes = render_attributes(fields);
                lines.push(format!("{}<{}{}>{}", pad, tag, attributes, inline_markers(markers)));
                for field in fields.iter().filter(|f| !f.attribute) {
                    self.render_node(&field.schema, &field.name, &[], depth + 1, lines);
                }
                lines.push(format!("{}</{}>", pad, tag));
            }
            Schema::DiscriminatedUnion {
                discriminator,
                options,
            } => {
                let markers = with_marker(markers, "one variant".to_string());
                lines.push(format!("{}<{}>{}", pad, tag, inline_markers(&markers)));
                let label_pad = INDENT.repeat(depth + 1);
                let field_pad = INDENT.repeat(depth + 2);
                for option in options {
                    let label = option
                        .discriminator_value(discriminator)
                        .map(literal_text)
                        .unwrap_or_default();
                    lines.push(format!("{}[{} = \"{}\"]", label_pad, discriminator, label));
                    for field in option.fields().unwrap_or_default() {
                        if field.name == *discriminator {
                            lines.push(format!(
                                "{}<{}>{}</{}>",
                                field_pad, field.name, label, field.name
                            ));
                        } else if !field.attribute {
                            self.render_node(&field.schema, &field.name, &[], depth + 2, lines);
                        }
                    }
                }
                lines.push(format!("{}</{}>", pad, tag));
            }
            Schema::Map { value } => {
                lines.push(format!("{}<{}>{}", pad, tag, inline_markers(markers)));
                let markers = ["repeats, any tag name".to_string()];
                match value {
                    Some(value) => self.render_node(value, ANY_KEY_TAG, &markers, depth + 1, lines),
                    None => lines.push(format!(
                        "{}{}<{}>any{}</{}>",
                        pad,
                        INDENT,
                        ANY_KEY_TAG,
                        inline_markers(&markers),
                        ANY_KEY_TAG
                    )),
                }
                lines.push(format!("{}</{}>", pad, tag));
            }
        }
    }

    /// One-token description of a union alternative.
    fn summarize(&self, schema: &Schema) -> String {
        match schema {
            Schema::Optional { inner } => format!("{}?", self.summarize(inner)),
            Schema::WithDefault { inner, .. } => self.summarize(inner),
            Schema::Object { fields } => {
                let names: Vec<&str> = fields
                    .iter()
                    .take(self.union_field_limit)
                    .map(|f| f.name.as_str())
                    .collect();
                let more = if fields.len() > self.union_field_limit { "..." } else { "" };
                format!("object{{{}{}}}", names.join(","), more)
            }
            Schema::Array { element } => format!("array({})", self.summarize(element)),
            Schema::Union { options } => options
                .iter()
                .map(|o| self.summarize(o))
                .collect::<Vec<_>>()
                .join(" | "),
            Schema::DiscriminatedUnion {
                discriminator,
                options,
            } => {
                let tags: Vec<String> = options
                    .iter()
                    .filter_map(|o| o.discriminator_value(discriminator))
                    .map(literal_text)
                    .collect();
                format!("object{{{}: {}}}", discriminator, tags.join("|"))
            }
            other => other.type_label(),
        }
    }
}

fn with_marker(markers: &[String], marker: String) -> Vec<String> {
    let mut out = markers.to_vec();
    out.push(marker);
    out
}

fn inline_markers(markers: &[String]) -> String {
    if markers.is_empty() {
        String::new()
    } else {
        format!(" ({})", markers.join(", "))
    }
}

fn render_attributes(fields: &[Field]) -> String {
    let mut out = String::new();
    for field in fields.iter().filter(|f| f.attribute) {
        let label = match &field.schema {
            Schema::Optional { inner } => format!("{} (optional)", inner.type_label()),
            Schema::WithDefault { inner, default } => {
                format!("{} (default: {})", inner.type_label(), default_text(default))
            }
            other => other.type_label(),
        };
        out.push_str(&format!(" {}=\"{}\"", field.name, label.replace('"', "'")));
    }
    out
}

fn default_text(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}
