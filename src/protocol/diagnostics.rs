use std::fmt;

use super::grammar;
use super::markup::Markup;
use super::schema::Schema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => write!(f, "{}", name),
            PathSegment::Index(idx) => write!(f, "[{}]", idx),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    Missing,
    TypeMismatch,
    InvalidEnum { allowed: Vec<String> },
    LiteralMismatch,
    UnknownVariant { discriminator: String, allowed: Vec<String> },
    NoUnionMatch { attempts: Vec<ValidationFailure> },
}

/// A parameter that does not fit its schema.
///
/// This is data fed back to the model, not a crash: `render` produces the
/// multi-line explanation with a corrected example.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub path: Vec<PathSegment>,
    pub kind: FailureKind,
    pub expected: String,
    pub received: Option<String>,
    pub example: String,
}

impl ValidationFailure {
    pub fn new(
        path: &[PathSegment],
        kind: FailureKind,
        schema: &Schema,
        tag: &str,
        received: Option<&Markup>,
    ) -> Self {
        Self {
            path: path.to_vec(),
            kind,
            expected: schema.type_label(),
            received: received.map(Markup::preview),
            example: grammar::render(schema, tag),
        }
    }

    pub fn missing(path: &[PathSegment], schema: &Schema, tag: &str) -> Self {
        Self::new(path, FailureKind::Missing, schema, tag, None)
    }

    pub fn mismatch(path: &[PathSegment], schema: &Schema, tag: &str, received: &Markup) -> Self {
        Self::new(path, FailureKind::TypeMismatch, schema, tag, Some(received))
    }

    /// Dotted location such as `files[1].path`; `(root)` when empty.
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                PathSegment::Index(_) => out.push_str(&segment.to_string()),
            }
        }
        if out.is_empty() {
            "(root)".to_string()
        } else {
            out
        }
    }

    pub fn summary(&self) -> String {
        let location = self.path_string();
        match &self.kind {
            FailureKind::Missing => {
                format!("`{}`: missing required value of type {}", location, self.expected)
            }
            FailureKind::TypeMismatch => format!(
                "`{}`: expected {}, received {}",
                location,
                self.expected,
                self.received.as_deref().unwrap_or("nothing")
            ),
            FailureKind::InvalidEnum { allowed } => format!(
                "`{}`: {} is not one of {}",
                location,
                self.received.as_deref().unwrap_or("value"),
                allowed.join(", ")
            ),
            FailureKind::LiteralMismatch => format!(
                "`{}`: expected exactly {}, received {}",
                location,
                self.expected,
                self.received.as_deref().unwrap_or("nothing")
            ),
            FailureKind::UnknownVariant {
                discriminator,
                allowed,
            } => format!(
                "`{}`: <{}> must be one of {}",
                location,
                discriminator,
                allowed.join(", ")
            ),
            FailureKind::NoUnionMatch { attempts } => format!(
                "`{}`: value matched none of {} alternatives",
                location,
                attempts.len()
            ),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("Invalid parameter at {}\n", self.summary());
        out.push_str(&format!("Expected: {}\n", self.expected));
        out.push_str(&format!(
            "Received: {}\n",
            self.received.as_deref().unwrap_or("nothing")
        ));
        if let FailureKind::NoUnionMatch { attempts } = &self.kind {
            out.push_str("Alternatives tried:\n");
            for (idx, attempt) in attempts.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", idx + 1, attempt.summary()));
            }
        }
        out.push_str("Write it like this:\n");
        out.push_str(&self.example);
        out
    }

    /// Full tool-error text for the transcript.
    pub fn render_for_tool(&self, tool_name: &str) -> String {
        format!(
            "The call to `{}` was not executed because its parameters are invalid.\n{}\nFix the parameters and call the tool again.",
            tool_name,
            self.render()
        )
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for ValidationFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_string() {
        let failure = ValidationFailure::missing(
            &[
                PathSegment::Field("files".into()),
                PathSegment::Index(1),
                PathSegment::Field("path".into()),
            ],
            &Schema::string(),
            "path",
        );
        assert_eq!(failure.path_string(), "files[1].path");
        assert_eq!(
            failure.to_string(),
            "`files[1].path`: missing required value of type string"
        );
    }

    #[test]
    fn test_render_carries_example() {
        let failure = ValidationFailure::mismatch(
            &[PathSegment::Field("limit".into())],
            &Schema::number(),
            "limit",
            &Markup::text("ten"),
        );
        let text = failure.render();
        assert!(text.contains("Expected: number"));
        assert!(text.contains("Received: \"ten\""));
        assert!(text.ends_with("Write it like this:\n<limit>number</limit>"));
    }

    #[test]
    fn test_render_lists_union_attempts() {
        let attempt = ValidationFailure::mismatch(&[], &Schema::number(), "v", &Markup::text("x"));
        let failure = ValidationFailure::new(
            &[],
            FailureKind::NoUnionMatch {
                attempts: vec![attempt.clone(), attempt],
            },
            &Schema::union([Schema::number(), Schema::boolean()]),
            "v",
            Some(&Markup::text("x")),
        );
        let text = failure.render_for_tool("grep");
        assert!(text.starts_with("The call to `grep` was not executed"));
        assert!(text.contains("Alternatives tried:\n  1. `(root)`: expected number"));
        assert!(text.contains("<v>union(number | boolean)</v>"));
    }
}
