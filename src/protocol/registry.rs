use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

use super::error::{ProtocolError, Result};
use super::grammar::GrammarRenderer;
use super::schema::Schema;

/// Core trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Shape of the `<parameters>` block
    fn input_schema(&self) -> Schema;

    /// Shape of the value `execute` returns
    fn output_schema(&self) -> Schema {
        Schema::map(None)
    }

    /// Execute the tool with validated input
    async fn execute(&self, input: Value) -> anyhow::Result<Value>;
}

/// One registered tool with its schemas fixed at registration time.
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    vocabulary: BTreeSet<String>,
    tool: Arc<dyn Tool>,
}

impl ToolEntry {
    pub async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        self.tool.execute(input).await
    }

    /// Tag names a call to this tool may legitimately contain.
    pub fn vocabulary(&self) -> &BTreeSet<String> {
        &self.vocabulary
    }
}

/// Tools available to one session.
///
/// Built mutably during setup, then shared behind an `Arc` and only read.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
    aliases: HashMap<String, String>, // alias -> canonical_name
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, validating both schemas up front.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(ProtocolError::invalid_schema("$", "tool name must not be empty"));
        }
        if self.tools.contains_key(&name) || self.aliases.contains_key(&name) {
            return Err(ProtocolError::DuplicateTool(name));
        }

        let input_schema = tool.input_schema();
        let output_schema = tool.output_schema();
        input_schema.validate().map_err(|e| scoped(&name, "input", e))?;
        output_schema.validate().map_err(|e| scoped(&name, "output", e))?;

        let mut vocabulary = input_schema.tag_vocabulary("parameters");
        vocabulary.extend(["call".to_string(), "name".to_string()]);

        info!("Registering tool: {}", name);
        self.tools.insert(
            name.clone(),
            ToolEntry {
                name,
                description: tool.description().to_string(),
                input_schema,
                output_schema,
                vocabulary,
                tool,
            },
        );
        Ok(())
    }

    /// Register an alias for an existing tool
    pub fn register_alias(&mut self, alias: &str, target: &str) -> Result<()> {
        if !self.tools.contains_key(target) {
            return Err(ProtocolError::UnknownAliasTarget {
                alias: alias.to_string(),
                target: target.to_string(),
            });
        }
        if self.tools.contains_key(alias) || self.aliases.contains_key(alias) {
            return Err(ProtocolError::DuplicateTool(alias.to_string()));
        }
        info!("Registering alias '{}' -> '{}'", alias, target);
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    /// Canonical name for `name`, checking aliases first
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some(canonical) = self.aliases.get(name) {
            return Some(canonical.as_str());
        }
        self.tools.get_key_value(name).map(|(k, _)| k.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(self.resolve(name)?)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get list of all available tools (including aliases)
    pub fn list_tools(&self) -> Vec<String> {
        let mut tool_names: Vec<String> = self
            .tools
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect();
        tool_names.sort();
        tool_names
    }

    /// Instructions for the model: protocol rules plus one template per tool.
    pub fn catalog_prompt(&self, renderer: &GrammarRenderer) -> String {
        let mut guide = String::from("Tool Reference\n\n");
        guide.push_str("Call a tool by writing a call block anywhere in your reply:\n");
        guide.push_str("<call><name>TOOL_NAME</name><parameters>...</parameters></call>\n");
        guide.push_str("- Write one <call> block per invocation; blocks run in the order they are closed.\n");
        guide.push_str("- Repeat a tag to give several elements of a list.\n");
        guide.push_str("- A self-closing tag such as <limit/> means the value is not provided.\n");
        guide.push_str("- Wrap text that contains markup or spans lines in <![CDATA[ ... ]]>.\n");
        guide.push_str("- Markers in parentheses (optional, default, repeats) are documentation; do not copy them.\n\n");

        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        for name in names {
            let Some(entry) = self.tools.get(name) else {
                continue;
            };
            guide.push_str(&format!("### Tool: {}\n", entry.name));
            if !entry.description.is_empty() {
                guide.push_str(&entry.description);
                guide.push('\n');
            }
            let mut aliases: Vec<&str> = self
                .aliases
                .iter()
                .filter(|(_, target)| *target == name)
                .map(|(alias, _)| alias.as_str())
                .collect();
            if !aliases.is_empty() {
                aliases.sort();
                guide.push_str(&format!("Also callable as: {}\n", aliases.join(", ")));
            }
            if let Some(fields) = entry.input_schema.fields() {
                let documented: Vec<_> = fields.iter().filter(|f| f.description.is_some()).collect();
                if !documented.is_empty() {
                    guide.push_str("- Parameters:\n");
                    for field in documented {
                        let required = if field.schema.is_wrapper() {
                            "optional"
                        } else {
                            "required"
                        };
                        guide.push_str(&format!(
                            "  - `{}` ({}): {}\n",
                            field.name,
                            required,
                            field.description.as_deref().unwrap_or_default()
                        ));
                    }
                }
            }
            guide.push_str("Example:\n");
            guide.push_str(&renderer.render_call(&entry.name, &entry.input_schema));
            guide.push_str("\n\n");
        }
        guide
    }
}

fn scoped(tool: &str, which: &str, err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::InvalidSchema { path, reason } => ProtocolError::InvalidSchema {
            path: format!("{}.{}{}", tool, which, path.trim_start_matches('$')),
            reason,
        },
        other => other,
    }
}
