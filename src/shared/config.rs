use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::protocol::error::{ProtocolError, Result};
use crate::protocol::grammar::GrammarRenderer;
use crate::protocol::schema::Schema;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolmarkConfig {
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    /// Object field names listed in a union summary before `...`.
    #[serde(default = "default_union_field_limit")]
    pub union_field_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_true")]
    pub recovery: bool,
    #[serde(default = "default_true")]
    pub fallback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

/// A tool declared in config rather than in code.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input: Schema,
    #[serde(default)]
    pub output: Option<Schema>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            union_field_limit: default_union_field_limit(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            recovery: true,
            fallback: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            service_name: default_service_name(),
        }
    }
}

impl ToolmarkConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            ProtocolError::Config(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: ToolmarkConfig = serde_json::from_str(&data).map_err(|e| {
            ProtocolError::Config(format!(
                "Failed to parse config JSON at {}: {}",
                path.display(),
                e
            ))
        })?;

        config.logging.dir = config.logging.dir.trim().to_string();
        if config.logging.dir.is_empty() {
            config.logging.dir = default_log_dir();
        }
        config.logging.service_name = config.logging.service_name.trim().to_string();
        if config.logging.service_name.is_empty() {
            config.logging.service_name = default_service_name();
        }
        if config.renderer.union_field_limit == 0 {
            config.renderer.union_field_limit = default_union_field_limit();
        }

        for tool in &mut config.tools {
            tool.name = tool.name.trim().to_string();
            if tool.name.is_empty() {
                return Err(ProtocolError::Config(format!(
                    "Tool without a name in {}",
                    path.display()
                )));
            }
            tool.aliases = tool
                .aliases
                .iter()
                .map(|alias| alias.trim().to_string())
                .filter(|alias| !alias.is_empty())
                .collect();
        }

        Ok(config)
    }

    pub fn load_default() -> Result<(Self, PathBuf)> {
        let path = resolve_config_path();
        let config = Self::load_from_path(&path)?;
        Ok((config, path))
    }

    pub fn grammar_renderer(&self) -> GrammarRenderer {
        GrammarRenderer::new(self.renderer.union_field_limit)
    }
}

impl ToolDefinition {
    pub fn output_schema(&self) -> Schema {
        self.output.clone().unwrap_or_else(|| Schema::map(None))
    }
}

fn default_union_field_limit() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_service_name() -> String {
    "toolmark_replay".to_string()
}

pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TOOLMARK_CONFIG_PATH") {
        return expand_path(path);
    }

    default_config_path()
}

pub fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    } else if let Some(stripped) = input.strip_prefix("~\\") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolmark")
        .join("toolmark.json")
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::schema::Field;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("{}");
        let config = ToolmarkConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.renderer.union_field_limit, 3);
        assert!(config.extractor.recovery);
        assert!(config.extractor.fallback);
        assert_eq!(config.logging.dir, "logs");
        assert_eq!(config.logging.service_name, "toolmark_replay");
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_tools_and_overrides() {
        let file = write_config(
            r#"{
                "renderer": {"union_field_limit": 5},
                "extractor": {"fallback": false},
                "logging": {"dir": "  ", "service_name": "replay"},
                "tools": [{
                    "name": " grep ",
                    "description": "Search files",
                    "aliases": ["search", " "],
                    "input": {"type": "object", "fields": [
                        {"name": "pattern", "schema": {"type": "string"}, "description": "Regex"},
                        {"name": "limit", "schema": {"type": "optional", "inner": {"type": "number"}}}
                    ]}
                }]
            }"#,
        );
        let config = ToolmarkConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.renderer.union_field_limit, 5);
        assert!(config.extractor.recovery);
        assert!(!config.extractor.fallback);
        assert_eq!(config.logging.dir, "logs");
        assert_eq!(config.logging.service_name, "replay");

        let tool = &config.tools[0];
        assert_eq!(tool.name, "grep");
        assert_eq!(tool.aliases, vec!["search"]);
        assert_eq!(
            tool.input,
            Schema::object([
                Field::new("pattern", Schema::string()).describe("Regex"),
                Field::new("limit", Schema::number().optional()),
            ])
        );
        assert_eq!(tool.output_schema(), Schema::map(None));
    }

    #[test]
    fn test_invalid_config_reports_path() {
        let file = write_config("{\"tools\": [{\"name\": \"\", \"input\": {\"type\": \"string\"}}]}");
        let err = ToolmarkConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));

        let file = write_config("not json");
        let err = ToolmarkConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config JSON"));

        let missing = Path::new("/nonexistent/toolmark.json");
        assert!(ToolmarkConfig::load_from_path(missing).is_err());
    }

    #[test]
    fn test_load_default_follows_env_path() {
        let file = write_config(r#"{"renderer": {"union_field_limit": 4}}"#);
        std::env::set_var("TOOLMARK_CONFIG_PATH", file.path());
        let loaded = ToolmarkConfig::load_default();
        std::env::remove_var("TOOLMARK_CONFIG_PATH");

        let (config, path) = loaded.unwrap();
        assert_eq!(path, file.path());
        assert_eq!(config.renderer.union_field_limit, 4);
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/etc/toolmark.json".into()), PathBuf::from("/etc/toolmark.json"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_path("~/x.json".into()), home.join("x.json"));
        }
    }
}
