use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid schema at `{path}`: {reason}")]
    InvalidSchema { path: String, reason: String },

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Alias '{alias}' targets unknown tool '{target}'")]
    UnknownAliasTarget { alias: String, target: String },

    #[error("Malformed markup: {0}")]
    Markup(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    pub(crate) fn invalid_schema(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidSchema {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
