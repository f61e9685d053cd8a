use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::encoder::{encode_value, escape_xml};

/// What a streaming session reports for each detected call.
///
/// `id` is fresh per detected call, so two calls to the same tool never share one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    CallDetected {
        id: Uuid,
        tool_name: String,
        input: Value,
    },
    Result {
        id: Uuid,
        tool_name: String,
        input: Value,
        output: Value,
    },
    Error {
        id: Uuid,
        tool_name: String,
        input: Value,
        error: String,
    },
}

impl ToolEvent {
    pub fn id(&self) -> Uuid {
        match self {
            ToolEvent::CallDetected { id, .. }
            | ToolEvent::Result { id, .. }
            | ToolEvent::Error { id, .. } => *id,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            ToolEvent::CallDetected { tool_name, .. }
            | ToolEvent::Result { tool_name, .. }
            | ToolEvent::Error { tool_name, .. } => tool_name,
        }
    }

    pub fn input(&self) -> &Value {
        match self {
            ToolEvent::CallDetected { input, .. }
            | ToolEvent::Result { input, .. }
            | ToolEvent::Error { input, .. } => input,
        }
    }

    /// Result and error events close a call.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ToolEvent::CallDetected { .. })
    }

    /// Transcript form of a terminal event; `None` for `CallDetected`.
    pub fn to_markup(&self) -> Option<String> {
        match self {
            ToolEvent::CallDetected { .. } => None,
            ToolEvent::Result {
                tool_name, output, ..
            } => Some(format!(
                "<result><name>{}</name>{}</result>",
                escape_xml(tool_name),
                encode_value(output, "output")
            )),
            ToolEvent::Error {
                tool_name, error, ..
            } => Some(format!(
                "<result><name>{}</name><error>{}</error></result>",
                escape_xml(tool_name),
                escape_xml(error)
            )),
        }
    }
}
