pub mod protocol;
pub mod shared;

pub use protocol::{
    GrammarRenderer, ProtocolError, Schema, StreamingExtractor, Tool, ToolEvent, ToolRegistry,
};
