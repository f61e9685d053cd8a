//! The tool-call markup protocol: schemas, the grammar shown to the model,
//! decoding of what it writes back, and streaming extraction of call blocks.

pub mod decoder;
pub mod detect;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod events;
pub mod extractor;
pub mod grammar;
pub mod markup;
pub mod registry;
pub mod schema;

pub use decoder::{decode, decode_tagged, DecodeResult};
pub use detect::{BlockScanner, DetectedBlock, DetectionTier};
pub use diagnostics::{FailureKind, PathSegment, ValidationFailure};
pub use encoder::{encode, encode_call, encode_value};
pub use error::{ProtocolError, Result};
pub use events::ToolEvent;
pub use extractor::{SessionStats, StreamingExtractor};
pub use grammar::{render, singular_tag, GrammarRenderer};
pub use markup::{parse_markup, Markup, MarkupMap};
pub use registry::{Tool, ToolEntry, ToolRegistry};
pub use schema::{Field, Schema};
