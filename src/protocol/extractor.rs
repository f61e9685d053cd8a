//! Streaming extraction and execution of tool calls for one model turn.

use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decoder::decode;
use super::detect::{BlockScanner, DetectedBlock};
use super::events::ToolEvent;
use super::registry::ToolRegistry;

/// Counters for one session, logged when it is finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub blocks_detected: usize,
    pub duplicates_suppressed: usize,
    pub unknown_tools: usize,
    pub decode_failures: usize,
    pub executions_ok: usize,
    pub executions_failed: usize,
}

/// Owns the text of one model turn and turns complete call blocks into
/// events as they close.
///
/// Not reentrant: chunks must be fed one at a time, and every call found in a
/// chunk is executed to completion before the next one starts.
pub struct StreamingExtractor {
    registry: Arc<ToolRegistry>,
    scanner: BlockScanner,
    buffer: String,
    seen: HashSet<(String, String)>,
    events: UnboundedSender<ToolEvent>,
    stats: SessionStats,
    finalized: bool,
}

impl StreamingExtractor {
    pub fn new(registry: Arc<ToolRegistry>, events: UnboundedSender<ToolEvent>) -> Self {
        Self::with_tiers(registry, events, true, true)
    }

    /// Like [`StreamingExtractor::new`], with the recovery and fallback
    /// detection tiers switched individually.
    pub fn with_tiers(
        registry: Arc<ToolRegistry>,
        events: UnboundedSender<ToolEvent>,
        recovery: bool,
        fallback: bool,
    ) -> Self {
        let scanner = BlockScanner::new(&registry, recovery, fallback);
        Self {
            registry,
            scanner,
            buffer: String::new(),
            seen: HashSet::new(),
            events,
            stats: SessionStats::default(),
            finalized: false,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Appends `chunk` and executes every call block it completed.
    pub async fn process_chunk(&mut self, chunk: &str) {
        if self.finalized {
            warn!(len = chunk.len(), "Chunk received after finalize; ignoring");
            return;
        }
        self.buffer.push_str(chunk);
        self.drain_blocks().await;
    }

    /// Last detection pass over the final buffer. Only the first call has
    /// any effect.
    pub async fn finalize(&mut self) {
        if self.finalized {
            warn!("Extractor already finalized");
            return;
        }
        self.drain_blocks().await;
        self.finalized = true;
        info!(
            blocks = self.stats.blocks_detected,
            duplicates = self.stats.duplicates_suppressed,
            unknown = self.stats.unknown_tools,
            invalid = self.stats.decode_failures,
            ok = self.stats.executions_ok,
            failed = self.stats.executions_failed,
            "Tool session finished"
        );
    }

    /// Feeds every chunk of `stream` in order, then finalizes.
    pub async fn run<S, T>(&mut self, stream: S) -> SessionStats
    where
        S: Stream<Item = T>,
        T: AsRef<str>,
    {
        futures::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            self.process_chunk(chunk.as_ref()).await;
        }
        self.finalize().await;
        self.stats.clone()
    }

    async fn drain_blocks(&mut self) {
        let blocks = self.scanner.scan(&self.buffer, &self.registry);
        for block in blocks {
            self.handle_block(block).await;
        }
    }

    async fn handle_block(&mut self, block: DetectedBlock) {
        let signature = (block.tool_name.clone(), block.raw_source.clone());
        if !self.seen.insert(signature) {
            self.stats.duplicates_suppressed += 1;
            debug!(tool = %block.tool_name, "Duplicate call block suppressed");
            return;
        }
        self.stats.blocks_detected += 1;
        debug!(
            tool = %block.tool_name,
            tier = %block.tier,
            start = block.span.start,
            end = block.span.end,
            "Call block detected"
        );

        let registry = Arc::clone(&self.registry);
        let Some(entry) = registry.get(&block.tool_name) else {
            self.stats.unknown_tools += 1;
            debug!(tool = %block.tool_name, "Unknown tool; skipping call");
            return;
        };
        let id = Uuid::new_v4();

        let input = match decode(&block.parameters, &entry.input_schema) {
            Ok(input) => input,
            Err(failure) => {
                self.stats.decode_failures += 1;
                warn!(
                    tool = %entry.name,
                    path = %failure.path_string(),
                    "Call parameters failed validation: {}",
                    failure
                );
                self.emit(ToolEvent::Result {
                    id,
                    tool_name: entry.name.clone(),
                    input: block.parameters.to_value(),
                    output: json!({
                        "status": "invalid_parameters",
                        "message": failure.render_for_tool(&entry.name),
                    }),
                });
                return;
            }
        };

        self.emit(ToolEvent::CallDetected {
            id,
            tool_name: entry.name.clone(),
            input: input.clone(),
        });

        info!(tool = %entry.name, %id, "tool start");
        let start_time = Instant::now();
        let outcome = AssertUnwindSafe(entry.execute(input.clone()))
            .catch_unwind()
            .await;
        let took_ms = start_time.elapsed().as_millis();

        let event = match outcome {
            Ok(Ok(output)) => {
                self.stats.executions_ok += 1;
                info!(tool = %entry.name, %id, took_ms, "tool end");
                ToolEvent::Result {
                    id,
                    tool_name: entry.name.clone(),
                    input,
                    output,
                }
            }
            Ok(Err(err)) => {
                self.stats.executions_failed += 1;
                warn!(tool = %entry.name, %id, took_ms, "Tool failed: {:#}", err);
                ToolEvent::Error {
                    id,
                    tool_name: entry.name.clone(),
                    input,
                    error: format!("{:#}", err),
                }
            }
            Err(panic) => {
                self.stats.executions_failed += 1;
                let message = panic_message(panic.as_ref());
                warn!(tool = %entry.name, %id, took_ms, "Tool panicked: {}", message);
                ToolEvent::Error {
                    id,
                    tool_name: entry.name.clone(),
                    input,
                    error: format!("tool panicked: {}", message),
                }
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: ToolEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped; discarding tool event");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
