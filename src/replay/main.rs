use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;

use toolmark::protocol::{Schema, StreamingExtractor, Tool, ToolEvent, ToolRegistry};
use toolmark::shared::config::{self, ToolDefinition, ToolmarkConfig};
use toolmark::shared::logging;

#[derive(Parser)]
#[command(name = "toolmark-replay")]
#[command(about = "Replay recorded model output through the tool-call extractor")]
struct Args {
    /// Config file (defaults to ~/.toolmark/toolmark.json)
    #[arg(long, env = "TOOLMARK_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tool catalog prompt for the configured tools
    Catalog,
    /// Stream a recorded model output through the extractor
    Replay {
        /// File holding the recorded model output
        #[arg(long)]
        input: PathBuf,

        /// Characters per simulated stream chunk
        #[arg(long, default_value_t = 64)]
        chunk_size: usize,

        /// Also print each terminal event as transcript markup
        #[arg(long)]
        markup: bool,
    },
}

/// Stand-in executor that returns its validated input.
struct EchoTool {
    definition: ToolDefinition,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn input_schema(&self) -> Schema {
        self.definition.input.clone()
    }

    fn output_schema(&self) -> Schema {
        self.definition.output_schema()
    }

    async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        Ok(input)
    }
}

fn load_config(explicit: Option<String>) -> Result<(ToolmarkConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let path = config::expand_path(path);
        let config = ToolmarkConfig::load_from_path(&path)?;
        return Ok((config, Some(path)));
    }
    if !config::resolve_config_path().exists() {
        return Ok((ToolmarkConfig::default(), None));
    }
    let (config, path) = ToolmarkConfig::load_default()?;
    Ok((config, Some(path)))
}

fn build_registry(config: &ToolmarkConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for definition in &config.tools {
        registry.register_tool(Arc::new(EchoTool {
            definition: definition.clone(),
        }))?;
        for alias in &definition.aliases {
            registry.register_alias(alias, &definition.name)?;
        }
    }
    Ok(registry)
}

fn split_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) = load_config(args.config)?;
    let _logging = logging::init_service_logging(&config.logging.dir, &config.logging.service_name)?;
    match &config_path {
        Some(path) => tracing::info!("Loaded config from {}", path.display()),
        None => tracing::warn!("No config file found; running with no tools"),
    }

    let registry = build_registry(&config)?;

    match args.command {
        Command::Catalog => {
            println!("{}", registry.catalog_prompt(&config.grammar_renderer()));
        }
        Command::Replay {
            input,
            chunk_size,
            markup,
        } => {
            let text = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;

            let (tx, mut rx) = unbounded_channel::<ToolEvent>();
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::error!("Failed to serialize event: {}", e),
                    }
                    if markup {
                        if let Some(transcript) = event.to_markup() {
                            println!("{}", transcript);
                        }
                    }
                }
            });

            let mut extractor = StreamingExtractor::with_tiers(
                Arc::new(registry),
                tx,
                config.extractor.recovery,
                config.extractor.fallback,
            );
            let chunks = split_chunks(&text, chunk_size);
            tracing::info!(chunks = chunks.len(), "Replaying {}", input.display());
            let stats = extractor.run(futures::stream::iter(chunks)).await;
            drop(extractor);
            printer.await?;

            tracing::info!(
                blocks = stats.blocks_detected,
                ok = stats.executions_ok,
                invalid = stats.decode_failures,
                "Replay complete"
            );
        }
    }

    Ok(())
}
