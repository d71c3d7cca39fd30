//! CLI wiring for kvforge.

use crate::tokenizer::{WordTokenizer, EOS};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use kvforge_orchestrator::{
    DecodeOrchestrator, GenerationConfig, GenerationMetrics, ModelLoader, ModelShape,
    SamplerConfig, TerminationReason, Token,
};
use kvforge_reference::{ReferenceConfig, ReferenceLoader};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kvforge", about = "Decode orchestration for sharded language models")]
pub struct Cli {
    /// Built-in model shape; ignored when the config file carries a shape.
    #[arg(long, global = true, default_value = "tiny")]
    pub preset: String,

    /// JSON file with `shape`, `reference` and `generation` sections.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one generation session on the reference backend.
    Generate(GenerateArgs),
    /// List the built-in model shapes.
    Presets,
    /// Print the resolved configuration as JSON.
    ShowConfig,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerArg {
    Greedy,
    Temperature,
    TopK,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[arg(long)]
    pub prompt: String,
    #[arg(long, default_value_t = 20)]
    pub max_tokens: usize,
    /// Falls back to the config file's sampler when omitted.
    #[arg(long, value_enum)]
    pub sampler: Option<SamplerArg>,
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,
    #[arg(long, default_value_t = 40)]
    pub top_k: usize,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Extra stop token ids; `<eos>` always stops.
    #[arg(long = "stop-token")]
    pub stop_tokens: Vec<Token>,
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl GenerateArgs {
    /// Layers the flags over the configured generation settings.
    pub fn apply(&self, base: GenerationConfig) -> GenerationConfig {
        let mut config = base.with_max_new_tokens(self.max_tokens);
        if let Some(sampler) = self.sampler {
            config = config.with_sampler(match sampler {
                SamplerArg::Greedy => SamplerConfig::Greedy,
                SamplerArg::Temperature => SamplerConfig::Temperature {
                    value: self.temperature,
                },
                SamplerArg::TopK => SamplerConfig::TopK {
                    k: self.top_k,
                    temperature: self.temperature,
                },
            });
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        let mut stop_tokens = config.stop_tokens.clone();
        stop_tokens.push(EOS);
        stop_tokens.extend(self.stop_tokens.iter().copied());
        stop_tokens.sort_unstable();
        stop_tokens.dedup();
        config.with_stop_tokens(stop_tokens)
    }
}

/// Everything a run needs, as read from `--config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub shape: Option<ModelShape>,
    pub reference: ReferenceConfig,
    pub generation: GenerationConfig,
}

impl RunConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let blob = fs::read_to_string(path)
            .with_context(|| format!("failed to read run config {}", path.display()))?;
        serde_json::from_str(&blob)
            .with_context(|| format!("failed to parse run config {}", path.display()))
    }

    /// The configured shape, or the named preset when none is configured.
    pub fn resolve(mut self, preset: &str) -> Result<Self> {
        if self.shape.is_none() {
            let shape = ModelShape::preset(preset).ok_or_else(|| {
                anyhow!(
                    "unknown preset `{preset}`; expected one of {}",
                    ModelShape::presets().join(", ")
                )
            })?;
            self.shape = Some(shape);
        }
        let shape = self.shape()?;
        shape.validate()?;
        self.reference.validate(shape)?;
        self.generation.validate(shape)?;
        Ok(self)
    }

    pub fn shape(&self) -> Result<&ModelShape> {
        self.shape
            .as_ref()
            .ok_or_else(|| anyhow!("run config has no model shape"))
    }
}

pub fn load_run_config(preset: &str, path: Option<&Path>) -> Result<RunConfig> {
    let config = match path {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    config.resolve(preset)
}

/// Serialisable record of one `generate` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub prompt: String,
    pub prompt_tokens: Vec<Token>,
    pub tokens: Vec<Token>,
    pub text: String,
    pub termination: TerminationReason,
    pub metrics: GenerationMetrics,
}

pub fn run_generate(config: &RunConfig, args: &GenerateArgs) -> Result<GenerationReport> {
    let shape = config.shape()?.clone();
    let tokenizer = WordTokenizer::new(shape.vocab_size);
    let prompt_tokens = tokenizer.encode(&args.prompt);
    info!(prompt = %args.prompt, tokens = prompt_tokens.len(), "prompt encoded");

    let model = ReferenceLoader::new(shape, config.reference.clone()).load()?;
    let mut orchestrator = DecodeOrchestrator::new(Arc::new(model))?;
    let output = orchestrator.generate(&prompt_tokens, args.apply(config.generation.clone()))?;

    Ok(GenerationReport {
        prompt: args.prompt.clone(),
        text: tokenizer.decode(&output.tokens),
        prompt_tokens,
        tokens: output.tokens,
        termination: output.termination,
        metrics: output.metrics,
    })
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        preset,
        config,
        command,
    } = cli;

    match command {
        Command::Presets => {
            for name in ModelShape::presets() {
                if let Some(shape) = ModelShape::preset(name) {
                    println!(
                        "{name}: hidden={} context={} batch={} shards={}x{} vocab={}",
                        shape.hidden_dim,
                        shape.context_length,
                        shape.batch_width,
                        shape.num_shards,
                        shape.shard_size,
                        shape.vocab_size
                    );
                }
            }
        }
        Command::ShowConfig => {
            let resolved = load_run_config(&preset, config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Command::Generate(args) => {
            let resolved = load_run_config(&preset, config.as_deref())?;
            let report = run_generate(&resolved, &args)?;
            let metrics = &report.metrics;

            println!("\n=== Generation Results ===");
            println!("Prompt: {}", report.prompt);
            println!("Output: {}", report.text);
            println!("Stopped: {}", report.termination);
            println!("\n=== Metrics ===");
            println!("Prompt tokens: {}", metrics.prompt_tokens);
            println!(
                "Prefill time: {:.2} ms ({} calls)",
                metrics.prefill_ms, metrics.prefill_calls
            );
            println!(
                "Decode time: {:.2} ms ({} calls)",
                metrics.decode_ms, metrics.decode_calls
            );
            println!("Total time: {:.2} ms", metrics.total_ms());
            println!("Tokens generated: {}", metrics.tokens_generated);
            println!("Tokens/sec: {:.2}", metrics.tokens_per_sec());

            if let Some(path) = args.report {
                fs::write(&path, serde_json::to_string_pretty(&report)?)?;
                info!(path = %path.display(), "report written");
            }
        }
    }
    Ok(())
}
