//! Shape constants supplied by the model loader and per-session generation
//! settings.

use crate::error::{OrchestratorError, Result};
use crate::sampler::SamplerConfig;
use crate::tensor::Token;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Fixed shape constants of a compiled model. Immutable for the lifetime of
/// every session built on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    pub hidden_dim: usize,
    pub context_length: usize,
    /// Prefill window width `B`.
    pub batch_width: usize,
    pub shard_size: usize,
    pub num_shards: usize,
    pub vocab_size: usize,
}

const PRESETS: &[&str] = &["qwen3-0.6b", "tiny"];

impl ModelShape {
    /// Qwen3 0.6B split into embeddings, one FFN trunk and a 16-way LM head.
    pub fn qwen3_0_6b() -> Self {
        Self {
            hidden_dim: 1024,
            context_length: 512,
            batch_width: 64,
            shard_size: 9496,
            num_shards: 16,
            vocab_size: 151_936,
        }
    }

    /// Tiny test shape for quick iteration
    pub fn tiny() -> Self {
        Self {
            hidden_dim: 64,
            context_length: 64,
            batch_width: 8,
            shard_size: 16,
            num_shards: 16,
            vocab_size: 256,
        }
    }

    pub fn presets() -> &'static [&'static str] {
        PRESETS
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "qwen3-0.6b" => Some(Self::qwen3_0_6b()),
            "tiny" => Some(Self::tiny()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("hidden_dim", self.hidden_dim),
            ("context_length", self.context_length),
            ("batch_width", self.batch_width),
            ("shard_size", self.shard_size),
            ("num_shards", self.num_shards),
            ("vocab_size", self.vocab_size),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{name} must be non-zero"
            )));
        }
        if self.num_shards * self.shard_size != self.vocab_size {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{} shards of {} do not cover vocab of {}",
                self.num_shards, self.shard_size, self.vocab_size
            )));
        }
        if self.batch_width > self.context_length {
            return Err(OrchestratorError::InvalidConfig(format!(
                "batch width {} exceeds context length {}",
                self.batch_width, self.context_length
            )));
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let blob = fs::read_to_string(path)
            .with_context(|| format!("failed to read model shape {}", path.display()))?;
        let shape: Self = serde_json::from_str(&blob)
            .with_context(|| format!("failed to parse model shape {}", path.display()))?;
        shape.validate()?;
        Ok(shape)
    }
}

/// Per-session generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub sampler: SamplerConfig,
    /// Sampling any of these ends the session; the stop token is not emitted.
    pub stop_tokens: Vec<Token>,
    /// Pads the final partial prefill window.
    pub filler_token: Token,
    pub max_new_tokens: Option<usize>,
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::Greedy,
            stop_tokens: Vec::new(),
            filler_token: 0,
            max_new_tokens: None,
            seed: 42,
        }
    }
}

impl GenerationConfig {
    pub fn greedy() -> Self {
        Self::default()
    }

    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_stop_tokens(mut self, stop_tokens: impl IntoIterator<Item = Token>) -> Self {
        self.stop_tokens = stop_tokens.into_iter().collect();
        self
    }

    pub fn with_filler_token(mut self, filler_token: Token) -> Self {
        self.filler_token = filler_token;
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = Some(max_new_tokens);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn is_stop_token(&self, token: Token) -> bool {
        self.stop_tokens.contains(&token)
    }

    /// Sampler errors are reported as `SamplerConfig`, everything else as
    /// `InvalidConfig`.
    pub fn validate(&self, shape: &ModelShape) -> Result<()> {
        self.sampler.validate()?;
        let vocab = shape.vocab_size;
        if self.filler_token as usize >= vocab {
            return Err(OrchestratorError::InvalidConfig(format!(
                "filler token {} outside vocab of {}",
                self.filler_token, vocab
            )));
        }
        if let Some(stop) = self.stop_tokens.iter().find(|t| **t as usize >= vocab) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "stop token {stop} outside vocab of {vocab}"
            )));
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let blob = fs::read_to_string(path)
            .with_context(|| format!("failed to read generation config {}", path.display()))?;
        serde_json::from_str(&blob)
            .with_context(|| format!("failed to parse generation config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for name in ModelShape::presets() {
            let shape = ModelShape::preset(name).expect("preset");
            shape.validate().expect("valid preset");
        }
        assert!(ModelShape::preset("gpt-5").is_none());
    }

    #[test]
    fn qwen_shards_cover_vocab() {
        let shape = ModelShape::qwen3_0_6b();
        assert_eq!(shape.num_shards * shape.shard_size, shape.vocab_size);
    }

    #[test]
    fn rejects_uneven_shards() {
        let shape = ModelShape {
            shard_size: 15,
            ..ModelShape::tiny()
        };
        assert!(matches!(
            shape.validate(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_batch_wider_than_context() {
        let shape = ModelShape {
            batch_width: 128,
            ..ModelShape::tiny()
        };
        assert!(shape.validate().is_err());
    }

    #[test]
    fn generation_config_checks_token_ranges() {
        let shape = ModelShape::tiny();
        assert!(GenerationConfig::greedy().validate(&shape).is_ok());
        assert!(GenerationConfig::greedy()
            .with_stop_tokens([300])
            .validate(&shape)
            .is_err());
        assert!(GenerationConfig::greedy()
            .with_filler_token(256)
            .validate(&shape)
            .is_err());
    }

    #[test]
    fn sampler_errors_keep_their_kind() {
        let config =
            GenerationConfig::greedy().with_sampler(SamplerConfig::Temperature { value: 0.0 });
        assert!(matches!(
            config.validate(&ModelShape::tiny()),
            Err(OrchestratorError::SamplerConfig(_))
        ));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: GenerationConfig =
            serde_json::from_str(r#"{"sampler": {"mode": "temperature", "value": 0.7}}"#).unwrap();
        assert_eq!(config.sampler, SamplerConfig::Temperature { value: 0.7 });
        assert_eq!(config.filler_token, 0);
        assert!(config.stop_tokens.is_empty());
    }

    #[test]
    fn shape_file_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shape.json");
        fs::write(&path, serde_json::to_string_pretty(&ModelShape::qwen3_0_6b())?)?;
        assert_eq!(ModelShape::from_json_file(&path)?, ModelShape::qwen3_0_6b());

        fs::write(
            &path,
            r#"{"hidden_dim": 8, "context_length": 8, "batch_width": 4,
                "shard_size": 3, "num_shards": 2, "vocab_size": 7}"#,
        )?;
        assert!(ModelShape::from_json_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn generation_file_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("generation.json");
        let config = GenerationConfig::greedy()
            .with_stop_tokens([2, 7])
            .with_max_new_tokens(16)
            .with_seed(5);
        fs::write(&path, serde_json::to_string(&config)?)?;
        assert_eq!(GenerationConfig::from_json_file(&path)?, config);

        fs::write(&path, r#"{"sampler": {"mode": "beam"}}"#)?;
        assert!(GenerationConfig::from_json_file(&path).is_err());
        Ok(())
    }
}
