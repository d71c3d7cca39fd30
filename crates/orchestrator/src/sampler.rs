//! Sampling policies turning an assembled logits vector into a token id.

use crate::error::{OrchestratorError, Result};
use crate::tensor::Token;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Recognised sampling configurations.
///
/// Serialized with a `mode` tag, e.g. `{"mode": "temperature", "value": 0.8}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplerConfig {
    #[default]
    Greedy,
    Temperature { value: f32 },
    TopK { k: usize, temperature: f32 },
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        match *self {
            SamplerConfig::Greedy => Ok(()),
            SamplerConfig::Temperature { value } => check_temperature(value),
            SamplerConfig::TopK { k, temperature } => {
                if k == 0 {
                    return Err(OrchestratorError::SamplerConfig(
                        "top-k requires k >= 1".to_string(),
                    ));
                }
                check_temperature(temperature)
            }
        }
    }

    /// Builds the policy with its own random source.
    pub fn build(self, seed: u64) -> Result<LogitsSampler> {
        self.validate()?;
        Ok(LogitsSampler {
            config: self,
            rng: fastrand::Rng::with_seed(seed),
        })
    }
}

fn check_temperature(value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(OrchestratorError::SamplerConfig(format!(
            "temperature must be a positive finite number, got {value}"
        )))
    }
}

/// A pluggable policy consuming one finished logits vector per call.
pub trait Sampler {
    fn choose(&mut self, logits: ArrayView1<'_, f32>) -> Result<Token>;
}

/// The built-in policies, seeded for reproducibility.
#[derive(Debug, Clone)]
pub struct LogitsSampler {
    config: SamplerConfig,
    rng: fastrand::Rng,
}

impl LogitsSampler {
    pub fn config(&self) -> SamplerConfig {
        self.config
    }
}

impl Sampler for LogitsSampler {
    fn choose(&mut self, logits: ArrayView1<'_, f32>) -> Result<Token> {
        choose(logits, &self.config, &mut self.rng)
    }
}

/// Applies `config` to `logits`, drawing from `rng` when the policy is
/// stochastic.
pub fn choose(
    logits: ArrayView1<'_, f32>,
    config: &SamplerConfig,
    rng: &mut fastrand::Rng,
) -> Result<Token> {
    config.validate()?;
    if logits.is_empty() {
        return Err(OrchestratorError::shape("sampler", "non-empty logits", "[0]"));
    }

    let index = match *config {
        SamplerConfig::Greedy => argmax(logits),
        SamplerConfig::Temperature { value } => {
            let candidates: Vec<(usize, f32)> = logits.iter().copied().enumerate().collect();
            sample_scaled(&candidates, value, rng)
        }
        SamplerConfig::TopK { k, temperature } => {
            let mut candidates: Vec<(usize, f32)> = logits
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, v)| !v.is_nan())
                .collect();
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            candidates.truncate(k);
            sample_scaled(&candidates, temperature, rng)
        }
    };
    Token::try_from(index)
        .map_err(|_| OrchestratorError::shape("sampler", "token id within u32", index))
}

/// Index of the largest logit; the first one wins ties and NaN never wins.
pub fn argmax(logits: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &value) in logits.iter().enumerate() {
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}

/// Softmax over `candidates` at `temperature`, then one categorical draw.
///
/// Scaled values that overflow to `+inf` take all the mass; the first such
/// candidate wins. With no finite or infinite maximum the first candidate
/// is returned.
fn sample_scaled(
    candidates: &[(usize, f32)],
    temperature: f32,
    rng: &mut fastrand::Rng,
) -> usize {
    let fallback = candidates.first().map(|(idx, _)| *idx).unwrap_or(0);
    let scaled: Vec<f32> = candidates.iter().map(|(_, v)| *v / temperature).collect();
    let max = scaled
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f32::NEG_INFINITY, f32::max);
    if max == f32::INFINITY {
        return candidates
            .iter()
            .zip(&scaled)
            .find(|(_, v)| **v == f32::INFINITY)
            .map(|((idx, _), _)| *idx)
            .unwrap_or(fallback);
    }
    if !max.is_finite() {
        return fallback;
    }

    let weights: Vec<f32> = scaled
        .iter()
        .map(|v| {
            let w = (v - max).exp();
            if w.is_nan() {
                0.0
            } else {
                w
            }
        })
        .collect();
    let total: f32 = weights.iter().sum();

    let target = rng.f32() * total;
    let mut cumsum = 0.0;
    for ((idx, _), w) in candidates.iter().zip(&weights) {
        cumsum += w;
        if target < cumsum {
            return *idx;
        }
    }
    // Rounding can leave `target` just above the running sum.
    candidates
        .iter()
        .zip(&weights)
        .rev()
        .find(|(_, w)| **w > 0.0)
        .map(|((idx, _), _)| *idx)
        .unwrap_or(fallback)
}
