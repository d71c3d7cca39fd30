//! Numeric precision at the backend boundary.
//!
//! Orchestration always exchanges `f32` tensors. A backend that computes in
//! half precision rounds each tensor through its storage type on the way in
//! and out.

use half::{bf16, f16};
use ndarray::{ArrayBase, DataMut, Dimension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    F32,
    F16,
    BF16,
}

impl DataType {
    /// Rounds a single value through this storage type.
    pub fn round(&self, value: f32) -> f32 {
        match self {
            DataType::F32 => value,
            DataType::F16 => f16::from_f32(value).to_f32(),
            DataType::BF16 => bf16::from_f32(value).to_f32(),
        }
    }

    /// Rounds every element of `array` through this storage type.
    pub fn cast_inplace<S, D>(&self, array: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        if *self == DataType::F32 {
            return;
        }
        let dtype = *self;
        array.mapv_inplace(|v| dtype.round(v));
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
        };
        f.write_str(name)
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(DataType::F32),
            "f16" | "float16" => Ok(DataType::F16),
            "bf16" | "bfloat16" => Ok(DataType::BF16),
            other => anyhow::bail!("unknown data type '{}'", other),
        }
    }
}
