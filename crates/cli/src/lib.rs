//! CLI wiring for kvforge: run generation sessions against the reference
//! backend and inspect model presets.

pub mod cli;
pub mod tokenizer;
