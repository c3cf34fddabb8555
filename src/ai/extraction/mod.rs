//! Structured Extraction from Model Output
//!
//! Post-processing only: nothing here affects pipeline control flow. A
//! response that yields no fields still becomes a valid analyst result with
//! its prose kept as the analysis text.

mod json_repair;
mod parser;

pub use json_repair::{JsonRepairer, extract_json};
pub use parser::{ParsedAnalysis, ResponseParser};
