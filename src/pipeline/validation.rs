//! The data gate between collection and analysis.
//!
//! Unlike everything else in the pipeline this check does not degrade: a run
//! without identity, a live price, and some financials stops here.

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{LensError, Result, json_f64, json_is_present};

const PRICE_KEYS: &[&str] = &["price", "current_price", "latest_price", "close"];

const FINANCIAL_KEYS: &[&str] = &[
    "data",
    "income_statement",
    "balance_sheet",
    "cash_flow",
    "indicators",
];

/// Check the three essential sections and name every group that is missing
pub fn validate_essential_data(
    stock_code: &str,
    basic_info: &Value,
    realtime_data: &Value,
    financial_data: &Value,
) -> Result<()> {
    let mut missing = Vec::new();

    if !has_identity(basic_info) {
        missing.push("basic_info (stock_code, stock_name)".to_string());
    }
    if !has_price(realtime_data) {
        missing.push(format!("realtime_data (one of {})", PRICE_KEYS.join(", ")));
    }
    if !has_financials(financial_data) {
        missing.push(format!("financial_data (one of {})", FINANCIAL_KEYS.join(", ")));
    }

    if missing.is_empty() {
        debug!(stock_code, "Essential data present");
        Ok(())
    } else {
        warn!(stock_code, missing = ?missing, "Essential data missing");
        Err(LensError::EssentialDataMissing {
            stock_code: stock_code.to_string(),
            missing,
        })
    }
}

fn has_identity(basic_info: &Value) -> bool {
    ["stock_code", "stock_name"].iter().all(|key| {
        basic_info
            .get(key)
            .is_some_and(|v| (v.is_string() || v.is_number()) && json_is_present(v))
    })
}

fn has_price(realtime_data: &Value) -> bool {
    PRICE_KEYS
        .iter()
        .any(|key| json_f64(realtime_data, key).is_some_and(|p| p.is_finite()))
}

fn has_financials(financial_data: &Value) -> bool {
    match financial_data {
        Value::Object(_) => FINANCIAL_KEYS.iter().any(|key| {
            financial_data
                .get(key)
                .is_some_and(|v| (v.is_array() || v.is_object()) && json_is_present(v))
        }),
        Value::Array(rows) => !rows.is_empty(),
        _ => false,
    }
}
