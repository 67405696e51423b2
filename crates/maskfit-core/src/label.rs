//! Label normalization for heterogeneous pass/fail representations.
//!
//! Fit-test exports encode outcomes as booleans, 0/1 numerics, or free-form
//! string tokens depending on the collection tool. Everything funnels through
//! [`normalize`] before training; anything unrecognizable stays `None` rather
//! than defaulting to either class.

use crate::types::FitLabel;

const PASS_TOKENS: [&str; 6] = ["true", "1", "pass", "passed", "yes", "y"];
const FAIL_TOKENS: [&str; 6] = ["false", "0", "fail", "failed", "no", "n"];

/// Normalize a loose pass/fail signal into a [`FitLabel`].
///
/// Recognizes booleans, exact 0/1 numerics, and a fixed case-insensitive
/// token vocabulary. Returns `None` for everything else, including JSON null
/// and out-of-range numbers.
#[must_use]
pub fn normalize(value: &serde_json::Value) -> Option<FitLabel> {
    match value {
        serde_json::Value::Bool(true) => Some(FitLabel::Pass),
        serde_json::Value::Bool(false) => Some(FitLabel::Fail),
        serde_json::Value::Number(n) => {
            let v = n.as_f64()?;
            if v == 1.0 {
                Some(FitLabel::Pass)
            } else if v == 0.0 {
                Some(FitLabel::Fail)
            } else {
                None
            }
        }
        serde_json::Value::String(s) => normalize_token(s),
        _ => None,
    }
}

/// Normalize a string token on its own.
#[must_use]
pub fn normalize_token(raw: &str) -> Option<FitLabel> {
    let token = raw.trim().to_ascii_lowercase();
    if PASS_TOKENS.contains(&token.as_str()) {
        Some(FitLabel::Pass)
    } else if FAIL_TOKENS.contains(&token.as_str()) {
        Some(FitLabel::Fail)
    } else {
        None
    }
}
