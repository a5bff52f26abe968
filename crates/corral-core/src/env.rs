//! `KEY=value` environment lists.
//!
//! Lists are ordered. When a key repeats, the last value wins but the key
//! keeps the position of its first occurrence, so merged output stays
//! stable across calls.

use crate::error::{CoreError, Result};
use std::collections::HashMap;

/// Check that every entry has the form `KEY=value` with a non-empty key.
pub fn validate_env(entries: &[String]) -> Result<()> {
    for entry in entries {
        match entry.split_once('=') {
            Some((key, _)) if !key.is_empty() => {}
            _ => {
                return Err(CoreError::Validation(format!(
                    "malformed environment entry {entry:?}, expected KEY=value"
                )))
            }
        }
    }
    Ok(())
}

/// Merge `overrides` onto `base`. Entries in `overrides` win.
///
/// Entries must already be validated; malformed ones are dropped.
pub fn merge_env(base: &[String], overrides: &[String]) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut values: HashMap<&str, &str> = HashMap::new();

    for entry in base.iter().chain(overrides) {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        if values.insert(key, value).is_none() {
            order.push(key);
        }
    }

    order
        .into_iter()
        .map(|key| format!("{}={}", key, values[key]))
        .collect()
}
