use std::collections::BTreeMap;

use crate::error::AppError;
use tracing::{debug, error};

/// Parses `key=value` strings into an ordered map.
///
/// Each string is split at its first `=`, so values may themselves contain
/// `=`. A later duplicate key replaces the earlier value. An empty value is
/// kept; the engine skips empty metadata entries when writing the container.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` if a string has no `=` or an empty key.
///
/// # Examples
///
/// ```
/// use streamgrab::utils::parse_params;
///
/// let params = vec!["title=Evening show".to_string(), "artist=a=b".to_string()];
/// let parsed = parse_params(&params).unwrap();
/// assert_eq!(parsed["title"], "Evening show");
/// assert_eq!(parsed["artist"], "a=b");
/// ```
pub fn parse_params(params: &[String]) -> Result<BTreeMap<String, String>, AppError> {
    debug!("Parsing {} parameters", params.len());

    params
        .iter()
        .map(|param| match param.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                debug!("Added parameter: key='{key}', value='{value}'");
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => {
                error!("Invalid param format: {param}");
                Err(AppError::InvalidInput(format!(
                    "Invalid param format: {param} (expected key=value)"
                )))
            }
        })
        .collect()
}
