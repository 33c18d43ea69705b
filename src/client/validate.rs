//! Local checks for well-known FRED parameters.
//!
//! Malformed values are rejected before a rate-limit slot is spent on a
//! request upstream would refuse anyway.

use chrono::NaiveDate;

use super::key::QueryParams;
use crate::{FredError, Result};

/// Parameters holding a `YYYY-MM-DD` calendar date.
pub const DATE_PARAMS: &[&str] = &[
    "observation_start",
    "observation_end",
    "realtime_start",
    "realtime_end",
];

/// A series id is non-empty ASCII letters, digits and underscores.
pub fn validate_series_id(series_id: &str) -> Result<()> {
    let valid = !series_id.is_empty()
        && series_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(FredError::InvalidInput(format!(
            "invalid series id '{series_id}'"
        )))
    }
}

/// A real calendar date in `YYYY-MM-DD` form.
pub fn validate_date(name: &str, value: &str) -> Result<()> {
    let well_formed = value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok();
    if well_formed {
        Ok(())
    } else {
        Err(FredError::InvalidInput(format!(
            "{name} must be a YYYY-MM-DD date, got '{value}'"
        )))
    }
}

/// Check every known parameter present in `params`.
pub fn validate_params(params: &QueryParams) -> Result<()> {
    for (name, value) in params.iter() {
        if name == "series_id" {
            validate_series_id(value)?;
        } else if DATE_PARAMS.contains(&name) {
            validate_date(name, value)?;
        }
    }
    Ok(())
}
