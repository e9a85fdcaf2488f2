//! Field validators
//!
//! The explicit registry of per-field check functions operations wire into
//! the pipeline's input/output validation stages.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").ok())
        .as_ref()
}

/// Value must be a parseable IP address
pub fn check_ip(value: &Value) -> Result<()> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::invalid_parameter(format!("ip address {} is not a string", value)))?;
    text.parse::<IpAddr>()
        .map_err(|_| Error::invalid_parameter(format!("ip address {} format incorrect", text)))?;
    Ok(())
}

/// Value must be a well-formed object name
pub fn check_name(value: &Value) -> Result<()> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::invalid_parameter(format!("name {} is not a string", value)))?;
    let pattern = name_pattern()
        .ok_or_else(|| Error::database_exception("name pattern failed to compile"))?;
    if !pattern.is_match(text) {
        return Err(Error::invalid_parameter(format!(
            "name {} does not match the pattern {}",
            text,
            pattern.as_str()
        )));
    }
    Ok(())
}

/// Value must be a number in 0..=100
pub fn check_percentage(value: &Value) -> Result<()> {
    let number = value
        .as_f64()
        .ok_or_else(|| Error::invalid_parameter(format!("percentage {} is not a number", value)))?;
    if !(0.0..=100.0).contains(&number) {
        return Err(Error::invalid_parameter(format!(
            "percentage {} out of range",
            number
        )));
    }
    Ok(())
}

/// Value must be a known lifecycle state name
pub fn check_state(value: &Value) -> Result<()> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::invalid_parameter(format!("state {} is not a string", value)))?;
    if crate::model::StateValue::parse(text).is_none() {
        return Err(Error::invalid_parameter(format!(
            "unknown state value {}",
            text
        )));
    }
    Ok(())
}

/// Value must be a JSON object (config blobs)
pub fn check_os_config(value: &Value) -> Result<()> {
    if !value.is_object() {
        return Err(Error::invalid_parameter(format!(
            "os config {} is not an object",
            value
        )));
    }
    Ok(())
}
