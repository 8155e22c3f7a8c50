use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::db::models::{DeviceType, ExperimentStatus};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_experiment_status(value: &str) -> Result<ExperimentStatus> {
    match value {
        "Draft" => Ok(ExperimentStatus::Draft),
        "Running" => Ok(ExperimentStatus::Running),
        "Paused" => Ok(ExperimentStatus::Paused),
        "Completed" => Ok(ExperimentStatus::Completed),
        "Stopped" => Ok(ExperimentStatus::Stopped),
        other => Err(anyhow!("unknown experiment status {other}")),
    }
}

pub fn parse_device_type(value: &str) -> Result<DeviceType> {
    match value {
        "Desktop" => Ok(DeviceType::Desktop),
        "Mobile" => Ok(DeviceType::Mobile),
        "Tablet" => Ok(DeviceType::Tablet),
        "Other" => Ok(DeviceType::Other),
        other => Err(anyhow!("unknown device type {other}")),
    }
}

pub fn parse_json(value: &str, field: &str) -> Result<Value> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_json_map(value: &str, field: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}

pub fn to_json_string<T: serde::Serialize>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to serialize {field}"))
}
