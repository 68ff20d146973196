//! Process configuration (environment) and per-workspace policy sections
//! stored in the `settings` table.

use crate::db;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub log_format: LogFormat,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = get("SCHOOLD_LOG")
            .or_else(|| get("RUST_LOG"))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        let log_format = match get("SCHOOLD_LOG_FORMAT")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let workspace = get("SCHOOLD_WORKSPACE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        Self {
            log_filter,
            log_format,
            workspace,
        }
    }
}

pub trait PolicySection: Serialize + DeserializeOwned + Default {
    const KEY: &'static str;

    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct AttendancePolicy {
    /// Absence count at which a warning advisory is raised.
    pub warning_absences: i64,
    /// Absence count at which the subject score is forced to zero.
    pub penalty_absences: i64,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            warning_absences: 2,
            penalty_absences: 3,
        }
    }
}

impl PolicySection for AttendancePolicy {
    const KEY: &'static str = "setup.attendance";

    fn validate(&self) -> Result<(), String> {
        check_range("warningAbsences", self.warning_absences, 1, 20)?;
        check_range("penaltyAbsences", self.penalty_absences, 1, 20)?;
        if self.warning_absences > self.penalty_absences {
            return Err("warningAbsences must not exceed penaltyAbsences".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct QrPolicy {
    pub validity_minutes: i64,
}

impl Default for QrPolicy {
    fn default() -> Self {
        Self {
            validity_minutes: 2,
        }
    }
}

impl PolicySection for QrPolicy {
    const KEY: &'static str = "setup.qr";

    fn validate(&self) -> Result<(), String> {
        check_range("validityMinutes", self.validity_minutes, 1, 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct GradingPolicy {
    pub pass_mark: f64,
    pub at_risk_below: f64,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            pass_mark: 60.0,
            at_risk_below: 60.0,
        }
    }
}

impl PolicySection for GradingPolicy {
    const KEY: &'static str = "setup.grading";

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.pass_mark) {
            return Err("passMark must be in 0..=100".into());
        }
        if !(0.0..=100.0).contains(&self.at_risk_below) {
            return Err("atRiskBelow must be in 0..=100".into());
        }
        Ok(())
    }
}

fn check_range(key: &str, v: i64, min: i64, max: i64) -> Result<(), String> {
    if !(min..=max).contains(&v) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(())
}

/// Saved values merged over defaults. Historical values that no longer parse
/// fall back to the defaults so a bad row never blocks the ledgers.
pub fn load<P: PolicySection>(conn: &Connection) -> anyhow::Result<P> {
    let Some(saved) = db::settings_get_json(conn, P::KEY)? else {
        return Ok(P::default());
    };
    match serde_json::from_value::<P>(saved) {
        Ok(p) if p.validate().is_ok() => Ok(p),
        Ok(_) | Err(_) => {
            tracing::warn!(key = P::KEY, "ignoring invalid saved settings");
            Ok(P::default())
        }
    }
}

/// Applies a partial update and persists the merged section.
pub fn update<P: PolicySection>(
    conn: &Connection,
    patch: &Map<String, Value>,
) -> Result<P, UpdateError> {
    let current = load::<P>(conn).map_err(UpdateError::Storage)?;
    let mut merged = serde_json::to_value(current).map_err(|e| UpdateError::Storage(e.into()))?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
    }
    let next: P = serde_json::from_value(merged).map_err(|e| UpdateError::Invalid(e.to_string()))?;
    next.validate().map_err(UpdateError::Invalid)?;
    let value = serde_json::to_value(&next).map_err(|e| UpdateError::Storage(e.into()))?;
    db::settings_set_json(conn, P::KEY, &value).map_err(UpdateError::Storage)?;
    Ok(next)
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("invalid settings: {0}")]
    Invalid(String),
    #[error("settings storage failed: {0:#}")]
    Storage(anyhow::Error),
}
