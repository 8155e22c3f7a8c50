//! Experiment data models.
//!
//! An `Experiment` owns its `Variation`s outright: they are written and
//! loaded with the parent and have no lifecycle of their own. The optional
//! `ExperimentResults` summary is produced by an external analysis process
//! and stored verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "Draft",
            ExperimentStatus::Running => "Running",
            ExperimentStatus::Paused => "Paused",
            ExperimentStatus::Completed => "Completed",
            ExperimentStatus::Stopped => "Stopped",
        }
    }
}

impl Default for ExperimentStatus {
    fn default() -> Self {
        ExperimentStatus::Draft
    }
}

/// One targeting rule of the audience filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudienceRule {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub configuration: Value,
    pub weight: f64,
    pub participants: u64,
    pub conversions: u64,
    pub revenue: f64,
    pub metrics: Map<String, Value>,
}

impl Variation {
    pub fn new(name: impl Into<String>, configuration: Value) -> Self {
        Self {
            id: format!("var_{}", Uuid::new_v4()),
            name: name.into(),
            description: None,
            configuration,
            weight: 0.5,
            participants: 0,
            conversions: 0,
            revenue: 0.0,
            metrics: Map::new(),
        }
    }

    /// Conversions per hundred participants. Zero when nobody has been
    /// exposed yet, so an empty arm never divides by zero.
    pub fn conversion_rate(&self) -> f64 {
        if self.participants == 0 {
            0.0
        } else {
            self.conversions as f64 / self.participants as f64 * 100.0
        }
    }
}

/// Per-metric comparison of one variation against control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricComparison {
    pub metric: String,
    pub control_value: f64,
    pub variation_value: f64,
    pub improvement: f64,
    pub confidence: f64,
    pub significant: bool,
}

/// Analysis summary attached once an external process has evaluated the
/// experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResults {
    pub winner: Option<String>,
    pub confidence: Option<f64>,
    pub significant: bool,
    pub metric_comparisons: Vec<MetricComparison>,
    pub recommendations: Vec<String>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub hypothesis: String,
    pub metrics: Vec<String>,
    pub primary_metric: Option<String>,
    pub significance_level: f64,
    pub minimum_detectable_effect: f64,
    pub minimum_sample_size: Option<u64>,
    pub status: ExperimentStatus,
    pub winner: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub audience_rules: Vec<AudienceRule>,
    pub rollout_percentage: f64,
    pub variations: Vec<Variation>,
    pub results: Option<ExperimentResults>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Create a draft experiment with the schema defaults applied.
    /// The name is stored trimmed.
    pub fn new(
        name: impl Into<String>,
        hypothesis: impl Into<String>,
        created_by: impl Into<String>,
        start_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("exp_{}", Uuid::new_v4()),
            name: name.into().trim().to_string(),
            description: None,
            hypothesis: hypothesis.into(),
            metrics: Vec::new(),
            primary_metric: None,
            significance_level: 0.95,
            minimum_detectable_effect: 0.05,
            minimum_sample_size: None,
            status: ExperimentStatus::Draft,
            winner: None,
            start_date,
            end_date: None,
            audience_rules: Vec::new(),
            rollout_percentage: 100.0,
            variations: Vec::new(),
            results: None,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Validation functions for experiment data, applied before every write.
pub mod validation {
    use super::Experiment;
    use anyhow::{bail, Result};

    pub const MIN_SIGNIFICANCE_LEVEL: f64 = 0.80;
    pub const MAX_SIGNIFICANCE_LEVEL: f64 = 0.99;

    pub fn validate_significance_level(level: f64) -> Result<()> {
        if !(MIN_SIGNIFICANCE_LEVEL..=MAX_SIGNIFICANCE_LEVEL).contains(&level) {
            bail!(
                "significance level {level} must be between {MIN_SIGNIFICANCE_LEVEL} and {MAX_SIGNIFICANCE_LEVEL}"
            );
        }
        Ok(())
    }

    pub fn validate_weight(weight: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&weight) {
            bail!("variation weight {weight} must be between 0 and 1");
        }
        Ok(())
    }

    pub fn validate_rollout_percentage(percentage: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&percentage) {
            bail!("rollout percentage {percentage} must be between 0 and 100");
        }
        Ok(())
    }

    pub fn validate_experiment(experiment: &Experiment) -> Result<()> {
        if experiment.name.trim().is_empty() {
            bail!("experiment name is required");
        }
        if experiment.hypothesis.trim().is_empty() {
            bail!("experiment hypothesis is required");
        }
        if experiment.created_by.trim().is_empty() {
            bail!("experiment creator is required");
        }

        validate_significance_level(experiment.significance_level)?;
        validate_rollout_percentage(experiment.rollout_percentage)?;

        for variation in &experiment.variations {
            if variation.name.trim().is_empty() {
                bail!("variation name is required");
            }
            if variation.configuration.is_null() {
                bail!("variation '{}' requires a configuration payload", variation.name);
            }
            validate_weight(variation.weight)?;
        }

        if let Some(winner) = &experiment.winner {
            if !experiment.variations.iter().any(|v| &v.id == winner) {
                bail!("winner '{winner}' does not match any variation");
            }
        }

        Ok(())
    }
}
