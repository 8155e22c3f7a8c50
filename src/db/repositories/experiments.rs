use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{
        parse_datetime, parse_experiment_status, parse_json, parse_json_map,
        parse_optional_datetime, to_i64, to_json_string, to_u64,
    },
    models::{experiment::validation, Experiment, ExperimentResults, ExperimentStatus, Variation},
};

const EXPERIMENT_COLUMNS: &str = "id, name, description, hypothesis, metrics, primary_metric,
    significance_level, minimum_detectable_effect, minimum_sample_size, status,
    winner_variation_id, start_date, end_date, audience_rules, rollout_percentage,
    results, created_by, created_at, updated_at";

fn row_to_experiment(row: &Row) -> Result<Experiment> {
    let metrics: String = row.get("metrics")?;
    let audience_rules: String = row.get("audience_rules")?;
    let results: Option<String> = row.get("results")?;
    let status: String = row.get("status")?;
    let start_date: String = row.get("start_date")?;
    let end_date: Option<String> = row.get("end_date")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let minimum_sample_size: Option<i64> = row.get("minimum_sample_size")?;

    Ok(Experiment {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        hypothesis: row.get("hypothesis")?,
        metrics: serde_json::from_str(&metrics)?,
        primary_metric: row.get("primary_metric")?,
        significance_level: row.get("significance_level")?,
        minimum_detectable_effect: row.get("minimum_detectable_effect")?,
        minimum_sample_size: minimum_sample_size
            .map(|v| to_u64(v, "minimum_sample_size"))
            .transpose()?,
        status: parse_experiment_status(&status)?,
        winner: row.get("winner_variation_id")?,
        start_date: parse_datetime(&start_date, "start_date")?,
        end_date: parse_optional_datetime(end_date, "end_date")?,
        audience_rules: serde_json::from_str(&audience_rules)?,
        rollout_percentage: row.get("rollout_percentage")?,
        variations: Vec::new(),
        results: results
            .map(|raw| serde_json::from_str::<ExperimentResults>(&raw))
            .transpose()?,
        created_by: row.get("created_by")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn row_to_variation(row: &Row) -> Result<Variation> {
    let configuration: String = row.get("configuration")?;
    let metrics: String = row.get("metrics")?;
    let participants: i64 = row.get("participants")?;
    let conversions: i64 = row.get("conversions")?;

    Ok(Variation {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        configuration: parse_json(&configuration, "configuration")?,
        weight: row.get("weight")?,
        participants: to_u64(participants, "participants")?,
        conversions: to_u64(conversions, "conversions")?,
        revenue: row.get("revenue")?,
        metrics: parse_json_map(&metrics, "metrics")?,
    })
}

fn load_variations(conn: &Connection, experiment_id: &str) -> Result<Vec<Variation>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, configuration, weight, participants, conversions, revenue, metrics
         FROM variations
         WHERE experiment_id = ?1
         ORDER BY position ASC",
    )?;

    let mut rows = stmt.query(params![experiment_id])?;
    let mut variations = Vec::new();
    while let Some(row) = rows.next()? {
        variations.push(row_to_variation(row)?);
    }

    Ok(variations)
}

impl Database {
    /// Persist an experiment and its variations in one transaction.
    /// Validation rejects out-of-bounds values before anything is written.
    pub async fn insert_experiment(&self, experiment: &Experiment) -> Result<()> {
        validation::validate_experiment(experiment)?;

        let record = experiment.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO experiments (
                    id, name, description, hypothesis, metrics, primary_metric,
                    significance_level, minimum_detectable_effect, minimum_sample_size,
                    status, winner_variation_id, start_date, end_date, audience_rules,
                    rollout_percentage, results, created_by, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    record.id,
                    record.name.trim(),
                    record.description,
                    record.hypothesis,
                    to_json_string(&record.metrics, "metrics")?,
                    record.primary_metric,
                    record.significance_level,
                    record.minimum_detectable_effect,
                    record
                        .minimum_sample_size
                        .map(to_i64)
                        .transpose()?,
                    record.status.as_str(),
                    record.winner,
                    record.start_date.to_rfc3339(),
                    record.end_date.as_ref().map(|dt| dt.to_rfc3339()),
                    to_json_string(&record.audience_rules, "audience_rules")?,
                    record.rollout_percentage,
                    record
                        .results
                        .as_ref()
                        .map(|r| to_json_string(r, "results"))
                        .transpose()?,
                    record.created_by,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;

            for (position, variation) in record.variations.iter().enumerate() {
                tx.execute(
                    "INSERT INTO variations (
                        id, experiment_id, position, name, description, configuration,
                        weight, participants, conversions, revenue, metrics
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        variation.id,
                        record.id,
                        position as i64,
                        variation.name,
                        variation.description,
                        to_json_string(&variation.configuration, "configuration")?,
                        variation.weight,
                        to_i64(variation.participants)?,
                        to_i64(variation.conversions)?,
                        variation.revenue,
                        to_json_string(&variation.metrics, "metrics")?,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Load an experiment with its variations in position order.
    pub async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>> {
        let experiment_id = experiment_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![experiment_id])?;
            let experiment = match rows.next()? {
                Some(row) => {
                    let mut experiment = row_to_experiment(row)?;
                    experiment.variations = load_variations(conn, &experiment.id)?;
                    Some(experiment)
                }
                None => None,
            };

            Ok(experiment)
        })
        .await
    }

    /// List experiments in one lifecycle state, ordered by start date.
    pub async fn list_experiments_by_status(
        &self,
        status: ExperimentStatus,
    ) -> Result<Vec<Experiment>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPERIMENT_COLUMNS} FROM experiments
                 WHERE status = ?1
                 ORDER BY start_date ASC"
            ))?;

            let mut rows = stmt.query(params![status.as_str()])?;
            let mut experiments = Vec::new();
            while let Some(row) = rows.next()? {
                experiments.push(row_to_experiment(row)?);
            }

            for experiment in &mut experiments {
                experiment.variations = load_variations(conn, &experiment.id)?;
            }

            Ok(experiments)
        })
        .await
    }

    /// List a creator's experiments, most recently created first.
    pub async fn list_experiments_for_creator(
        &self,
        created_by: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Experiment>> {
        let created_by = created_by.to_string();
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPERIMENT_COLUMNS} FROM experiments
                 WHERE created_by = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;

            let mut rows = stmt.query(params![created_by, limit, offset])?;
            let mut experiments = Vec::new();
            while let Some(row) = rows.next()? {
                experiments.push(row_to_experiment(row)?);
            }

            for experiment in &mut experiments {
                experiment.variations = load_variations(conn, &experiment.id)?;
            }

            Ok(experiments)
        })
        .await
    }

    /// Move an experiment to a new lifecycle state. Transition rules live
    /// with the caller; Completed/Stopped transitions usually carry the end
    /// date.
    pub async fn update_experiment_status(
        &self,
        experiment_id: &str,
        status: ExperimentStatus,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let experiment_id = experiment_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE experiments
                 SET status = ?1,
                     end_date = COALESCE(?2, end_date),
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    end_date.map(|dt| dt.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                    experiment_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Experiment not found"));
            }

            Ok(())
        })
        .await
    }

    /// Count one exposed participant against a variation.
    pub async fn record_participant(
        &self,
        experiment_id: &str,
        variation_id: &str,
    ) -> Result<()> {
        let experiment_id = experiment_id.to_string();
        let variation_id = variation_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE variations
                 SET participants = participants + 1
                 WHERE id = ?1 AND experiment_id = ?2",
                params![variation_id, experiment_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Variation not found"));
            }

            conn.execute(
                "UPDATE experiments SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), experiment_id],
            )?;

            Ok(())
        })
        .await
    }

    /// Count one conversion against a variation, accumulating its revenue.
    pub async fn record_variation_conversion(
        &self,
        experiment_id: &str,
        variation_id: &str,
        revenue: f64,
    ) -> Result<()> {
        let experiment_id = experiment_id.to_string();
        let variation_id = variation_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE variations
                 SET conversions = conversions + 1,
                     revenue = revenue + ?1
                 WHERE id = ?2 AND experiment_id = ?3",
                params![revenue, variation_id, experiment_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Variation not found"));
            }

            conn.execute(
                "UPDATE experiments SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), experiment_id],
            )?;

            Ok(())
        })
        .await
    }

    /// Store an analysis summary. The summary's winner is mirrored into the
    /// top-level winner column so the two never disagree.
    pub async fn record_results(
        &self,
        experiment_id: &str,
        results: &ExperimentResults,
    ) -> Result<()> {
        let experiment_id = experiment_id.to_string();
        let results = results.clone();
        self.execute(move |conn| {
            if let Some(winner) = &results.winner {
                let exists: Option<String> = conn
                    .query_row(
                        "SELECT id FROM variations WHERE id = ?1 AND experiment_id = ?2",
                        params![winner, experiment_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                if exists.is_none() {
                    return Err(anyhow!("Winner does not match any variation"));
                }
            }

            let rows_affected = conn.execute(
                "UPDATE experiments
                 SET results = ?1,
                     winner_variation_id = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    to_json_string(&results, "results")?,
                    results.winner,
                    Utc::now().to_rfc3339(),
                    experiment_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Experiment not found"));
            }

            Ok(())
        })
        .await
    }

    /// Declare a winner directly, without an attached results summary.
    pub async fn set_winner(&self, experiment_id: &str, variation_id: &str) -> Result<()> {
        let experiment_id = experiment_id.to_string();
        let variation_id = variation_id.to_string();
        self.execute(move |conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM variations WHERE id = ?1 AND experiment_id = ?2",
                    params![variation_id, experiment_id],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_none() {
                return Err(anyhow!("Variation not found"));
            }

            conn.execute(
                "UPDATE experiments
                 SET winner_variation_id = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![variation_id, Utc::now().to_rfc3339(), experiment_id],
            )?;

            Ok(())
        })
        .await
    }

    /// Delete an experiment. Variations go with it via ON DELETE CASCADE.
    pub async fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment_id = experiment_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM experiments WHERE id = ?1",
                params![experiment_id],
            )?;
            Ok(())
        })
        .await
    }
}
