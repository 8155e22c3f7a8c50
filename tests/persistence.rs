use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use splitlab::models::{
    Experiment, ExperimentResults, ExperimentStatus, MetricComparison, Session, Variation,
};
use splitlab::Database;

fn open_database() -> Result<(TempDir, Database)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let db = Database::new(dir.path().join("splitlab.sqlite3"))?;
    Ok((dir, db))
}

fn sample_experiment() -> Experiment {
    let mut experiment = Experiment::new(
        "Checkout CTA color",
        "A green CTA lifts checkout conversion",
        "user-42",
        Utc::now(),
    );
    experiment.metrics = vec!["conversion".to_string(), "revenue".to_string()];
    experiment.primary_metric = Some("conversion".to_string());
    experiment
        .variations
        .push(Variation::new("control", json!({"cta": "blue"})));
    experiment
        .variations
        .push(Variation::new("treatment", json!({"cta": "green"})));
    experiment
}

#[tokio::test]
async fn experiment_round_trips_with_variations() -> Result<()> {
    let (_dir, db) = open_database()?;

    let experiment = sample_experiment();
    db.insert_experiment(&experiment).await?;

    let loaded = db
        .get_experiment(&experiment.id)
        .await?
        .expect("experiment should exist");

    assert_eq!(loaded.name, "Checkout CTA color");
    assert_eq!(loaded.status, ExperimentStatus::Draft);
    assert_eq!(loaded.significance_level, 0.95);
    assert_eq!(loaded.rollout_percentage, 100.0);
    assert_eq!(loaded.variations.len(), 2);
    assert_eq!(loaded.variations[0].name, "control");
    assert_eq!(loaded.variations[1].name, "treatment");
    assert_eq!(loaded.variations[0].weight, 0.5);
    assert_eq!(loaded.variations[1].configuration, json!({"cta": "green"}));
    assert!(loaded.results.is_none());

    Ok(())
}

#[tokio::test]
async fn out_of_bounds_significance_level_is_rejected() -> Result<()> {
    let (_dir, db) = open_database()?;

    let mut experiment = sample_experiment();
    experiment.significance_level = 0.5;

    assert!(db.insert_experiment(&experiment).await.is_err());
    assert!(db.get_experiment(&experiment.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn variation_counters_accumulate() -> Result<()> {
    let (_dir, db) = open_database()?;

    let experiment = sample_experiment();
    let treatment_id = experiment.variations[1].id.clone();
    db.insert_experiment(&experiment).await?;

    for _ in 0..4 {
        db.record_participant(&experiment.id, &treatment_id).await?;
    }
    db.record_variation_conversion(&experiment.id, &treatment_id, 19.99)
        .await?;

    let loaded = db.get_experiment(&experiment.id).await?.unwrap();
    let treatment = &loaded.variations[1];
    assert_eq!(treatment.participants, 4);
    assert_eq!(treatment.conversions, 1);
    assert_eq!(treatment.revenue, 19.99);
    assert_eq!(treatment.conversion_rate(), 25.0);

    let control = &loaded.variations[0];
    assert_eq!(control.participants, 0);
    assert_eq!(control.conversion_rate(), 0.0);

    Ok(())
}

#[tokio::test]
async fn recording_against_unknown_variation_fails() -> Result<()> {
    let (_dir, db) = open_database()?;

    let experiment = sample_experiment();
    db.insert_experiment(&experiment).await?;

    assert!(db
        .record_participant(&experiment.id, "var_unknown")
        .await
        .is_err());

    Ok(())
}

#[tokio::test]
async fn status_transition_stamps_end_date() -> Result<()> {
    let (_dir, db) = open_database()?;

    let experiment = sample_experiment();
    db.insert_experiment(&experiment).await?;

    db.update_experiment_status(&experiment.id, ExperimentStatus::Running, None)
        .await?;
    let running = db.get_experiment(&experiment.id).await?.unwrap();
    assert_eq!(running.status, ExperimentStatus::Running);
    assert!(running.end_date.is_none());

    let ended_at = Utc::now();
    db.update_experiment_status(&experiment.id, ExperimentStatus::Completed, Some(ended_at))
        .await?;
    let completed = db.get_experiment(&experiment.id).await?.unwrap();
    assert_eq!(completed.status, ExperimentStatus::Completed);
    assert!(completed.end_date.is_some());

    Ok(())
}

#[tokio::test]
async fn results_mirror_winner_into_top_level_column() -> Result<()> {
    let (_dir, db) = open_database()?;

    let experiment = sample_experiment();
    let winner_id = experiment.variations[1].id.clone();
    db.insert_experiment(&experiment).await?;

    let results = ExperimentResults {
        winner: Some(winner_id.clone()),
        confidence: Some(0.97),
        significant: true,
        metric_comparisons: vec![MetricComparison {
            metric: "conversion".to_string(),
            control_value: 3.1,
            variation_value: 4.2,
            improvement: 35.5,
            confidence: 0.97,
            significant: true,
        }],
        recommendations: vec!["Ship the green CTA".to_string()],
        insights: vec!["Mobile drove most of the lift".to_string()],
    };
    db.record_results(&experiment.id, &results).await?;

    let loaded = db.get_experiment(&experiment.id).await?.unwrap();
    assert_eq!(loaded.winner.as_deref(), Some(winner_id.as_str()));
    assert_eq!(loaded.results, Some(results));

    Ok(())
}

#[tokio::test]
async fn listing_experiments_uses_index_order() -> Result<()> {
    let (_dir, db) = open_database()?;

    let mut earlier = sample_experiment();
    earlier.start_date = Utc::now() - Duration::days(7);
    let mut later = sample_experiment();
    later.start_date = Utc::now() - Duration::days(1);

    db.insert_experiment(&later).await?;
    db.insert_experiment(&earlier).await?;
    db.update_experiment_status(&earlier.id, ExperimentStatus::Running, None)
        .await?;
    db.update_experiment_status(&later.id, ExperimentStatus::Running, None)
        .await?;

    let running = db.list_experiments_by_status(ExperimentStatus::Running).await?;
    assert_eq!(running.len(), 2);
    assert_eq!(running[0].id, earlier.id);
    assert_eq!(running[1].id, later.id);
    assert!(db
        .list_experiments_by_status(ExperimentStatus::Draft)
        .await?
        .is_empty());

    let mine = db.list_experiments_for_creator("user-42", 10, 0).await?;
    assert_eq!(mine.len(), 2);
    assert!(db
        .list_experiments_for_creator("someone-else", 10, 0)
        .await?
        .is_empty());

    Ok(())
}

#[tokio::test]
async fn deleting_an_experiment_cascades_to_variations() -> Result<()> {
    let (_dir, db) = open_database()?;

    let experiment = sample_experiment();
    let variation_id = experiment.variations[0].id.clone();
    db.insert_experiment(&experiment).await?;

    db.delete_experiment(&experiment.id).await?;

    assert!(db.get_experiment(&experiment.id).await?.is_none());
    assert!(db
        .record_participant(&experiment.id, &variation_id)
        .await
        .is_err());

    Ok(())
}

#[tokio::test]
async fn session_round_trips_with_defaults() -> Result<()> {
    let (_dir, db) = open_database()?;

    let mut session = Session::begin("sess-abc");
    session.user_id = Some("user-42".to_string());
    session.traffic_source = Some("newsletter".to_string());
    session
        .metadata
        .insert("abVariant".to_string(), json!("treatment"));
    db.insert_session(&session).await?;

    let loaded = db.get_session("sess-abc").await?.expect("session exists");
    assert_eq!(loaded.user_id.as_deref(), Some("user-42"));
    assert_eq!(loaded.device.device_type.as_str(), "Other");
    assert_eq!(loaded.page_views, 0);
    assert_eq!(loaded.events, 0);
    assert!(!loaded.is_engaged);
    assert_eq!(loaded.metadata.get("abVariant"), Some(&json!("treatment")));
    assert!(loaded.end_time.is_none());

    Ok(())
}

#[tokio::test]
async fn duplicate_session_id_is_rejected() -> Result<()> {
    let (_dir, db) = open_database()?;

    let session = Session::begin("sess-dup");
    db.insert_session(&session).await?;

    let second = Session::begin("sess-dup");
    assert!(db.insert_session(&second).await.is_err());

    Ok(())
}

#[tokio::test]
async fn session_accrues_activity_and_closes() -> Result<()> {
    let (_dir, db) = open_database()?;

    let session = Session::begin("sess-activity");
    db.insert_session(&session).await?;

    db.record_page_view("sess-activity", "/landing").await?;
    db.record_page_view("sess-activity", "/pricing").await?;
    db.record_session_event("sess-activity").await?;
    db.record_session_conversion("sess-activity", 49.0).await?;
    db.update_engagement("sess-activity", true, 0.82).await?;

    let end_time = session.start_time + Duration::seconds(125);
    db.end_session("sess-activity", end_time).await?;

    let loaded = db.get_session("sess-activity").await?.unwrap();
    assert_eq!(loaded.page_views, 2);
    assert_eq!(loaded.entry_page.as_deref(), Some("/landing"));
    assert_eq!(loaded.exit_page.as_deref(), Some("/pricing"));
    assert_eq!(loaded.events, 1);
    assert_eq!(loaded.conversions, 1);
    assert_eq!(loaded.revenue, 49.0);
    assert!(loaded.is_engaged);
    assert_eq!(loaded.engagement_score, 0.82);
    assert!(loaded.is_closed());
    assert_eq!(loaded.duration_secs(), 125);

    Ok(())
}

#[tokio::test]
async fn mutating_an_unknown_session_fails() -> Result<()> {
    let (_dir, db) = open_database()?;

    assert!(db.record_page_view("missing", "/").await.is_err());
    assert!(db.record_session_event("missing").await.is_err());
    assert!(db.end_session("missing", Utc::now()).await.is_err());

    Ok(())
}

#[tokio::test]
async fn session_listings_are_most_recent_first() -> Result<()> {
    let (_dir, db) = open_database()?;

    let mut old = Session::begin("sess-old");
    old.start_time = Utc::now() - Duration::hours(5);
    old.user_id = Some("user-42".to_string());

    let mut fresh = Session::begin("sess-fresh");
    fresh.start_time = Utc::now() - Duration::minutes(2);
    fresh.user_id = Some("user-42".to_string());

    let mut other = Session::begin("sess-other");
    other.start_time = Utc::now() - Duration::hours(1);
    other.user_id = Some("user-7".to_string());

    db.insert_session(&old).await?;
    db.insert_session(&fresh).await?;
    db.insert_session(&other).await?;

    let recent = db.list_recent_sessions(10, 0).await?;
    assert_eq!(
        recent.iter().map(|s| s.session_id.as_str()).collect::<Vec<_>>(),
        vec!["sess-fresh", "sess-other", "sess-old"],
    );

    let for_user = db.list_sessions_for_user("user-42", 10, 0).await?;
    assert_eq!(
        for_user.iter().map(|s| s.session_id.as_str()).collect::<Vec<_>>(),
        vec!["sess-fresh", "sess-old"],
    );

    let paged = db.list_recent_sessions(1, 1).await?;
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].session_id, "sess-other");

    Ok(())
}
