use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{
        parse_datetime, parse_device_type, parse_json_map, parse_optional_datetime, to_i64,
        to_json_string, to_u64,
    },
    models::{session::validation, Device, Location, Session},
};

const SESSION_COLUMNS: &str = "session_id, user_id, device_type, device_brand, device_model,
    device_os, device_os_version, device_browser, device_browser_version,
    device_screen_resolution, device_language, location_country, location_region,
    location_city, location_latitude, location_longitude, location_timezone,
    start_time, end_time, page_views, events, is_engaged, engagement_score,
    conversions, revenue, entry_page, exit_page, traffic_source, traffic_medium,
    traffic_campaign, metadata, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let device_type: String = row.get("device_type")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let metadata: String = row.get("metadata")?;
    let page_views: i64 = row.get("page_views")?;
    let events: i64 = row.get("events")?;
    let conversions: i64 = row.get("conversions")?;

    Ok(Session {
        session_id: row.get("session_id")?,
        user_id: row.get("user_id")?,
        device: Device {
            device_type: parse_device_type(&device_type)?,
            brand: row.get("device_brand")?,
            model: row.get("device_model")?,
            os: row.get("device_os")?,
            os_version: row.get("device_os_version")?,
            browser: row.get("device_browser")?,
            browser_version: row.get("device_browser_version")?,
            screen_resolution: row.get("device_screen_resolution")?,
            language: row.get("device_language")?,
        },
        location: Location {
            country: row.get("location_country")?,
            region: row.get("location_region")?,
            city: row.get("location_city")?,
            latitude: row.get("location_latitude")?,
            longitude: row.get("location_longitude")?,
            timezone: row.get("location_timezone")?,
        },
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        page_views: to_u64(page_views, "page_views")?,
        events: to_u64(events, "events")?,
        is_engaged: row.get("is_engaged")?,
        engagement_score: row.get("engagement_score")?,
        conversions: to_u64(conversions, "conversions")?,
        revenue: row.get("revenue")?,
        entry_page: row.get("entry_page")?,
        exit_page: row.get("exit_page")?,
        traffic_source: row.get("traffic_source")?,
        traffic_medium: row.get("traffic_medium")?,
        traffic_campaign: row.get("traffic_campaign")?,
        metadata: parse_json_map(&metadata, "metadata")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// Persist a new session. The session id is the primary key, so a second
    /// insert with the same id fails on the unique constraint.
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        validation::validate_session(session)?;

        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (
                    session_id, user_id, device_type, device_brand, device_model,
                    device_os, device_os_version, device_browser, device_browser_version,
                    device_screen_resolution, device_language, location_country,
                    location_region, location_city, location_latitude, location_longitude,
                    location_timezone, start_time, end_time, page_views, events,
                    is_engaged, engagement_score, conversions, revenue, entry_page,
                    exit_page, traffic_source, traffic_medium, traffic_campaign,
                    metadata, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28,
                          ?29, ?30, ?31, ?32, ?33)",
                params![
                    record.session_id,
                    record.user_id,
                    record.device.device_type.as_str(),
                    record.device.brand,
                    record.device.model,
                    record.device.os,
                    record.device.os_version,
                    record.device.browser,
                    record.device.browser_version,
                    record.device.screen_resolution,
                    record.device.language,
                    record.location.country,
                    record.location.region,
                    record.location.city,
                    record.location.latitude,
                    record.location.longitude,
                    record.location.timezone,
                    record.start_time.to_rfc3339(),
                    record.end_time.as_ref().map(|dt| dt.to_rfc3339()),
                    to_i64(record.page_views)?,
                    to_i64(record.events)?,
                    record.is_engaged,
                    record.engagement_score,
                    to_i64(record.conversions)?,
                    record.revenue,
                    record.entry_page,
                    record.exit_page,
                    record.traffic_source,
                    record.traffic_medium,
                    record.traffic_campaign,
                    to_json_string(&record.metadata, "metadata")?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to insert session {}", record.session_id))?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    /// Count a page view. The first view pins the entry page; every view
    /// moves the exit page.
    pub async fn record_page_view(&self, session_id: &str, page: &str) -> Result<()> {
        let session_id = session_id.to_string();
        let page = page.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET page_views = page_views + 1,
                     entry_page = COALESCE(entry_page, ?1),
                     exit_page = ?1,
                     updated_at = ?2
                 WHERE session_id = ?3",
                params![page, Utc::now().to_rfc3339(), session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session not found"));
            }

            Ok(())
        })
        .await
    }

    pub async fn record_session_event(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET events = events + 1,
                     updated_at = ?1
                 WHERE session_id = ?2",
                params![Utc::now().to_rfc3339(), session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session not found"));
            }

            Ok(())
        })
        .await
    }

    pub async fn record_session_conversion(&self, session_id: &str, revenue: f64) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET conversions = conversions + 1,
                     revenue = revenue + ?1,
                     updated_at = ?2
                 WHERE session_id = ?3",
                params![revenue, Utc::now().to_rfc3339(), session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session not found"));
            }

            Ok(())
        })
        .await
    }

    pub async fn update_engagement(
        &self,
        session_id: &str,
        is_engaged: bool,
        engagement_score: f64,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET is_engaged = ?1,
                     engagement_score = ?2,
                     updated_at = ?3
                 WHERE session_id = ?4",
                params![
                    is_engaged,
                    engagement_score,
                    Utc::now().to_rfc3339(),
                    session_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session not found"));
            }

            Ok(())
        })
        .await
    }

    /// Close a session. The duration accessor stops tracking the clock once
    /// the end time is set.
    pub async fn end_session(&self, session_id: &str, end_time: DateTime<Utc>) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET end_time = ?1,
                     updated_at = ?2
                 WHERE session_id = ?3",
                params![end_time.to_rfc3339(), Utc::now().to_rfc3339(), session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session not found"));
            }

            Ok(())
        })
        .await
    }

    /// Most recently started sessions first.
    pub async fn list_recent_sessions(&self, limit: usize, offset: usize) -> Result<Vec<Session>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 ORDER BY start_time DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;

            let mut rows = stmt.query(params![limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    /// A user's sessions, most recently started first.
    pub async fn list_sessions_for_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Session>> {
        let user_id = user_id.to_string();
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1
                 ORDER BY start_time DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;

            let mut rows = stmt.query(params![user_id, limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }
}
