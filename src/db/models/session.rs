//! Analytics session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Other,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "Desktop",
            DeviceType::Mobile => "Mobile",
            DeviceType::Tablet => "Tablet",
            DeviceType::Other => "Other",
        }
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Other
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub screen_resolution: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<String>,
    pub device: Device,
    pub location: Location,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub page_views: u64,
    pub events: u64,
    pub is_engaged: bool,
    pub engagement_score: f64,
    pub conversions: u64,
    pub revenue: f64,
    pub entry_page: Option<String>,
    pub exit_page: Option<String>,
    pub traffic_source: Option<String>,
    pub traffic_medium: Option<String>,
    pub traffic_campaign: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Open a new session starting now.
    pub fn begin(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: None,
            device: Device::default(),
            location: Location::default(),
            start_time: now,
            end_time: None,
            page_views: 0,
            events: 0,
            is_engaged: false,
            engagement_score: 0.0,
            conversions: 0,
            revenue: 0.0,
            entry_page: None,
            exit_page: None,
            traffic_source: None,
            traffic_medium: None,
            traffic_campaign: None,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whole seconds between start and end, floored. An open session is
    /// measured against the current wall clock.
    pub fn duration_secs(&self) -> i64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_seconds()
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Validation functions for session data, applied before every write.
pub mod validation {
    use super::Session;
    use anyhow::{bail, Result};

    pub fn validate_session(session: &Session) -> Result<()> {
        if session.session_id.trim().is_empty() {
            bail!("session id is required");
        }
        if let Some(end_time) = session.end_time {
            if end_time < session.start_time {
                bail!("session end time precedes its start time");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_session_defaults() {
        let session = Session::begin("sess-1");
        assert_eq!(session.device.device_type, DeviceType::Other);
        assert_eq!(session.page_views, 0);
        assert_eq!(session.events, 0);
        assert!(!session.is_engaged);
        assert_eq!(session.engagement_score, 0.0);
        assert!(session.metadata.is_empty());
        assert!(!session.is_closed());
    }

    #[test]
    fn duration_of_closed_session_is_floored_and_stable() {
        let mut session = Session::begin("sess-2");
        session.start_time = Utc::now() - Duration::seconds(90);
        session.end_time = Some(session.start_time + Duration::milliseconds(61_700));
        assert_eq!(session.duration_secs(), 61);
        assert_eq!(session.duration_secs(), 61);
    }

    #[test]
    fn duration_of_open_session_tracks_the_clock() {
        let mut session = Session::begin("sess-3");
        session.start_time = Utc::now() - Duration::seconds(30);
        let first = session.duration_secs();
        assert!(first >= 30);
        assert!(session.duration_secs() >= first);
    }

    #[test]
    fn empty_session_id_is_rejected() {
        let session = Session::begin("   ");
        assert!(validation::validate_session(&session).is_err());
    }

    #[test]
    fn end_before_start_is_rejected() {
        let mut session = Session::begin("sess-4");
        session.end_time = Some(session.start_time - Duration::seconds(5));
        assert!(validation::validate_session(&session).is_err());
    }
}
