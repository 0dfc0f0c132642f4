use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::db::schema::events;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, ToSchema)]
#[diesel(table_name = events)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub org_id: String,
    pub event_name: String,
    pub event_data: Option<Value>,
    pub visitors_id: Option<String>,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub received_at: DateTime<Utc>,
    pub client_timestamp: Option<DateTime<Utc>>,
}

/// Counters pushed as `stats_update` and served by the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrgStats {
    pub total_events: i64,
    pub unique_visitors: i64,
    /// Distinct sessions seen in the last [`ACTIVE_SESSION_WINDOW_MINS`] minutes.
    pub active_sessions: i64,
}

pub const ACTIVE_SESSION_WINDOW_MINS: i64 = 30;
