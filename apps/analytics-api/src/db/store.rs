use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ApiError;
use crate::models::api_key::ApiKey;
use crate::models::event::{Event, OrgStats};

/// Persistence used by the ingestion and dashboard routes.
///
/// Backed by Postgres in production and an in-memory store in tests.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Look up an active API key by the SHA-256 hex digest of its raw value.
    async fn find_active_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, ApiError>;

    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), ApiError>;

    /// Store an event and return the committed row.
    async fn insert_event(&self, event: Event) -> Result<Event, ApiError>;

    async fn is_member(&self, user_id: &str, org_id: &str) -> Result<bool, ApiError>;

    /// Every organization `user_id` belongs to.
    async fn member_org_ids(&self, user_id: &str) -> Result<Vec<String>, ApiError>;

    async fn org_stats(&self, org_id: &str, now: DateTime<Utc>) -> Result<OrgStats, ApiError>;
}
