use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_distinct, count_star, exists};
use diesel::prelude::*;
use diesel::result::OptionalExtension;

use crate::db::pool::DbPool;
use crate::db::schema::{api_keys, events, memberships};
use crate::db::store::AnalyticsStore;
use crate::error::ApiError;
use crate::models::api_key::ApiKey;
use crate::models::event::{Event, OrgStats, ACTIVE_SESSION_WINDOW_MINS};

/// Postgres-backed store.
pub struct PgStore {
    db: DbPool,
}

impl PgStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn find_active_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, ApiError> {
        let mut conn = self.db.get().await?;
        let key = diesel_async::RunQueryDsl::get_result(
            api_keys::table
                .filter(api_keys::key_hash.eq(key_hash))
                .filter(api_keys::is_active.eq(true))
                .select(ApiKey::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(key)
    }

    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        let mut conn = self.db.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::update(api_keys::table.find(key_id)).set(api_keys::last_used.eq(Some(at))),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn insert_event(&self, event: Event) -> Result<Event, ApiError> {
        let mut conn = self.db.get().await?;
        let stored = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(events::table)
                .values(&event)
                .returning(Event::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(stored)
    }

    async fn is_member(&self, user_id: &str, org_id: &str) -> Result<bool, ApiError> {
        let mut conn = self.db.get().await?;
        let member: bool = diesel_async::RunQueryDsl::get_result(
            diesel::select(exists(
                memberships::table
                    .filter(memberships::user_id.eq(user_id))
                    .filter(memberships::org_id.eq(org_id)),
            )),
            &mut conn,
        )
        .await?;
        Ok(member)
    }

    async fn member_org_ids(&self, user_id: &str) -> Result<Vec<String>, ApiError> {
        let mut conn = self.db.get().await?;
        let org_ids: Vec<String> = diesel_async::RunQueryDsl::load(
            memberships::table
                .filter(memberships::user_id.eq(user_id))
                .select(memberships::org_id),
            &mut conn,
        )
        .await?;
        Ok(org_ids)
    }

    async fn org_stats(&self, org_id: &str, now: DateTime<Utc>) -> Result<OrgStats, ApiError> {
        let mut conn = self.db.get().await?;

        let total_events: i64 = diesel_async::RunQueryDsl::get_result(
            events::table
                .filter(events::org_id.eq(org_id))
                .select(count_star()),
            &mut conn,
        )
        .await?;

        let unique_visitors: i64 = diesel_async::RunQueryDsl::get_result(
            events::table
                .filter(events::org_id.eq(org_id))
                .filter(events::visitors_id.is_not_null())
                .select(count_distinct(events::visitors_id)),
            &mut conn,
        )
        .await?;

        let window_start = now - chrono::Duration::minutes(ACTIVE_SESSION_WINDOW_MINS);
        let active_sessions: i64 = diesel_async::RunQueryDsl::get_result(
            events::table
                .filter(events::org_id.eq(org_id))
                .filter(events::session_id.is_not_null())
                .filter(events::received_at.ge(window_start))
                .select(count_distinct(events::session_id)),
            &mut conn,
        )
        .await?;

        Ok(OrgStats {
            total_events,
            unique_visitors,
            active_sessions,
        })
    }
}
