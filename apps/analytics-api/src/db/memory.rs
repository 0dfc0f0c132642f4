use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nexora_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;

use crate::auth::api_key::hash_api_key;
use crate::db::store::AnalyticsStore;
use crate::error::ApiError;
use crate::models::api_key::ApiKey;
use crate::models::event::{Event, OrgStats, ACTIVE_SESSION_WINDOW_MINS};
use crate::models::membership::Membership;
use crate::models::organization::Organization;

#[derive(Default)]
struct Tables {
    organizations: Vec<Organization>,
    memberships: Vec<Membership>,
    api_keys: Vec<ApiKey>,
    events: Vec<Event>,
}

/// In-memory store for local runs and tests. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_organization(&self, name: &str, slug: &str) -> Organization {
        let org = Organization {
            id: prefixed_ulid(prefix::ORGANIZATION),
            name: name.to_string(),
            slug: slug.to_string(),
            created_at: Utc::now(),
        };
        self.tables.lock().organizations.push(org.clone());
        org
    }

    pub fn add_member(&self, org_id: &str, user_id: &str, role: &str) {
        self.tables.lock().memberships.push(Membership {
            id: prefixed_ulid(prefix::MEMBERSHIP),
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
            role: role.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Register a raw API key for `org_id`; only its hash is kept.
    pub fn add_api_key(&self, org_id: &str, name: &str, raw_key: &str, active: bool) -> String {
        let id = prefixed_ulid(prefix::API_KEY);
        self.tables.lock().api_keys.push(ApiKey {
            id: id.clone(),
            org_id: org_id.to_string(),
            name: name.to_string(),
            key_hash: hash_api_key(raw_key),
            is_active: active,
            last_used: None,
            created_at: Utc::now(),
        });
        id
    }

    pub fn api_key_last_used(&self, key_id: &str) -> Option<DateTime<Utc>> {
        self.tables
            .lock()
            .api_keys
            .iter()
            .find(|k| k.id == key_id)
            .and_then(|k| k.last_used)
    }

    pub fn events_for(&self, org_id: &str) -> Vec<Event> {
        self.tables
            .lock()
            .events
            .iter()
            .filter(|e| e.org_id == org_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn find_active_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, ApiError> {
        Ok(self
            .tables
            .lock()
            .api_keys
            .iter()
            .find(|k| k.is_active && k.key_hash == key_hash)
            .cloned())
    }

    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        if let Some(key) = self
            .tables
            .lock()
            .api_keys
            .iter_mut()
            .find(|k| k.id == key_id)
        {
            key.last_used = Some(at);
        }
        Ok(())
    }

    async fn insert_event(&self, event: Event) -> Result<Event, ApiError> {
        let mut tables = self.tables.lock();
        if !tables.organizations.iter().any(|o| o.id == event.org_id) {
            return Err(ApiError::internal("Organization does not exist"));
        }
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn is_member(&self, user_id: &str, org_id: &str) -> Result<bool, ApiError> {
        Ok(self
            .tables
            .lock()
            .memberships
            .iter()
            .any(|m| m.user_id == user_id && m.org_id == org_id))
    }

    async fn member_org_ids(&self, user_id: &str) -> Result<Vec<String>, ApiError> {
        Ok(self
            .tables
            .lock()
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.org_id.clone())
            .collect())
    }

    async fn org_stats(&self, org_id: &str, now: DateTime<Utc>) -> Result<OrgStats, ApiError> {
        let tables = self.tables.lock();
        let window_start = now - chrono::Duration::minutes(ACTIVE_SESSION_WINDOW_MINS);

        let mut total_events = 0;
        let mut visitors = HashSet::new();
        let mut sessions = HashSet::new();
        for event in tables.events.iter().filter(|e| e.org_id == org_id) {
            total_events += 1;
            if let Some(v) = &event.visitors_id {
                visitors.insert(v.as_str());
            }
            if let Some(s) = &event.session_id {
                if event.received_at >= window_start {
                    sessions.insert(s.as_str());
                }
            }
        }

        Ok(OrgStats {
            total_events,
            unique_visitors: visitors.len() as i64,
            active_sessions: sessions.len() as i64,
        })
    }
}
