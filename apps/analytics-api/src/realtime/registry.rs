//! Per-organization registry of live subscriber connections.
//!
//! The registry is the only owner of `Connection` values. Fan-out clones the
//! `Arc` handles of one organization out of the shard lock and sends after the
//! lock is released, so a slow or failing subscriber never extends the time
//! other writers wait on that shard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nexora_common::id::{prefix, prefixed_ulid};
use serde::Serialize;
use utoipa::ToSchema;

use super::channel::SubscriptionChannel;
use super::message::{BroadcastMessage, Frame};
use super::{RealtimeError, SendError};

/// Connections idle longer than this are evicted by the stale sweep.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub type ConnectionId = String;

/// One live subscriber.
pub struct Connection {
    pub id: ConnectionId,
    pub org_id: String,
    pub connected_at: DateTime<Utc>,
    /// Milliseconds since the Unix epoch of the last successful send.
    last_activity_ms: AtomicI64,
    channel: Box<dyn SubscriptionChannel>,
}

impl Connection {
    fn new(id: ConnectionId, org_id: String, channel: Box<dyn SubscriptionChannel>) -> Self {
        let now = Utc::now();
        Self {
            id,
            org_id,
            connected_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            channel,
        }
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    /// Push a frame and record activity on success.
    fn deliver(&self, frame: &Frame) -> Result<(), SendError> {
        self.channel.send(frame)?;
        self.last_activity_ms
            .fetch_max(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.last_activity_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }
}

type OrgConnections = HashMap<ConnectionId, Arc<Connection>>;

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    fn record(&mut self, result: Result<(), SendError>) {
        self.attempted += 1;
        match result {
            Ok(()) => self.delivered += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_orgs: usize,
    pub total_connections: usize,
    pub connections_by_org: HashMap<String, usize>,
}

/// Process-wide map from organization id to its live connections.
pub struct ConnectionRegistry {
    orgs: DashMap<String, OrgConnections>,
    /// Set by `shutdown`; no connection is accepted afterwards.
    closed: AtomicBool,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            orgs: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a subscriber for `org_id` and return its fresh connection id.
    pub fn add_connection(
        &self,
        org_id: &str,
        channel: Box<dyn SubscriptionChannel>,
    ) -> Result<ConnectionId, RealtimeError> {
        if org_id.trim().is_empty() {
            return Err(RealtimeError::InvalidOrgId);
        }
        if self.is_closed() {
            return Err(RealtimeError::ShuttingDown);
        }

        let connection_id = prefixed_ulid(prefix::CONNECTION);
        let connection = Arc::new(Connection::new(
            connection_id.clone(),
            org_id.to_string(),
            channel,
        ));

        self.orgs
            .entry(org_id.to_string())
            .or_default()
            .insert(connection_id.clone(), connection);

        // A shutdown that cleared the map while we were inserting must not
        // leave this connection behind.
        if self.is_closed() {
            self.remove_connection(org_id, &connection_id);
            return Err(RealtimeError::ShuttingDown);
        }

        tracing::info!(conn_id = %connection_id, %org_id, "realtime connection added");
        self.log_stats();

        Ok(connection_id)
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn remove_connection(&self, org_id: &str, connection_id: &str) {
        let removed = match self.orgs.get_mut(org_id) {
            Some(mut set) => set.remove(connection_id).is_some(),
            None => return,
        };

        if removed {
            tracing::info!(conn_id = %connection_id, %org_id, "realtime connection removed");
        }

        // The guard above must be released before `remove_if` takes the shard lock.
        if self.orgs.remove_if(org_id, |_, set| set.is_empty()).is_some() {
            tracing::debug!(%org_id, "no connections left, organization dropped from registry");
        }

        self.log_stats();
    }

    /// Whether `connection_id` is currently registered under `org_id`.
    pub fn contains(&self, org_id: &str, connection_id: &str) -> bool {
        self.orgs
            .get(org_id)
            .is_some_and(|set| set.contains_key(connection_id))
    }

    /// Push `message` to every connection of `org_id`.
    ///
    /// Failures are logged and counted; the failing connection stays
    /// registered until it is closed or swept.
    pub fn broadcast(&self, org_id: &str, message: &BroadcastMessage) -> DeliveryReport {
        let targets = self.snapshot_org(org_id);
        if targets.is_empty() {
            tracing::debug!(%org_id, "broadcast skipped, no subscribers");
            return DeliveryReport::default();
        }

        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(?err, %org_id, "failed to serialize broadcast message");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        for conn in &targets {
            let result = conn.deliver(&frame);
            if let Err(err) = &result {
                tracing::warn!(conn_id = %conn.id, %org_id, %err, "broadcast send failed");
            }
            report.record(result);
        }

        tracing::debug!(
            %org_id,
            kind = ?message.kind,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }

    /// Send `message` to a single connection.
    pub fn send_to(
        &self,
        org_id: &str,
        connection_id: &str,
        message: &BroadcastMessage,
    ) -> Result<(), SendError> {
        let conn = self
            .orgs
            .get(org_id)
            .and_then(|set| set.get(connection_id).cloned())
            .ok_or(SendError::UnknownConnection)?;
        let frame = message.to_frame().map_err(SendError::Serialize)?;
        conn.deliver(&frame)
    }

    /// Ping every registered connection across all organizations.
    pub fn send_keep_alive_ping(&self) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let targets = self.snapshot_all();
        if targets.is_empty() {
            return report;
        }

        let frame = match BroadcastMessage::ping().to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(?err, "failed to serialize keep-alive ping");
                return report;
            }
        };

        for conn in &targets {
            let result = conn.deliver(&frame);
            if let Err(err) = &result {
                tracing::debug!(conn_id = %conn.id, org_id = %conn.org_id, %err, "keep-alive send failed");
            }
            report.record(result);
        }

        tracing::info!(
            sent = report.delivered,
            failed = report.failed,
            "keep-alive ping"
        );
        report
    }

    /// Evict connections idle for longer than `timeout`. Returns the number removed.
    pub fn cleanup_stale_connections(&self, timeout: Duration) -> usize {
        self.cleanup_stale_connections_at(Utc::now(), timeout)
    }

    /// Same as [`cleanup_stale_connections`](Self::cleanup_stale_connections)
    /// with an explicit clock reading.
    pub fn cleanup_stale_connections_at(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let now_ms = now.timestamp_millis();
        let mut cleaned = 0;

        self.orgs.retain(|org_id, set| {
            set.retain(|conn_id, conn| {
                let idle_ms = now_ms.saturating_sub(conn.last_activity_ms());
                if idle_ms > timeout_ms {
                    tracing::info!(conn_id = %conn_id, %org_id, idle_ms, "stale connection evicted");
                    cleaned += 1;
                    false
                } else {
                    true
                }
            });
            !set.is_empty()
        });

        if cleaned > 0 {
            tracing::info!(cleaned, "stale connection sweep complete");
            self.log_stats();
        }
        cleaned
    }

    /// Read-only occupancy snapshot.
    pub fn get_connection_stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.orgs.iter() {
            let count = entry.value().len();
            if count == 0 {
                continue;
            }
            stats.total_orgs += 1;
            stats.total_connections += count;
            stats.connections_by_org.insert(entry.key().clone(), count);
        }
        stats
    }

    /// Notify every connection that the process is going away, then forget
    /// them all. Returns how many connections were cleared.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let targets = self.snapshot_all();
        match BroadcastMessage::shutdown().to_frame() {
            Ok(frame) => {
                for conn in &targets {
                    let _ = conn.channel.send(&frame);
                }
            }
            Err(err) => tracing::error!(?err, "failed to serialize shutdown notice"),
        }

        self.orgs.clear();
        targets.len()
    }

    /// Whether `shutdown` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn snapshot_org(&self, org_id: &str) -> Vec<Arc<Connection>> {
        self.orgs
            .get(org_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    fn snapshot_all(&self) -> Vec<Arc<Connection>> {
        self.orgs
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn connection(&self, org_id: &str, connection_id: &str) -> Option<Arc<Connection>> {
        self.orgs
            .get(org_id)
            .and_then(|set| set.get(connection_id).cloned())
    }

    fn log_stats(&self) {
        let stats = self.get_connection_stats();
        tracing::info!(
            connections = stats.total_connections,
            orgs = stats.total_orgs,
            "realtime registry"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::Value;

    use super::*;
    use crate::realtime::test_support::{FailingChannel, RecordingChannel};

    fn event_message(id: &str) -> BroadcastMessage {
        BroadcastMessage::new_event(serde_json::json!({ "id": id }))
    }

    #[test]
    fn broadcast_reaches_every_connection_once() {
        let registry = ConnectionRegistry::new();
        let (c1, seen1) = RecordingChannel::new();
        let (c2, seen2) = RecordingChannel::new();
        registry.add_connection("acme", Box::new(c1)).unwrap();
        registry.add_connection("acme", Box::new(c2)).unwrap();

        let msg = event_message("e1");
        let report = registry.broadcast("acme", &msg);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);

        let expected = msg.to_frame().unwrap();
        for seen in [&seen1, &seen2] {
            let frames = seen.lock();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].as_str(), expected.as_str());
            let v: Value = serde_json::from_str(frames[0].as_str()).unwrap();
            assert_eq!(v["type"], "new_event");
            assert_eq!(v["payload"]["id"], "e1");
        }
    }

    #[test]
    fn broadcast_serializes_once_per_call() {
        let registry = ConnectionRegistry::new();
        let (c1, seen1) = RecordingChannel::new();
        let (c2, seen2) = RecordingChannel::new();
        registry.add_connection("acme", Box::new(c1)).unwrap();
        registry.add_connection("acme", Box::new(c2)).unwrap();

        registry.broadcast("acme", &event_message("e1"));
        let a = seen1.lock()[0].clone();
        let b = seen2.lock()[0].clone();
        assert!(a.shares_buffer(&b));
    }

    #[test]
    fn broadcast_only_targets_the_given_org() {
        let registry = ConnectionRegistry::new();
        let (c1, seen1) = RecordingChannel::new();
        let (c2, seen2) = RecordingChannel::new();
        registry.add_connection("acme", Box::new(c1)).unwrap();
        registry.add_connection("globex", Box::new(c2)).unwrap();

        registry.broadcast("acme", &event_message("e1"));
        assert_eq!(seen1.lock().len(), 1);
        assert!(seen2.lock().is_empty());
    }

    #[test]
    fn failing_connection_does_not_block_others() {
        let registry = ConnectionRegistry::new();
        let (bad, bad_attempts) = FailingChannel::new();
        let (good, seen) = RecordingChannel::new();
        registry.add_connection("acme", Box::new(bad)).unwrap();
        registry.add_connection("acme", Box::new(good)).unwrap();

        let report = registry.broadcast("acme", &event_message("e1"));
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(bad_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn broadcast_to_empty_org_is_a_noop() {
        let registry = ConnectionRegistry::new();
        let report = registry.broadcast("nobody", &event_message("e1"));
        assert_eq!(report, DeliveryReport::default());
    }

    #[test]
    fn removed_connection_receives_nothing() {
        let registry = ConnectionRegistry::new();
        let (c1, seen) = RecordingChannel::new();
        let id = registry.add_connection("acme", Box::new(c1)).unwrap();
        registry.remove_connection("acme", &id);

        let report = registry.broadcast("acme", &event_message("e1"));
        assert_eq!(report.attempted, 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn failed_sends_keep_connection_registered() {
        let registry = ConnectionRegistry::new();
        let (bad, attempts) = FailingChannel::new();
        let id = registry.add_connection("acme", Box::new(bad)).unwrap();

        registry.broadcast("acme", &event_message("e1"));
        registry.broadcast("acme", &event_message("e2"));

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(registry.contains("acme", &id));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = RecordingChannel::new();
        let (c2, _) = RecordingChannel::new();
        let id1 = registry.add_connection("acme", Box::new(c1)).unwrap();
        let id2 = registry.add_connection("acme", Box::new(c2)).unwrap();

        registry.remove_connection("acme", &id1);
        registry.remove_connection("acme", &id1);
        registry.remove_connection("acme", "conn_never_registered");
        registry.remove_connection("unknown-org", &id2);

        assert!(registry.contains("acme", &id2));
        assert_eq!(registry.get_connection_stats().total_connections, 1);
    }

    #[test]
    fn last_removal_drops_the_org_entry() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = RecordingChannel::new();
        let id = registry.add_connection("acme", Box::new(c1)).unwrap();
        registry.remove_connection("acme", &id);

        let stats = registry.get_connection_stats();
        assert_eq!(stats.total_orgs, 0);
        assert!(!stats.connections_by_org.contains_key("acme"));
        assert!(registry.orgs.get("acme").is_none());
    }

    #[test]
    fn add_rejects_blank_org() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = RecordingChannel::new();
        let err = registry.add_connection("  ", Box::new(c1)).unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidOrgId));
        assert_eq!(registry.get_connection_stats(), RegistryStats::default());
    }

    #[test]
    fn stale_connections_are_evicted() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = RecordingChannel::new();
        let id = registry.add_connection("acme", Box::new(c1)).unwrap();

        let later = Utc::now() + chrono::Duration::minutes(6);
        let cleaned = registry.cleanup_stale_connections_at(later, DEFAULT_STALE_TIMEOUT);

        assert_eq!(cleaned, 1);
        assert!(!registry.contains("acme", &id));
        assert_eq!(registry.get_connection_stats().total_orgs, 0);
    }

    #[test]
    fn recently_active_connections_are_kept() {
        let registry = ConnectionRegistry::new();
        let (stale, _) = RecordingChannel::new();
        let (fresh, _) = RecordingChannel::new();
        let stale_id = registry.add_connection("acme", Box::new(stale)).unwrap();
        let fresh_id = registry.add_connection("acme", Box::new(fresh)).unwrap();

        registry
            .connection("acme", &stale_id)
            .unwrap()
            .set_last_activity(Utc::now() - chrono::Duration::minutes(10));

        let cleaned = registry.cleanup_stale_connections(DEFAULT_STALE_TIMEOUT);
        assert_eq!(cleaned, 1);
        assert!(!registry.contains("acme", &stale_id));
        assert!(registry.contains("acme", &fresh_id));
    }

    #[test]
    fn successful_send_refreshes_activity() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = RecordingChannel::new();
        let id = registry.add_connection("acme", Box::new(c1)).unwrap();
        let conn = registry.connection("acme", &id).unwrap();
        let old = Utc::now() - chrono::Duration::minutes(10);
        conn.set_last_activity(old);

        registry.broadcast("acme", &event_message("e1"));
        assert!(conn.last_activity_ms() > old.timestamp_millis());
        assert_eq!(registry.cleanup_stale_connections(DEFAULT_STALE_TIMEOUT), 0);
    }

    #[test]
    fn failed_send_does_not_refresh_activity() {
        let registry = ConnectionRegistry::new();
        let (bad, _) = FailingChannel::new();
        let id = registry.add_connection("acme", Box::new(bad)).unwrap();
        let conn = registry.connection("acme", &id).unwrap();
        let old = Utc::now() - chrono::Duration::minutes(10);
        conn.set_last_activity(old);

        registry.broadcast("acme", &event_message("e1"));
        assert_eq!(conn.last_activity_ms(), old.timestamp_millis());
    }

    #[test]
    fn keep_alive_counts_across_orgs() {
        let registry = ConnectionRegistry::new();
        let (c1, seen1) = RecordingChannel::new();
        let (c2, seen2) = RecordingChannel::new();
        let (bad, _) = FailingChannel::new();
        registry.add_connection("acme", Box::new(c1)).unwrap();
        registry.add_connection("globex", Box::new(c2)).unwrap();
        registry.add_connection("globex", Box::new(bad)).unwrap();

        let report = registry.send_keep_alive_ping();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);

        let v: Value = serde_json::from_str(seen1.lock()[0].as_str()).unwrap();
        assert_eq!(v["type"], "ping");
        assert_eq!(seen2.lock().len(), 1);
    }

    #[test]
    fn stats_reflect_registrations() {
        let registry = ConnectionRegistry::new();
        for org in ["acme", "acme", "globex"] {
            let (c, _) = RecordingChannel::new();
            registry.add_connection(org, Box::new(c)).unwrap();
        }

        let stats = registry.get_connection_stats();
        assert_eq!(stats.total_orgs, 2);
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.connections_by_org["acme"], 2);
        assert_eq!(stats.connections_by_org["globex"], 1);
    }

    #[test]
    fn send_to_unknown_connection_fails() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .send_to("acme", "conn_missing", &BroadcastMessage::ping())
            .unwrap_err();
        assert!(matches!(err, SendError::UnknownConnection));
    }

    #[test]
    fn shutdown_notifies_and_clears() {
        let registry = ConnectionRegistry::new();
        let (c1, seen1) = RecordingChannel::new();
        let (c2, seen2) = RecordingChannel::new();
        let (bad, _) = FailingChannel::new();
        registry.add_connection("acme", Box::new(c1)).unwrap();
        registry.add_connection("globex", Box::new(c2)).unwrap();
        registry.add_connection("globex", Box::new(bad)).unwrap();

        assert_eq!(registry.shutdown(), 3);
        assert_eq!(registry.get_connection_stats(), RegistryStats::default());

        for seen in [&seen1, &seen2] {
            let v: Value = serde_json::from_str(seen.lock()[0].as_str()).unwrap();
            assert_eq!(v["type"], "shutdown");
        }
    }

    #[test]
    fn add_after_shutdown_is_refused() {
        let registry = ConnectionRegistry::new();
        registry.shutdown();
        assert!(registry.is_closed());

        let (channel, seen) = RecordingChannel::new();
        let err = registry.add_connection("acme", Box::new(channel)).unwrap_err();
        assert!(matches!(err, RealtimeError::ShuttingDown));
        assert_eq!(registry.get_connection_stats(), RegistryStats::default());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn adds_racing_shutdown_never_survive_it() {
        let registry = Arc::new(ConnectionRegistry::new());
        let adders: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (c, _) = RecordingChannel::new();
                        let _ = registry.add_connection("acme", Box::new(c));
                    }
                })
            })
            .collect();

        registry.shutdown();
        for adder in adders {
            adder.join().unwrap();
        }

        assert_eq!(registry.get_connection_stats(), RegistryStats::default());
    }

    #[test]
    fn ids_are_unique_under_concurrent_adds() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let (c, _) = RecordingChannel::new();
                            registry.add_connection("acme", Box::new(c)).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id), "duplicate connection id");
            }
        }
        assert_eq!(ids.len(), 400);
        assert_eq!(registry.get_connection_stats().total_connections, 400);
    }

    #[test]
    fn concurrent_churn_and_broadcast_stay_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let (c, _) = RecordingChannel::new();
                        let id = registry.add_connection("acme", Box::new(c)).unwrap();
                        registry.remove_connection("acme", &id);
                    }
                })
            })
            .collect();
        let reader = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    registry.broadcast("acme", &event_message(&format!("e{i}")));
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(registry.get_connection_stats(), RegistryStats::default());
    }
}
