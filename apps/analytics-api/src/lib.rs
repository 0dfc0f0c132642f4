pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod user_agent;

use std::sync::Arc;

use config::Config;
use db::store::AnalyticsStore;
use realtime::Realtime;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AnalyticsStore>,
    pub config: Arc<Config>,
    pub realtime: Arc<Realtime>,
}
