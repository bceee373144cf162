//! Dashboard (`spec.md` §6 "Dashboard"/ambient operability surface).
//!
//! A read-only `warp` server exposing `/`, `/stats` and `/health`, grounded
//! in the route layout of
//! `examples/original_source/pixieveil/dashboard/server.py::Dashboard` and in
//! `warp`'s `serve(...).bind_with_graceful_shutdown(...)` builder. No query
//! routes are carried over — DICOMweb QIDO/WADO is an explicit Non-goal
//! (`spec.md` §1); this module only reports counters.

use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;
use warp::Filter;

use crate::storage::StorageManager;

#[derive(Serialize)]
struct StatsResponse {
    server_status: &'static str,
    counters: crate::counters::Counters,
    studies: StudiesSummary,
}

#[derive(Serialize)]
struct StudiesSummary {
    in_progress: usize,
    completed: u64,
    total: u64,
}

const INDEX_HTML: &str = include_str!("../assets/dashboard_index.html");

pub struct Dashboard {
    storage: Arc<StorageManager>,
    ip: String,
    port: u16,
}

impl Dashboard {
    pub fn new(storage: Arc<StorageManager>, ip: String, port: u16) -> Self {
        Dashboard { storage, ip, port }
    }

    /// Runs the dashboard until `shutdown` fires (`spec.md` §5 "Cancellation").
    pub async fn run(&self, shutdown: tokio::sync::watch::Receiver<bool>) {
        let storage = self.storage.clone();

        let index_route = warp::path::end()
            .and(warp::get())
            .map(|| warp::reply::html(INDEX_HTML));

        let stats_storage = storage.clone();
        let stats_route = warp::path("stats")
            .and(warp::get())
            .and(warp::any().map(move || stats_storage.clone()))
            .and_then(handle_stats);

        let health_route = warp::path("health")
            .and(warp::get())
            .map(|| warp::reply::json(&json!({"status": "ok"})));

        let routes = index_route.or(stats_route).or(health_route);

        let ip: std::net::IpAddr = self.ip.parse().unwrap_or_else(|_| "0.0.0.0".parse().unwrap());
        let mut shutdown = shutdown;
        let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown((ip, self.port), async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        });

        info!(%addr, "dashboard listening");
        server.await;
        info!("dashboard stopped");
    }
}

async fn handle_stats(storage: Arc<StorageManager>) -> Result<impl warp::Reply, Infallible> {
    let counters = storage.get_counters();
    let in_progress = storage.snapshot_studies().len();
    let completed = counters.completed_studies;
    let response = StatsResponse {
        server_status: "running",
        studies: StudiesSummary {
            in_progress,
            completed,
            total: completed + in_progress as u64,
        },
        counters,
    };
    Ok(warp::reply::json(&response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RemoteStorageConfig, Settings, StorageConfig};

    fn test_settings(base: &std::path::Path, temp: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.storage = Some(StorageConfig {
            base_path: base.to_string_lossy().to_string(),
            temp_path: temp.to_string_lossy().to_string(),
            remote_storage: RemoteStorageConfig::default(),
        });
        settings
    }

    #[tokio::test]
    async fn stats_handler_reports_zero_studies_for_a_fresh_manager() {
        let base = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let storage = Arc::new(StorageManager::new(&test_settings(base.path(), temp.path())));

        let reply = handle_stats(storage).await.unwrap();
        let response = warp::reply::Reply::into_response(reply);
        assert_eq!(response.status(), warp::http::StatusCode::OK);
    }
}
