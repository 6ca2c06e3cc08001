//! Read-only website monitor backed by a snapshot file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BackendServer, WEBSITE_MONITOR};

/// Snapshot file, relative to the task root.
pub(crate) const SNAPSHOT_FILE: &str = "website_monitor.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub server_id: String,
    pub name: String,
    /// `"up"`, `"degraded"` or `"down"`.
    pub status: String,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default, skip_serializing)]
    pub error_logs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLoadSample {
    pub page_url: String,
    pub time_window: String,
    pub avg_load_ms: f64,
}

/// On-disk format of [`SNAPSHOT_FILE`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub services: Vec<ServiceStatus>,
    /// Free-form summaries keyed by time window, e.g. `"last_24_hours"`.
    #[serde(default)]
    pub performance: BTreeMap<String, Value>,
    #[serde(default)]
    pub page_load_times: Vec<PageLoadSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall: String,
    pub services: Vec<ServiceStatus>,
}

pub struct WebsiteMonitor {
    snapshot: MonitorSnapshot,
    source: PathBuf,
}

impl WebsiteMonitor {
    pub fn load(path: PathBuf) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("cannot read monitor snapshot {}", path.display()))?;
        let snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("malformed monitor snapshot {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot, path))
    }

    pub fn from_snapshot(snapshot: MonitorSnapshot, source: PathBuf) -> Self {
        Self { snapshot, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn services(&self) -> &[ServiceStatus] {
        &self.snapshot.services
    }

    pub fn health(&self) -> HealthReport {
        let healthy = self.snapshot.services.iter().all(|s| s.status == "up");
        HealthReport {
            overall: if healthy { "healthy" } else { "degraded" }.to_string(),
            services: self.snapshot.services.clone(),
        }
    }

    /// The last `lines` error log lines of one service.
    pub fn error_logs(&self, server_id: &str, lines: usize) -> Result<Vec<String>> {
        let service = self
            .snapshot
            .services
            .iter()
            .find(|s| s.server_id == server_id)
            .ok_or_else(|| anyhow::anyhow!("unknown server_id '{server_id}'"))?;
        let skip = service.error_logs.len().saturating_sub(lines);
        Ok(service.error_logs[skip..].to_vec())
    }

    pub fn performance(&self, time_window: &str) -> Result<Value> {
        match self.snapshot.performance.get(time_window) {
            Some(summary) => Ok(summary.clone()),
            None => bail!(
                "no performance data for '{time_window}' (available: {})",
                self.snapshot.performance.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
    }

    pub fn historical_load_times(&self, time_window: &str, page_url: Option<&str>) -> Vec<PageLoadSample> {
        self.snapshot
            .page_load_times
            .iter()
            .filter(|s| s.time_window == time_window)
            .filter(|s| page_url.is_none_or(|url| s.page_url == url))
            .cloned()
            .collect()
    }
}

impl BackendServer for WebsiteMonitor {
    fn name(&self) -> &'static str {
        WEBSITE_MONITOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SNAPSHOT: &str = r#"{
        "services": [
            {"server_id": "web-1", "name": "Storefront", "status": "up", "cpu_percent": 41.5,
             "error_logs": ["e1", "e2", "e3"]},
            {"server_id": "db-1", "name": "Orders DB", "status": "degraded"}
        ],
        "performance": {"last_24_hours": {"requests": 1200, "p95_ms": 840}},
        "page_load_times": [
            {"page_url": "/", "time_window": "last_7_days", "avg_load_ms": 900.0},
            {"page_url": "/checkout", "time_window": "last_7_days", "avg_load_ms": 2100.0},
            {"page_url": "/", "time_window": "last_30_days", "avg_load_ms": 750.0}
        ]
    }"#;

    fn monitor() -> (TempDir, WebsiteMonitor) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        fs::write(&path, SNAPSHOT).unwrap();
        let monitor = WebsiteMonitor::load(path).unwrap();
        (dir, monitor)
    }

    #[test]
    fn health_is_degraded_when_any_service_is_not_up() {
        let (_dir, m) = monitor();
        assert_eq!(m.services().len(), 2);
        assert_eq!(m.health().overall, "degraded");
    }

    #[test]
    fn error_logs_keep_the_tail() {
        let (_dir, m) = monitor();
        assert_eq!(m.error_logs("web-1", 2).unwrap(), vec!["e2", "e3"]);
        assert_eq!(m.error_logs("web-1", 20).unwrap().len(), 3);
        assert!(m.error_logs("nope", 5).is_err());
    }

    #[test]
    fn performance_by_window() {
        let (_dir, m) = monitor();
        assert_eq!(m.performance("last_24_hours").unwrap()["p95_ms"], 840);
        assert!(m.performance("last_year").is_err());
    }

    #[test]
    fn load_times_filter_by_window_and_page() {
        let (_dir, m) = monitor();
        assert_eq!(m.historical_load_times("last_7_days", None).len(), 2);
        let checkout = m.historical_load_times("last_7_days", Some("/checkout"));
        assert_eq!(checkout[0].avg_load_ms, 2100.0);
    }

    #[test]
    fn missing_snapshot_fails_to_load() {
        let dir = TempDir::new().unwrap();
        assert!(WebsiteMonitor::load(dir.path().join(SNAPSHOT_FILE)).is_err());
    }
}
