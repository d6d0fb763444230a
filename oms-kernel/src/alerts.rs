/**
 * ALERTS - Capacity evaluation and the alert collection
 *
 * ROLE: Decide when an occupancy snapshot breaches the capacity thresholds and
 * keep the append-only list of alerts raised by the pipeline and the sweep.
 *
 * PERSISTENCE: Optional JSON mirror, rewritten after each create/resolve. A
 * failed save is logged by the caller; the in-memory write already happened.
 * Saves run one at a time, each writing the list as of its own start, so the
 * last save to finish always holds every alert created before it.
 *
 * KNOWN GAP: capacity alerts are never de-duplicated, every qualifying update
 * creates a new record. Camera-offline alerts are checked against an existing
 * active one by the sweep, but that check-then-create is not atomic.
 */

use crate::error::KernelError;
use crate::models::{Alert, AlertType, OccupancySnapshot, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct CapacityThresholds {
    pub high_pct: u32,
    pub critical_pct: u32,
}

impl Default for CapacityThresholds {
    fn default() -> Self {
        Self { high_pct: 90, critical_pct: 95 }
    }
}

/// A snapshot at or above the HIGH threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityBreach {
    pub percentage: u32,
    pub severity: Severity,
}

impl CapacityThresholds {
    pub fn evaluate(&self, snapshot: &OccupancySnapshot) -> Option<CapacityBreach> {
        let percentage = snapshot.percentage();
        if percentage < self.high_pct {
            return None;
        }
        let severity = if percentage >= self.critical_pct {
            Severity::Critical
        } else {
            Severity::High
        };
        Some(CapacityBreach { percentage, severity })
    }
}

pub fn capacity_message(snapshot: &OccupancySnapshot, percentage: u32) -> String {
    format!(
        "Bus {} ({}) is at {}% capacity",
        snapshot.bus_id, snapshot.route_id, percentage
    )
}

/// Filters for listing alerts. Results are newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertQuery {
    #[serde(rename = "type")]
    pub alert_type: Option<AlertType>,
    pub severity: Option<Severity>,
    #[serde(alias = "isActive")]
    pub is_active: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for AlertQuery {
    fn default() -> Self {
        Self {
            alert_type: None,
            severity: None,
            is_active: None,
            limit: default_limit(),
        }
    }
}

impl AlertQuery {
    fn matches(&self, alert: &Alert) -> bool {
        self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.is_active.map_or(true, |a| alert.is_active == a)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub resolved_alerts: usize,
    pub recent_alerts: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
}

pub struct AlertLog {
    alerts: RwLock<Vec<Alert>>,
    data_file: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl AlertLog {
    pub fn new(data_file: Option<PathBuf>) -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
            data_file,
            save_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Loads the JSON mirror if one is configured and present.
    pub async fn load(&self) -> Result<usize, KernelError> {
        let Some(path) = &self.data_file else {
            return Ok(0);
        };
        if !path.exists() {
            tracing::info!("no alerts file at {:?}, starting fresh", path);
            return Ok(0);
        }
        let content = tokio::fs::read_to_string(path).await?;
        let loaded: Vec<Alert> = serde_json::from_str(&content)?;
        let count = loaded.len();
        *self.alerts.write().await = loaded;
        tracing::info!("loaded {} alerts from {:?}", count, path);
        Ok(count)
    }

    /// Rewrites the JSON mirror. No-op without a data file.
    pub async fn persist(&self) -> Result<(), KernelError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        let content = {
            let alerts = self.alerts.read().await;
            serde_json::to_string_pretty(&*alerts)?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Appends a new active alert.
    pub async fn create(
        &self,
        alert_type: AlertType,
        bus_id: Option<&str>,
        severity: Severity,
        message: String,
    ) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            alert_type,
            bus_id: bus_id.map(str::to_string),
            severity,
            message,
            created_at: OffsetDateTime::now_utc(),
            is_active: true,
            resolved_at: None,
        };
        self.alerts.write().await.push(alert.clone());
        tracing::info!(
            alert_id = %alert.id,
            alert_type = ?alert.alert_type,
            severity = ?alert.severity,
            bus_id = ?alert.bus_id,
            "{}",
            alert.message
        );
        alert
    }

    /// Marks an alert inactive. Resolving twice keeps the first `resolved_at`.
    pub async fn resolve(&self, id: &str) -> Result<Alert, KernelError> {
        let resolved = {
            let mut alerts = self.alerts.write().await;
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| KernelError::not_found("alert", id))?;
            if alert.is_active {
                alert.is_active = false;
                alert.resolved_at = Some(OffsetDateTime::now_utc());
                tracing::info!(alert_id = %id, "alert resolved");
            }
            alert.clone()
        };
        if let Err(e) = self.persist().await {
            tracing::error!("failed to save alerts after resolve: {}", e);
        }
        Ok(resolved)
    }

    pub async fn get(&self, id: &str) -> Option<Alert> {
        self.alerts.read().await.iter().find(|a| a.id == id).cloned()
    }

    pub async fn has_active(&self, alert_type: AlertType, bus_id: &str) -> bool {
        self.alerts
            .read()
            .await
            .iter()
            .any(|a| a.is_active && a.alert_type == alert_type && a.bus_id.as_deref() == Some(bus_id))
    }

    pub async fn list(&self, query: &AlertQuery) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        // append-only, so reverse insertion order is newest first
        alerts
            .iter()
            .rev()
            .filter(|a| query.matches(a))
            .take(query.limit)
            .cloned()
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.alerts.read().await.iter().filter(|a| a.is_active).count()
    }

    pub async fn stats(&self, now: OffsetDateTime) -> AlertStats {
        let alerts = self.alerts.read().await;
        let since = now - time::Duration::hours(24);
        let mut by_type = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for alert in alerts.iter() {
            *by_type.entry(wire_name(&alert.alert_type)).or_insert(0) += 1;
            *by_severity.entry(wire_name(&alert.severity)).or_insert(0) += 1;
        }
        let active = alerts.iter().filter(|a| a.is_active).count();
        AlertStats {
            total_alerts: alerts.len(),
            active_alerts: active,
            resolved_alerts: alerts.len() - active,
            recent_alerts: alerts.iter().filter(|a| a.created_at >= since).count(),
            by_type,
            by_severity,
        }
    }
}

fn wire_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
