//! Approximate cost accrual between refreshes.
//!
//! Costs are estimated as if every instance kept its observed state for the
//! whole interval since the previous accrual. Savings only count for instances
//! this process stopped itself.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{EnvironmentCache, InstanceState};

/// Native ids of instances this process has stopped.
#[derive(Debug, Default)]
pub struct ToggledOffLedger {
    ids: RwLock<HashSet<String>>,
}

impl ToggledOffLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_toggled_off(&self, native_ids: &[String]) {
        let mut ids = self.ids.write().await;
        ids.extend(native_ids.iter().cloned());
    }

    pub async fn clear_toggled_off(&self, native_ids: &[String]) {
        let mut ids = self.ids.write().await;
        for id in native_ids {
            ids.remove(id);
        }
    }

    pub async fn contains(&self, native_id: &str) -> bool {
        self.ids.read().await.contains(native_id)
    }

    /// Read access for the duration of an accrual pass.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, HashSet<String>> {
        self.ids.read().await
    }
}

/// Accrued and saved totals per environment id and process-wide.
///
/// Only mutated by [`BillingLedger::accrue`], which runs under the refresh lock.
#[derive(Debug, Default, Clone)]
pub struct BillingLedger {
    accrued: HashMap<String, f64>,
    saved: HashMap<String, f64>,
    total_accrued: f64,
    total_saved: f64,
    last_accrual: Option<DateTime<Utc>>,
}

impl BillingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accrue costs for the interval since the previous call against `snapshot`.
    ///
    /// The first call only records the timestamp.
    pub fn accrue(
        &mut self,
        snapshot: &EnvironmentCache,
        toggled_off: &HashSet<String>,
        now: DateTime<Utc>,
    ) {
        let Some(last) = self.last_accrual.replace(now) else {
            return;
        };
        let elapsed_hours = (now - last).num_milliseconds().max(0) as f64 / 3_600_000.0;

        for env in &snapshot.environments {
            let mut env_accrued = 0.0;
            let mut env_saved = 0.0;
            for instance in &env.instances {
                let cost = instance.hourly_price * elapsed_hours;
                match instance.state {
                    InstanceState::Running => env_accrued += cost,
                    InstanceState::Stopped if toggled_off.contains(&instance.native_id) => {
                        env_saved += cost
                    }
                    _ => {}
                }
            }
            *self.accrued.entry(env.id.clone()).or_default() += env_accrued;
            *self.saved.entry(env.id.clone()).or_default() += env_saved;
            self.total_accrued += env_accrued;
            self.total_saved += env_saved;
        }

        debug!(
            elapsed_hours,
            total_accrued = self.total_accrued,
            total_saved = self.total_saved,
            "billing accrued"
        );
    }

    pub fn accrued(&self, env_id: &str) -> Option<f64> {
        self.accrued.get(env_id).copied()
    }

    pub fn saved(&self, env_id: &str) -> Option<f64> {
        self.saved.get(env_id).copied()
    }

    pub fn total_accrued(&self) -> f64 {
        self.total_accrued
    }

    pub fn total_saved(&self) -> f64 {
        self.total_saved
    }

    pub fn last_accrual(&self) -> Option<DateTime<Utc>> {
        self.last_accrual
    }
}

/// Two-decimal rendering used for every bill figure.
pub fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}
