//! Per-environment rollups over a freshly built snapshot.

use crate::billing::{format_amount, BillingLedger};
use crate::identity::compute_id;
use crate::models::{Environment, EnvironmentState, InstanceState};

/// Classify an environment from its counts.
pub fn classify(total: usize, running: usize, stopped: usize) -> EnvironmentState {
    if total == running {
        EnvironmentState::Running
    } else if total == stopped {
        EnvironmentState::Stopped
    } else if running + stopped == total {
        EnvironmentState::Mixed
    } else {
        EnvironmentState::Changing
    }
}

/// Recompute ids, counts, totals and state for every environment.
///
/// When `ledger` is given, bill figures for each environment are attached
/// from it as-is.
pub fn recompute_aggregates(environments: &mut [Environment], ledger: Option<&BillingLedger>) {
    for env in environments.iter_mut() {
        env.id = compute_id(&[&env.provider, &env.region, &env.name]);

        env.total_instances = env.instances.len();
        env.running_instances = 0;
        env.stopped_instances = 0;
        env.total_vcpu = 0;
        env.total_memory_gb = 0.0;

        for instance in env.instances.iter_mut() {
            instance.id = compute_id(&[&env.provider, &instance.region, &instance.native_id]);
            env.total_vcpu += instance.vcpu;
            env.total_memory_gb += instance.memory_gb;
            match instance.state {
                InstanceState::Running => env.running_instances += 1,
                InstanceState::Stopped => env.stopped_instances += 1,
                _ => {}
            }
        }

        env.state = classify(
            env.total_instances,
            env.running_instances,
            env.stopped_instances,
        );

        if let Some(ledger) = ledger {
            env.bills_accrued = ledger.accrued(&env.id).map(format_amount);
            env.bills_saved = ledger.saved(&env.id).map(format_amount);
        }
    }
}
