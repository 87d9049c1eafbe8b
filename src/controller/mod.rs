//! The cutover reconciliation loop: gates A-E over proxy backend rows, kill-set derivation, and
//! the scale-up/kill-down/delete decision.
//!
//! Expressed as an explicit `loop` with a `tokio::time::sleep` on every retry path rather than
//! the original script's self-tail-call, so stack depth stays bounded no matter how long a
//! cutover takes to converge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::confirm::Confirm;
use crate::error::CutoverError;
use crate::model::{AppDef, LABEL_TARGET_INSTANCES};
use crate::proxystats::{BackendRow, ProxyStats};
use crate::scheduler::SchedulerApi;

const STUCK_WARNING_THRESHOLD: u32 = 50;

pub struct Controller {
    pub scheduler: Arc<dyn SchedulerApi>,
    pub proxy: Arc<dyn ProxyStats>,
    pub confirm: Arc<dyn Confirm>,
    pub step_delay: Duration,
    pub force: bool,
}

/// Outcome of evaluating gates A-E against one fetched snapshot.
enum GateOutcome {
    Retry(&'static str),
    Proceed { draining: Vec<BackendRow> },
}

impl Controller {
    pub fn new(
        scheduler: Arc<dyn SchedulerApi>,
        proxy: Arc<dyn ProxyStats>,
        confirm: Arc<dyn Confirm>,
        step_delay: Duration,
        force: bool,
    ) -> Self {
        Self {
            scheduler,
            proxy,
            confirm,
            step_delay,
            force,
        }
    }

    /// Tracks consecutive retries stuck on the same reason, warning once the threshold is hit.
    fn note_stuck(
        &self,
        reason: &'static str,
        stuck_iterations: &mut u32,
        last_gate: &mut Option<&'static str>,
    ) {
        if *last_gate == Some(reason) {
            *stuck_iterations += 1;
            if *stuck_iterations == STUCK_WARNING_THRESHOLD {
                tracing::warn!(
                    reason,
                    iterations = *stuck_iterations,
                    "cutover has not progressed in {STUCK_WARNING_THRESHOLD} iterations"
                );
            }
        } else {
            *stuck_iterations = 0;
            *last_gate = Some(reason);
        }
    }

    /// Drives `new_app_id`/`old_app_id` to completion: scales the new app up and the old app down
    /// until the new app reaches its target and every old-app task has drained, then deletes the
    /// old app. Returns once the old app is deleted, or once a confirmation is declined.
    pub async fn run(&self, pxname: &str, new_app_id: &str, old_app_id: &str) -> Result<(), CutoverError> {
        let mut stuck_iterations: u32 = 0;
        let mut last_gate: Option<&'static str> = None;

        loop {
            let new_app = self.scheduler.get_app(new_app_id).await?;
            let old_app = self.scheduler.get_app(old_app_id).await?;

            let target: i64 = new_app
                .label(LABEL_TARGET_INSTANCES)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    CutoverError::Validation(format!("{LABEL_TARGET_INSTANCES} missing or invalid"))
                })?;
            let i_new = new_app.instances().unwrap_or(0);
            let i_old = old_app.instances().unwrap_or(0);

            // Gate A: a failed fetch or a reloading instance (>1 pid) is a soft failure per
            // spec.md section 4.4/7 — it must retry after the step delay, not abort the cutover.
            let snapshot = match self.proxy.fetch(pxname).await {
                Ok(snapshot) => snapshot,
                Err(err @ CutoverError::ProxyTransient(_)) => {
                    let reason = "proxy fleet fetch failed or is still reloading";
                    tracing::debug!(error = %err, reason, "gate A failed, retrying after step delay");
                    self.note_stuck(reason, &mut stuck_iterations, &mut last_gate);
                    tokio::time::sleep(self.step_delay).await;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let rows: Vec<BackendRow> = snapshot.rows_for(pxname).cloned().collect();

            match evaluate_gates(&rows, snapshot.instance_count, i_new, i_old, target) {
                GateOutcome::Retry(reason) => {
                    tracing::debug!(reason, "gate failed, retrying after step delay");
                    self.note_stuck(reason, &mut stuck_iterations, &mut last_gate);
                    tokio::time::sleep(self.step_delay).await;
                    continue;
                }
                GateOutcome::Proceed { draining } => {
                    stuck_iterations = 0;
                    last_gate = None;
                    let kill_set = eligible_kill_set(&draining, snapshot.instance_count, &old_app);

                    if i_new == target && kill_set.len() as i64 == i_old {
                        tracing::info!(old_app_id, "cutover complete, deleting old app");
                        if !self.force && !self.confirm.ask(&format!("Delete {old_app_id}?")).await {
                            return Ok(());
                        }
                        self.scheduler.delete_app(old_app_id).await?;
                        return Ok(());
                    }

                    let next_instances = scale_up_target(i_new, target);
                    tracing::info!(
                        new_app_id,
                        from = i_new,
                        to = next_instances,
                        kill_count = kill_set.len(),
                        "scaling new app up and killing drained old tasks"
                    );
                    if !self.force
                        && !self
                            .confirm
                            .ask(&format!("Scale {new_app_id} to {next_instances} and kill {} old tasks?", kill_set.len()))
                            .await
                    {
                        return Ok(());
                    }
                    self.scheduler.scale_app(new_app_id, next_instances).await?;
                    if !kill_set.is_empty() {
                        self.scheduler.kill_and_scale(old_app_id, &kill_set).await?;
                    }
                    tokio::time::sleep(self.step_delay).await;
                }
            }
        }
    }
}

/// Scale-up factor: roughly 1.5x, capped at `target`.
fn scale_up_target(i_new: i64, target: i64) -> i64 {
    let next = i_new + (i_new + 1) / 2;
    next.min(target)
}

fn evaluate_gates(
    rows: &[BackendRow],
    instance_count: usize,
    i_new: i64,
    i_old: i64,
    target: i64,
) -> GateOutcome {
    if instance_count == 0 {
        return GateOutcome::Retry("no proxy instances reporting");
    }
    let h = instance_count as i64;

    // Gate B: proxy has observed both apps. Exact multiple, not floor division: a partial or
    // inconsistent proxy report (e.g. 7 rows across 3 instances for 2 expected apps) must retry,
    // not be rounded down into a false pass.
    if rows.len() as i64 != h * (i_new + i_old) {
        return GateOutcome::Retry("backend row count does not match scheduler instance counts");
    }

    // Gate C: new app has reached target health.
    let up = rows.iter().filter(|r| r.status == "UP").count() as i64;
    if up / h < target {
        return GateOutcome::Retry("fewer UP backends than target instances");
    }

    // Gate D: at least one instance draining.
    let draining: Vec<BackendRow> = rows.iter().filter(|r| r.status == "MAINT").cloned().collect();
    if (draining.len() as i64) / h < 1 {
        return GateOutcome::Retry("no draining backend yet");
    }

    // Gate E: draining instances are quiescent.
    if draining.iter().any(|r| r.qcur != 0 || r.scur != 0) {
        return GateOutcome::Retry("draining backend still has queued or current sessions");
    }

    GateOutcome::Proceed { draining }
}

/// A `(host, port)` pair is eligible only when it drains on every proxy instance. Eligible pairs
/// are then matched against the old app's tasks to produce the task ids to kill.
fn eligible_kill_set(draining: &[BackendRow], instance_count: usize, old_app: &AppDef) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in draining {
        *counts.entry(row.svname.as_str()).or_insert(0) += 1;
    }

    let eligible_hosts: Vec<(String, u16)> = counts
        .into_iter()
        .filter(|(_, count)| *count == instance_count)
        .filter_map(|(svname, _)| parse_svname(svname))
        .collect();

    old_app
        .tasks()
        .into_iter()
        .filter(|task| {
            eligible_hosts
                .iter()
                .any(|(host, port)| &task.host == host && task.ports.contains(port))
        })
        .map(|task| task.id)
        .collect()
}

/// Parses `A_B_C_D_P` (IPv4 octets joined with `_`, then the port) into `(host, port)`.
fn parse_svname(svname: &str) -> Option<(String, u16)> {
    let mut parts: Vec<&str> = svname.split('_').collect();
    let port: u16 = parts.pop()?.parse().ok()?;
    if parts.len() != 4 {
        return None;
    }
    Some((parts.join("."), port))
}
