use std::{
    cmp,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use kube::{
    Api, Client, ResourceExt,
    runtime::controller::{Action, Controller},
};
use rand::Rng;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::{
    apply::{Applied, apply},
    crds::replicator::{Replicator, ReplicatorPhase, ReplicatorStatus},
    error::{ReconcileError, Severity},
    plan::{desired_object, plan},
    resolve::{ResourceHandle, resolve},
};

pub const DEFAULT_RESYNC: Duration = Duration::from_secs(300);

/// Wall-clock limit for one reconcile pass. An expired pass is abandoned,
/// never rolled back; the next trigger re-evaluates from fetched state.
const RECONCILE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Ctx {
    pub client: Client,
    /// Periodic requeue on success; catches external drift of the
    /// destination without watching arbitrary kinds.
    pub resync: Duration,
    pub backoff: Arc<Backoff>,
}

pub fn controller(client: Client, watch_namespace: Option<&str>) -> Controller<Replicator> {
    let api: Api<Replicator> = match watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    Controller::new(api, Default::default()).shutdown_on_signal()
}

pub async fn reconcile(rep: Arc<Replicator>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let ns = rep.namespace().unwrap();
    let name = rep.name_any();
    let key = format!("{}/{}", ns, name);

    // First sight of the object: surface Pending before doing any work
    if rep.status.is_none() {
        patch_status(&ctx.client, &ns, &name, None, &pending_status()).await?;
    }

    let outcome = match tokio::time::timeout(RECONCILE_DEADLINE, sync(&rep, &ctx, &ns)).await {
        Ok(res) => res,
        Err(_) => Err(ReconcileError::DeadlineExceeded),
    };

    match outcome {
        Ok((applied, target)) => {
            let status = next_success_status(applied, rep.status.as_ref(), &target.location());
            patch_status(&ctx.client, &ns, &name, rep.status.as_ref(), &status).await?;
            ctx.backoff.reset(&key);
            Ok(Action::requeue(ctx.resync))
        }
        Err(err) => match err.severity() {
            Severity::Fatal => {
                warn!(replicator = %key, error = %err, "replication failed");
                let status = failed_status(&err);
                patch_status(&ctx.client, &ns, &name, rep.status.as_ref(), &status).await?;
                ctx.backoff.reset(&key);
                // Parked until the spec changes or the object is retriggered
                Ok(Action::await_change())
            }
            Severity::Retryable => {
                let status = degraded_status(&err);
                patch_status(&ctx.client, &ns, &name, rep.status.as_ref(), &status).await?;
                Err(err)
            }
        },
    }
}

pub fn error_policy(rep: Arc<Replicator>, err: &ReconcileError, ctx: Arc<Ctx>) -> Action {
    let key = format!("{}/{}", rep.namespace().unwrap_or_default(), rep.name_any());
    let delay = ctx.backoff.next(&key);
    warn!(replicator = %key, error = %err, ?delay, "reconcile failed, backing off");
    Action::requeue(delay)
}

/// One fetch-plan-apply pass: resolve both references, fetch source and
/// destination, apply the minimal mutation.
async fn sync(
    rep: &Replicator,
    ctx: &Ctx,
    ns: &str,
) -> Result<(Applied, ResourceHandle), ReconcileError> {
    let from = resolve(&ctx.client, &rep.spec.from, ns).await?;

    // Unset destination fields inherit from the source
    let mut to_query = rep.spec.to.clone();
    if to_query.api_version.is_empty() {
        to_query.api_version = from.resource.api_version.clone();
    }
    if to_query.kind.is_empty() {
        to_query.kind = from.resource.kind.clone();
    }
    if to_query.name.is_empty() {
        to_query.name = from.name.clone();
    }
    let to = resolve(&ctx.client, &to_query, ns).await?;

    if from.same_object(&to) {
        return Err(ReconcileError::InvalidReference(
            "from and to refer to the same object".into(),
        ));
    }

    let source = from
        .fetch(ctx.client.clone())
        .await?
        .ok_or_else(|| ReconcileError::SourceMissing(from.location()))?;
    let current = to.fetch(ctx.client.clone()).await?;

    let desired = desired_object(&serde_json::to_value(&source)?, &to);
    let current_value = current.as_ref().map(serde_json::to_value).transpose()?;
    let action = plan(&desired, current_value.as_ref());

    let api = to.api(ctx.client.clone());
    let applied = apply(&api, &to.name, &action, &desired).await?;
    if applied != Applied::Unchanged {
        info!(source = %from.location(), target = %to.location(), ?applied, "replicated");
    }
    Ok((applied, to))
}

// -------- Status reporting --------

fn pending_status() -> ReplicatorStatus {
    ReplicatorStatus {
        message: Some("replication pending".into()),
        phase: ReplicatorPhase::Pending,
        ready: false,
    }
}

/// An already-converged object keeps its previous success status verbatim,
/// so repeat reconciles of a settled Replicator write nothing.
fn next_success_status(
    applied: Applied,
    prev: Option<&ReplicatorStatus>,
    target: &str,
) -> ReplicatorStatus {
    if applied == Applied::Unchanged
        && let Some(prev) = prev
        && prev.phase == ReplicatorPhase::Succeeded
        && prev.ready
    {
        return prev.clone();
    }
    succeeded_status(applied, target)
}

fn succeeded_status(applied: Applied, target: &str) -> ReplicatorStatus {
    let message = match applied {
        Applied::Created => format!("created {}", target),
        Applied::Updated => format!("updated {}", target),
        Applied::Unchanged => format!("{} in sync", target),
    };
    ReplicatorStatus {
        message: Some(message),
        phase: ReplicatorPhase::Succeeded,
        ready: true,
    }
}

fn failed_status(err: &ReconcileError) -> ReplicatorStatus {
    ReplicatorStatus {
        message: Some(err.to_string()),
        phase: ReplicatorPhase::Failed,
        ready: false,
    }
}

fn degraded_status(err: &ReconcileError) -> ReplicatorStatus {
    ReplicatorStatus {
        message: Some(err.to_string()),
        phase: ReplicatorPhase::Unknown,
        ready: false,
    }
}

/// Merge-patch the status subresource, skipping the write when nothing
/// changed so a converged object sees no update traffic.
async fn patch_status(
    client: &Client,
    ns: &str,
    name: &str,
    current: Option<&ReplicatorStatus>,
    status: &ReplicatorStatus,
) -> Result<(), ReconcileError> {
    if current == Some(status) {
        return Ok(());
    }
    let api: Api<Replicator> = Api::namespaced(client.clone(), ns);
    let pp = kube::api::PatchParams::apply("replicator-operator");
    let _ = api
        .patch_status(
            name,
            &pp,
            &kube::api::Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await?;
    Ok(())
}

// -------- Retry backoff --------

/// Exponential per-object retry schedule: base doubling up to a cap, with a
/// little jitter so a burst of failures does not retry in lockstep. Attempt
/// counters reset on the first successful or terminally-failed reconcile.
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn next(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
        let n = attempts.entry(key.to_string()).or_insert(0);
        let delay = self.delay_for_attempt(*n);
        *n = n.saturating_add(1);
        let jitter = rand::rng().random_range(0.0..0.1);
        delay.mul_f64(1.0 + jitter)
    }

    pub fn reset(&self, key: &str) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
        attempts.remove(key);
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^9 seconds already exceeds any sane cap
        let exp = cmp::min(attempt, 9);
        cmp::min(self.base.saturating_mul(1u32 << exp), self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_status_is_not_ready() {
        let status = pending_status();
        assert_eq!(status.phase, ReplicatorPhase::Pending);
        assert!(!status.ready);
    }

    #[test]
    fn success_statuses_phrase_the_outcome() {
        let created = succeeded_status(Applied::Created, "ConfigMap b/cfg");
        assert_eq!(created.phase, ReplicatorPhase::Succeeded);
        assert!(created.ready);
        assert_eq!(created.message.as_deref(), Some("created ConfigMap b/cfg"));

        let updated = succeeded_status(Applied::Updated, "ConfigMap b/cfg");
        assert_eq!(updated.message.as_deref(), Some("updated ConfigMap b/cfg"));

        let unchanged = succeeded_status(Applied::Unchanged, "ConfigMap b/cfg");
        assert_eq!(unchanged.message.as_deref(), Some("ConfigMap b/cfg in sync"));
        assert!(unchanged.ready);
    }

    #[test]
    fn missing_source_reports_failed() {
        let err = ReconcileError::SourceMissing("ConfigMap a/cfg".into());
        let status = failed_status(&err);
        assert_eq!(status.phase, ReplicatorPhase::Failed);
        assert!(!status.ready);
        assert!(status.message.as_deref().unwrap().contains("source not found"));
    }

    #[test]
    fn conflict_reports_unknown_until_retried() {
        let err = ReconcileError::Conflict("ConfigMap b/cfg".into());
        let status = degraded_status(&err);
        assert_eq!(status.phase, ReplicatorPhase::Unknown);
        assert!(!status.ready);
    }

    #[test]
    fn settled_object_keeps_its_success_status() {
        let prev = succeeded_status(Applied::Created, "ConfigMap b/cfg");
        let next = next_success_status(Applied::Unchanged, Some(&prev), "ConfigMap b/cfg");
        assert_eq!(next, prev);

        // A fresh convergence (prior status Pending) still gets reported
        let pending = pending_status();
        let first = next_success_status(Applied::Unchanged, Some(&pending), "ConfigMap b/cfg");
        assert_eq!(first.phase, ReplicatorPhase::Succeeded);
        assert_eq!(first.message.as_deref(), Some("ConfigMap b/cfg in sync"));

        // A real write always refreshes the message
        let updated = next_success_status(Applied::Updated, Some(&prev), "ConfigMap b/cfg");
        assert_eq!(updated.message.as_deref(), Some("updated ConfigMap b/cfg"));
    }

    #[test]
    fn identical_status_means_no_patch() {
        // patch_status skips the write on equality; the comparison is what
        // guards monotonicity under success.
        let a = succeeded_status(Applied::Unchanged, "ConfigMap b/cfg");
        let b = succeeded_status(Applied::Unchanged, "ConfigMap b/cfg");
        assert_eq!(a, b);
        let c = succeeded_status(Applied::Updated, "ConfigMap b/cfg");
        assert_ne!(a, c);
    }

    #[test]
    fn backoff_doubles_to_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(32));
        assert_eq!(backoff.delay_for_attempt(9), Duration::from_secs(300));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_secs(300));
    }

    #[test]
    fn backoff_advances_per_key_and_resets() {
        let backoff = Backoff::default();
        let first = backoff.next("a/x");
        let second = backoff.next("a/x");
        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1100));
        assert!(second >= Duration::from_secs(2) && second < Duration::from_millis(2200));

        // Other objects keep their own schedule
        let other = backoff.next("a/y");
        assert!(other < Duration::from_millis(1100));

        backoff.reset("a/x");
        let restarted = backoff.next("a/x");
        assert!(restarted < Duration::from_millis(1100));
    }
}
