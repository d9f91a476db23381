//! Which jobs exist and where they are.
//!
//! State is two-tier:
//!
//! - a map of locally known jobs keyed by logical identity ([`JobKey`]),
//!   filled optimistically the moment a submission is accepted, and
//! - the most recent authoritative history list from the gateway.
//!
//! Merging is explicit: a server record with the same id replaces the local
//! entry whole, and a newer server job for the same key takes over the slot.
//! Nothing is ever merged field by field. A record that would move an
//! entry's status backwards is dropped.

use crate::gateway::ConsoleGateway;
use crate::poller::Poller;
use crate::scope::ViewScope;
use campaign_core::config::PollingConfig;
use campaign_core::types::{DeliveryOutcome, Job, JobKey, JobKind, JobParams, ProgressSnapshot};
use campaign_core::{ConsoleError, ConsoleResult};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub struct JobTracker {
    gateway: Arc<dyn ConsoleGateway>,
    poller: Poller,
    polling: PollingConfig,
    scope: ViewScope,
    local: DashMap<JobKey, Job>,
    history: RwLock<Vec<Job>>,
    revision: watch::Sender<u64>,
}

impl JobTracker {
    pub fn new(gateway: Arc<dyn ConsoleGateway>, polling: &PollingConfig, scope: ViewScope) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            gateway,
            poller: Poller::from_config(polling),
            polling: polling.clone(),
            scope,
            local: DashMap::new(),
            history: RwLock::new(Vec::new()),
            revision,
        }
    }

    // ─── Actions ────────────────────────────────────────────────────────

    /// Submit a job and track it optimistically as `queued`.
    ///
    /// A previous entry for the same key is overwritten: the last submission
    /// wins locally until the next history refresh says otherwise. On error,
    /// or when the scope ends before the gateway answers, nothing is
    /// recorded.
    pub async fn submit(&self, params: JobParams) -> ConsoleResult<Job> {
        let key = params.key();
        let request = async {
            match &params {
                JobParams::CampaignSend { campaign_id } => self.gateway.send_now(campaign_id).await,
                JobParams::SegmentExport { .. } => self.gateway.create_job(&params).await,
            }
        };
        let receipt = self.scope.attach("job submission", request).await.map_err(|e| {
            warn!(key = %key, error = %e, "Job submission failed");
            metrics::counter!("console.jobs.submit_errors").increment(1);
            e
        })?;

        let job = Job::queued(receipt.id, params, Utc::now());
        if let Some(previous) = self.local.insert(key.clone(), job.clone()) {
            debug!(key = %key, superseded = %previous.id, "Replaced tracked job for key");
        }
        info!(job_id = %job.id, kind = %job.kind, key = %key, "Job submitted");
        metrics::counter!("console.jobs.submitted").increment(1);
        self.bump();
        Ok(job)
    }

    /// Fetch the latest `limit` jobs and fold them into the local map.
    /// Best-effort: failures are logged and the current state is kept.
    pub async fn refresh_history(&self, limit: usize) {
        match self.scope.run(self.gateway.list_recent_jobs(limit)).await {
            Some(Ok(jobs)) => self.apply_history(jobs),
            Some(Err(e)) => {
                warn!(error = %e, "Job history refresh failed, keeping stale view");
                metrics::counter!("console.history.refresh_errors").increment(1);
            }
            None => {}
        }
    }

    /// Poll a campaign send to completion, recording every snapshot on the
    /// tracked entry. A fetch error ends the poll and is returned as-is; it
    /// says nothing about the job itself.
    pub async fn poll_until_done(&self, job: &Job) -> ConsoleResult<Option<DeliveryOutcome>> {
        if job.kind != JobKind::CampaignSend {
            return Err(ConsoleError::Validation(format!(
                "job {} is a {}, only campaign sends are polled to delivery",
                job.id, job.kind
            )));
        }

        let gateway = &self.gateway;
        let result = self
            .poller
            .poll_until_done(&job.id, &self.scope, move || async move {
                let snapshot = gateway.job_status(JobKind::CampaignSend, &job.id).await?;
                if self.scope.is_alive() {
                    self.record_snapshot(job, &snapshot);
                }
                Ok(snapshot)
            })
            .await;

        if let Err(e) = &result {
            debug!(job_id = %job.id, error = %e, "Stopped watching campaign send");
        }
        result
    }

    /// One tick of the export watcher: fetch the status of every pending
    /// export concurrently. A failed fetch only skips that job this tick.
    /// Returns how many exports were pending.
    pub async fn poll_pending_exports(&self) -> usize {
        let pending: Vec<Job> = self
            .local
            .iter()
            .filter(|e| e.value().kind == JobKind::SegmentExport && e.value().is_in_flight())
            .map(|e| e.value().clone())
            .collect();
        if pending.is_empty() {
            return 0;
        }

        let count = pending.len();
        let mut fetches = JoinSet::new();
        for job in pending {
            let gateway = Arc::clone(&self.gateway);
            fetches.spawn(async move {
                let result = gateway.job_status(JobKind::SegmentExport, &job.id).await;
                (job, result)
            });
        }

        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((job, Ok(snapshot))) => {
                    if self.scope.is_alive() {
                        self.record_snapshot(&job, &snapshot);
                    }
                }
                Ok((job, Err(e))) => {
                    debug!(job_id = %job.id, error = %e, "Export status fetch failed");
                }
                Err(e) => warn!(error = %e, "Export status task aborted"),
            }
        }
        count
    }

    // ─── Background loops ───────────────────────────────────────────────

    /// Refresh history on a cadence that tightens while work is in flight.
    pub fn spawn_history_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let limit = tracker.polling.history_limit;
            loop {
                tracker.refresh_history(limit).await;
                if !tracker.scope.sleep(tracker.refresh_interval()).await {
                    break;
                }
            }
            debug!("History refresh loop stopped");
        })
    }

    /// Tick [`poll_pending_exports`](Self::poll_pending_exports) at the
    /// export poll interval until the scope ends.
    pub fn spawn_export_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let interval = tracker.polling.export_poll_interval();
            while tracker.scope.sleep(interval).await {
                tracker.poll_pending_exports().await;
            }
            debug!("Export watch loop stopped");
        })
    }

    // ─── Merging ────────────────────────────────────────────────────────

    /// Fold an authoritative history list (newest first) into the map.
    pub fn apply_history(&self, jobs: Vec<Job>) {
        for job in &jobs {
            let key = job.key();
            match self.local.get_mut(&key) {
                Some(mut entry) if entry.id == job.id => {
                    replace_forward(&mut entry, job.clone());
                }
                Some(mut entry) => {
                    if job.created_at > entry.created_at {
                        debug!(key = %key, current = %entry.id, newer = %job.id, "Newer server job takes slot");
                        *entry = job.clone();
                    }
                }
                None => {
                    self.local.insert(key, job.clone());
                }
            }
        }
        *self.history.write() = jobs;
        self.bump();
    }

    /// Replace the entry for `job` with its successor built from `snapshot`.
    /// Only the entry carrying `job.id` is touched; if the slot has since
    /// been taken by another job, the snapshot is dropped.
    pub fn record_snapshot(&self, job: &Job, snapshot: &ProgressSnapshot) -> bool {
        let Some(mut entry) = self.local.get_mut(&job.key()) else {
            return false;
        };
        if entry.id != job.id {
            debug!(job_id = %job.id, slot = %entry.id, "Slot superseded, dropping snapshot");
            return false;
        }
        let successor = entry.advanced_by(snapshot, Utc::now());
        let replaced = replace_forward(&mut entry, successor);
        drop(entry);
        if replaced {
            self.bump();
        }
        replaced
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    // ─── Selectors ──────────────────────────────────────────────────────

    /// Current job per key, newest first.
    pub fn jobs_by_key(&self) -> Vec<(JobKey, Job)> {
        let mut jobs: Vec<_> = self
            .local
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        jobs.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        jobs
    }

    pub fn current(&self, key: &JobKey) -> Option<Job> {
        self.local.get(key).map(|e| e.value().clone())
    }

    /// Is a job for exactly this key already queued or processing?
    pub fn in_flight_for(&self, key: &JobKey) -> bool {
        self.local.get(key).is_some_and(|e| e.is_in_flight())
    }

    pub fn has_in_flight(&self) -> bool {
        self.local.iter().any(|e| e.value().is_in_flight())
    }

    /// Last authoritative history list as returned by the gateway.
    pub fn history(&self) -> Vec<Job> {
        self.history.read().clone()
    }

    /// Change notifications; the value is a revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Refresh cadence: fast while anything is queued or processing.
    pub fn refresh_interval(&self) -> Duration {
        if self.has_in_flight() {
            self.polling.active_refresh()
        } else {
            self.polling.idle_refresh()
        }
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}

/// Overwrite `entry` with `incoming` unless that would move its status
/// backwards.
fn replace_forward(entry: &mut Job, incoming: Job) -> bool {
    if entry.status.regresses_to(incoming.status) {
        debug!(
            job_id = %entry.id,
            current = %entry.status,
            incoming = %incoming.status,
            "Ignoring stale job record"
        );
        return false;
    }
    *entry = incoming;
    true
}
