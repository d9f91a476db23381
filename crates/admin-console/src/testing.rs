//! In-memory doubles for the gateway and the summary transport, used by the
//! unit tests here and by integration tests of crates built on the console.

use crate::gateway::ConsoleGateway;
use crate::live::{EventStream, StreamEvent, SummaryTransport};
use async_trait::async_trait;
use campaign_core::types::{
    Campaign, CampaignStatus, Job, JobKind, JobParams, JobReceipt, ProgressSnapshot, SavedSegment,
    SegmentFilter, SegmentSummary, SummaryTotals,
};
use campaign_core::{ConsoleError, ConsoleResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

#[derive(Default)]
struct StatusScript {
    steps: VecDeque<ProgressSnapshot>,
    last: Option<ProgressSnapshot>,
}

/// Gateway double with scripted responses and call recording.
///
/// Status lookups replay the snapshots scripted for a job id, repeating the
/// last one once the script runs out.
#[derive(Default)]
pub struct ScriptedGateway {
    next_id: AtomicU64,
    submit_error: Mutex<Option<String>>,
    mutation_delay: Mutex<Option<Duration>>,
    created: Mutex<Vec<JobParams>>,
    statuses: Mutex<HashMap<String, StatusScript>>,
    failing_statuses: Mutex<HashSet<String>>,
    status_calls: Mutex<HashMap<String, usize>>,
    status_delay: Mutex<Option<Duration>>,
    history: Mutex<Vec<Job>>,
    history_fails: AtomicBool,
    campaigns: Mutex<Vec<Campaign>>,
    campaign_queries: Mutex<Vec<Option<CampaignStatus>>>,
    deleted_campaigns: Mutex<Vec<String>>,
    summary: Mutex<Option<SegmentSummary>>,
    summary_delay: Mutex<Option<Duration>>,
    summary_queries: Mutex<Vec<SegmentFilter>>,
    saved: Mutex<Vec<SavedSegment>>,
    saved_fails: AtomicBool,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submissions(&self, message: &str) {
        *self.submit_error.lock() = Some(message.to_string());
    }

    /// Delay submissions, deletes and saved-segment writes.
    pub fn delay_mutations(&self, delay: Duration) {
        *self.mutation_delay.lock() = Some(delay);
    }

    pub fn accept_submissions(&self) {
        *self.submit_error.lock() = None;
    }

    pub fn created(&self) -> Vec<JobParams> {
        self.created.lock().clone()
    }

    pub fn script_status(&self, job_id: &str, steps: Vec<ProgressSnapshot>) {
        self.statuses.lock().insert(
            job_id.to_string(),
            StatusScript {
                steps: steps.into(),
                last: None,
            },
        );
    }

    pub fn fail_status(&self, job_id: &str) {
        self.failing_statuses.lock().insert(job_id.to_string());
    }

    /// Delay status responses to simulate a slow backend.
    pub fn delay_status(&self, delay: Duration) {
        *self.status_delay.lock() = Some(delay);
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.status_calls.lock().get(job_id).copied().unwrap_or(0)
    }

    pub fn set_history(&self, jobs: Vec<Job>) {
        *self.history.lock() = jobs;
    }

    pub fn fail_history(&self, fail: bool) {
        self.history_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_campaigns(&self, campaigns: Vec<Campaign>) {
        *self.campaigns.lock() = campaigns;
    }

    pub fn campaign_queries(&self) -> Vec<Option<CampaignStatus>> {
        self.campaign_queries.lock().clone()
    }

    pub fn deleted_campaigns(&self) -> Vec<String> {
        self.deleted_campaigns.lock().clone()
    }

    pub fn set_summary(&self, summary: SegmentSummary) {
        *self.summary.lock() = Some(summary);
    }

    /// Delay summary responses to simulate a slow backend.
    pub fn delay_summary(&self, delay: Duration) {
        *self.summary_delay.lock() = Some(delay);
    }

    pub fn summary_queries(&self) -> Vec<SegmentFilter> {
        self.summary_queries.lock().clone()
    }

    pub fn set_saved_segments(&self, segments: Vec<SavedSegment>) {
        *self.saved.lock() = segments;
    }

    pub fn fail_saved_segments(&self, fail: bool) {
        self.saved_fails.store(fail, Ordering::SeqCst);
    }

    pub fn saved_segments(&self) -> Vec<SavedSegment> {
        self.saved.lock().clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn check_submission(&self) -> ConsoleResult<()> {
        let delay = *self.mutation_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.submit_error.lock().clone() {
            Some(message) => Err(ConsoleError::GatewayStatus {
                status: 422,
                message,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ConsoleGateway for ScriptedGateway {
    async fn create_job(&self, params: &JobParams) -> ConsoleResult<JobReceipt> {
        self.check_submission().await?;
        self.created.lock().push(params.clone());
        Ok(JobReceipt {
            id: self.next_id("job"),
        })
    }

    async fn send_now(&self, campaign_id: &str) -> ConsoleResult<JobReceipt> {
        self.check_submission().await?;
        self.created.lock().push(JobParams::CampaignSend {
            campaign_id: campaign_id.to_string(),
        });
        Ok(JobReceipt {
            id: self.next_id("send"),
        })
    }

    async fn job_status(&self, _kind: JobKind, id: &str) -> ConsoleResult<ProgressSnapshot> {
        *self.status_calls.lock().entry(id.to_string()).or_default() += 1;
        let delay = *self.status_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_statuses.lock().contains(id) {
            return Err(ConsoleError::Gateway(format!("status lookup for {id} timed out")));
        }
        let mut statuses = self.statuses.lock();
        let script = statuses
            .get_mut(id)
            .ok_or_else(|| ConsoleError::Gateway(format!("unknown job {id}")))?;
        if let Some(next) = script.steps.pop_front() {
            script.last = Some(next);
        }
        script
            .last
            .clone()
            .ok_or_else(|| ConsoleError::Gateway(format!("no status scripted for {id}")))
    }

    async fn list_recent_jobs(&self, limit: usize) -> ConsoleResult<Vec<Job>> {
        if self.history_fails.load(Ordering::SeqCst) {
            return Err(ConsoleError::Gateway("history unavailable".into()));
        }
        Ok(self.history.lock().iter().take(limit).cloned().collect())
    }

    async fn list_campaigns(&self, status: Option<CampaignStatus>) -> ConsoleResult<Vec<Campaign>> {
        self.campaign_queries.lock().push(status);
        Ok(self
            .campaigns
            .lock()
            .iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    async fn delete_campaign(&self, campaign_id: &str) -> ConsoleResult<()> {
        self.check_submission().await?;
        self.deleted_campaigns.lock().push(campaign_id.to_string());
        self.campaigns.lock().retain(|c| c.id != campaign_id);
        Ok(())
    }

    async fn segment_summary(&self, filter: &SegmentFilter) -> ConsoleResult<SegmentSummary> {
        self.summary_queries.lock().push(filter.clone());
        let delay = *self.summary_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let summary = self.summary.lock().clone();
        Ok(summary.unwrap_or(SegmentSummary {
            segments: Vec::new(),
            totals: SummaryTotals::default(),
            generated_at: None,
        }))
    }

    async fn list_saved_segments(&self) -> ConsoleResult<Vec<SavedSegment>> {
        if self.saved_fails.load(Ordering::SeqCst) {
            return Err(ConsoleError::Gateway("saved segments unavailable".into()));
        }
        Ok(self.saved.lock().clone())
    }

    async fn create_saved_segment(
        &self,
        name: &str,
        filter: &SegmentFilter,
    ) -> ConsoleResult<SavedSegment> {
        self.check_submission().await?;
        let segment = SavedSegment {
            id: self.next_id("seg"),
            name: name.to_string(),
            filter: filter.clone(),
        };
        self.saved.lock().push(segment.clone());
        Ok(segment)
    }

    async fn rename_saved_segment(&self, id: &str, name: &str) -> ConsoleResult<SavedSegment> {
        self.check_submission().await?;
        let mut saved = self.saved.lock();
        let segment = saved
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ConsoleError::GatewayStatus {
                status: 404,
                message: format!("segment {id} not found"),
            })?;
        segment.name = name.to_string();
        Ok(segment.clone())
    }

    async fn delete_saved_segment(&self, id: &str) -> ConsoleResult<()> {
        self.check_submission().await?;
        self.saved.lock().retain(|s| s.id != id);
        Ok(())
    }
}

/// Summary transport backed by an in-process channel. Each `connect`
/// replaces the previous channel.
#[derive(Default)]
pub struct ChannelTransport {
    sender: Mutex<Option<mpsc::Sender<ConsoleResult<StreamEvent>>>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
    urls: Mutex<Vec<Url>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }

    /// Deliver an event on the current connection, if any.
    pub async fn push(&self, event: StreamEvent) {
        self.send(Ok(event)).await;
    }

    /// Break the current connection with a transport error.
    pub async fn fail(&self, message: &str) {
        self.send(Err(ConsoleError::Stream(message.to_string()))).await;
    }

    async fn send(&self, item: ConsoleResult<StreamEvent>) {
        let sender = self.sender.lock().clone();
        if let Some(sender) = sender {
            // the subscriber may already have closed its end
            let _ = sender.send(item).await;
        }
    }
}

#[async_trait]
impl SummaryTransport for ChannelTransport {
    async fn connect(&self, url: &Url) -> ConsoleResult<EventStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConsoleError::Stream("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock() = Some(tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
