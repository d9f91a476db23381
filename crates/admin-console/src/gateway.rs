//! Backend operations the console coordinates.
//!
//! Implemented over HTTP by `campaign-gateway`; tests use
//! [`ScriptedGateway`](crate::testing::ScriptedGateway).

use async_trait::async_trait;
use campaign_core::types::{
    Campaign, CampaignStatus, Job, JobKind, JobParams, JobReceipt, ProgressSnapshot, SavedSegment,
    SegmentFilter, SegmentSummary,
};
use campaign_core::ConsoleResult;

#[async_trait]
pub trait ConsoleGateway: Send + Sync {
    /// Create a job. Fails with a descriptive error on validation or auth
    /// failure.
    async fn create_job(&self, params: &JobParams) -> ConsoleResult<JobReceipt>;

    /// Start delivering a draft campaign immediately.
    async fn send_now(&self, campaign_id: &str) -> ConsoleResult<JobReceipt>;

    /// Point-in-time progress of one job.
    async fn job_status(&self, kind: JobKind, id: &str) -> ConsoleResult<ProgressSnapshot>;

    /// Most recent jobs, newest first.
    async fn list_recent_jobs(&self, limit: usize) -> ConsoleResult<Vec<Job>>;

    async fn list_campaigns(&self, status: Option<CampaignStatus>) -> ConsoleResult<Vec<Campaign>>;

    async fn delete_campaign(&self, campaign_id: &str) -> ConsoleResult<()>;

    async fn segment_summary(&self, filter: &SegmentFilter) -> ConsoleResult<SegmentSummary>;

    async fn list_saved_segments(&self) -> ConsoleResult<Vec<SavedSegment>>;

    async fn create_saved_segment(
        &self,
        name: &str,
        filter: &SegmentFilter,
    ) -> ConsoleResult<SavedSegment>;

    async fn rename_saved_segment(&self, id: &str, name: &str) -> ConsoleResult<SavedSegment>;

    async fn delete_saved_segment(&self, id: &str) -> ConsoleResult<()>;
}
