use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Jobs ───────────────────────────────────────────────────────────────────

/// Kind of asynchronous backend work tracked by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    CampaignSend,
    SegmentExport,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::CampaignSend => f.write_str("campaign-send"),
            JobKind::SegmentExport => f.write_str("segment-export"),
        }
    }
}

/// Lifecycle status of a job. Only ever moves forward:
/// `queued → processing → completed | failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// True when moving from `self` to `next` would go backwards.
    /// Terminal states never change into one another.
    pub fn regresses_to(self, next: JobStatus) -> bool {
        next.rank() < self.rank() || (self.is_terminal() && self != next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a campaign send, derived from aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

impl DeliveryOutcome {
    pub fn job_status(self) -> JobStatus {
        match self {
            DeliveryOutcome::Sent => JobStatus::Completed,
            DeliveryOutcome::Failed => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

/// Engagement tri-state filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engagement {
    #[default]
    Any,
    Engaged,
    NotEngaged,
}

impl Engagement {
    /// Query-string value, `None` for the unfiltered state.
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            Engagement::Any => None,
            Engagement::Engaged => Some("engaged"),
            Engagement::NotEngaged => Some("not_engaged"),
        }
    }

    /// Lenient parse used when reading shared URLs; unknown values mean `Any`.
    pub fn from_param(value: &str) -> Self {
        match value {
            "engaged" | "true" => Engagement::Engaged,
            "not_engaged" | "false" => Engagement::NotEngaged,
            _ => Engagement::Any,
        }
    }
}

/// Audience filter shared by exports, summaries and saved segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub engagement: Engagement,
}

/// Immutable request parameters a job was created with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobParams {
    #[serde(rename_all = "camelCase")]
    CampaignSend { campaign_id: String },
    #[serde(rename_all = "camelCase")]
    SegmentExport {
        #[serde(flatten)]
        filter: SegmentFilter,
        format: ExportFormat,
    },
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::CampaignSend { .. } => JobKind::CampaignSend,
            JobParams::SegmentExport { .. } => JobKind::SegmentExport,
        }
    }

    pub fn key(&self) -> JobKey {
        match self {
            JobParams::CampaignSend { campaign_id } => JobKey::Campaign {
                campaign_id: campaign_id.clone(),
            },
            JobParams::SegmentExport { filter, format } => JobKey::Export {
                continent: filter.continent.clone(),
                source: filter.source.clone(),
                engagement: filter.engagement,
                format: *format,
            },
        }
    }
}

/// Logical identity of a job: target plus filter parameters plus format.
/// Two submissions with equal keys compete for the same UI slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKey {
    Campaign {
        campaign_id: String,
    },
    Export {
        continent: Option<String>,
        source: Option<String>,
        engagement: Engagement,
        format: ExportFormat,
    },
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Campaign { campaign_id } => write!(f, "campaign:{campaign_id}"),
            JobKey::Export {
                continent,
                source,
                engagement,
                format,
            } => write!(
                f,
                "export:{}|{}|{}|{}",
                continent.as_deref().unwrap_or("*"),
                source.as_deref().unwrap_or("*"),
                engagement.as_param().unwrap_or("*"),
                format
            ),
        }
    }
}

/// Acknowledgement returned by the gateway when a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReceipt {
    pub id: String,
}

/// A unit of asynchronous backend work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result_ref: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub params: JobParams,
}

impl Job {
    /// Optimistic local record for a submission the gateway just accepted.
    pub fn queued(id: impl Into<String>, params: JobParams, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind: params.kind(),
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result_ref: None,
            error: None,
            params,
        }
    }

    pub fn key(&self) -> JobKey {
        self.params.key()
    }

    pub fn is_in_flight(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Build the successor record from a status lookup. The result is a
    /// whole replacement, never a partial patch of `self`.
    pub fn advanced_by(&self, snapshot: &ProgressSnapshot, now: DateTime<Utc>) -> Job {
        let status = snapshot.derived_status();
        Job {
            id: self.id.clone(),
            kind: self.kind,
            status,
            created_at: self.created_at,
            updated_at: now,
            completed_at: status.is_terminal().then_some(now),
            result_ref: snapshot.file_url.clone(),
            error: snapshot.error.clone(),
            params: self.params.clone(),
        }
    }
}

/// Point-in-time progress counters for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub queued_count: u64,
    #[serde(default)]
    pub processing_count: u64,
    #[serde(default)]
    pub failed_count: u64,
    #[serde(default)]
    pub completed_count: Option<u64>,
    #[serde(default)]
    pub total_count: u64,
    /// Explicit status, reported by export jobs.
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// Terminal once something was enqueued and nothing is still waiting or
    /// in progress. Any failed recipient marks the whole send failed.
    pub fn outcome(&self) -> Option<DeliveryOutcome> {
        if self.total_count > 0 && self.queued_count == 0 && self.processing_count == 0 {
            if self.failed_count > 0 {
                Some(DeliveryOutcome::Failed)
            } else {
                Some(DeliveryOutcome::Sent)
            }
        } else {
            None
        }
    }

    pub fn derived_status(&self) -> JobStatus {
        if let Some(status) = self.status {
            return status;
        }
        match self.outcome() {
            Some(outcome) => outcome.job_status(),
            None if self.processing_count > 0 => JobStatus::Processing,
            None if self.total_count > 0 && self.queued_count < self.total_count => {
                JobStatus::Processing
            }
            None => JobStatus::Queued,
        }
    }
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
}

impl CampaignStatus {
    pub fn as_param(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(CampaignStatus::Draft),
            "scheduled" => Some(CampaignStatus::Scheduled),
            "sending" => Some(CampaignStatus::Sending),
            "sent" => Some(CampaignStatus::Sent),
            "failed" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }

    /// Scheduled campaigns must be unscheduled before they can be deleted.
    pub fn can_delete(self) -> bool {
        matches!(
            self,
            CampaignStatus::Draft
                | CampaignStatus::Sent
                | CampaignStatus::Sending
                | CampaignStatus::Failed
        )
    }

    pub fn can_send_now(self) -> bool {
        self == CampaignStatus::Draft
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subject: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

// ─── Segments ───────────────────────────────────────────────────────────────

/// Named, server-stored copy of a filter selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSegment {
    pub id: String,
    pub name: String,
    pub filter: SegmentFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentBucket {
    pub continent: String,
    pub source: String,
    pub subscribers: u64,
    #[serde(default)]
    pub engaged: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTotals {
    pub subscribers: u64,
    #[serde(default)]
    pub engaged: u64,
    #[serde(default)]
    pub not_engaged: u64,
}

/// Complete, self-consistent audience summary. Snapshots replace one another
/// wholesale; both `segments` and `totals` are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSummary {
    pub segments: Vec<SegmentBucket>,
    pub totals: SummaryTotals,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}
