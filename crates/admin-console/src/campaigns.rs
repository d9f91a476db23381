//! Campaigns view controller.
//!
//! Composes the job tracker, filter synchronizer and message board into the
//! campaign list: status-filtered loading, send-now with delivery polling,
//! and guarded deletion.

use crate::banner::{Banner, MessageBoard};
use crate::filters::{
    spawn_refetch, FilterEffect, FilterScope, FilterSelection, FilterSynchronizer, Location, StatusBadge,
};
use crate::gateway::ConsoleGateway;
use crate::scope::ViewScope;
use crate::tracker::JobTracker;
use campaign_core::config::ConsoleConfig;
use campaign_core::types::{Campaign, CampaignStatus, DeliveryOutcome, Job, JobParams};
use campaign_core::{ConsoleError, ConsoleResult};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A campaign send that was accepted, with the background delivery watch.
/// `outcome` resolves to `None` when the watch gave up or the view was torn
/// down.
pub struct DeliveryWatch {
    pub job: Job,
    pub outcome: JoinHandle<Option<DeliveryOutcome>>,
}

pub struct CampaignsView {
    gateway: Arc<dyn ConsoleGateway>,
    tracker: Arc<JobTracker>,
    filters: Arc<FilterSynchronizer>,
    messages: MessageBoard,
    campaigns: Arc<watch::Sender<Vec<Campaign>>>,
    scope: ViewScope,
}

impl CampaignsView {
    /// Build the view and start its background work: the debounced list
    /// refetch and the job history refresh.
    pub fn mount(
        gateway: Arc<dyn ConsoleGateway>,
        location: Arc<dyn Location>,
        config: &ConsoleConfig,
    ) -> Arc<Self> {
        let scope = ViewScope::new("campaigns");
        let tracker = Arc::new(JobTracker::new(
            Arc::clone(&gateway),
            &config.polling,
            scope.child("campaigns.jobs"),
        ));
        let filters = Arc::new(FilterSynchronizer::mount(location, FilterScope::Campaigns));
        let (campaigns, _) = watch::channel(Vec::new());
        let campaigns = Arc::new(campaigns);

        let fetch_gateway = Arc::clone(&gateway);
        let sink = Arc::clone(&campaigns);
        spawn_refetch(
            filters.subscribe(),
            config.polling.filter_debounce(),
            scope.clone(),
            move |query| {
                let gateway = Arc::clone(&fetch_gateway);
                async move { gateway.list_campaigns(query.status).await }
            },
            move |list| {
                sink.send_replace(list);
            },
        );
        tracker.spawn_history_refresh();

        info!("Campaigns view mounted");
        Arc::new(Self {
            gateway,
            tracker,
            filters,
            messages: MessageBoard::for_campaigns(&config.messages),
            campaigns,
            scope,
        })
    }

    /// Load the list for the current status filter. Failures keep the
    /// previous list; results arriving after teardown are dropped.
    pub async fn load(&self) {
        let status = self.filters.server_query().status;
        match self.scope.run(self.gateway.list_campaigns(status)).await {
            Some(Ok(list)) => {
                debug!(count = list.len(), "Campaign list loaded");
                self.campaigns.send_replace(list);
            }
            Some(Err(e)) => warn!(error = %e, "Campaign list load failed"),
            None => {}
        }
    }

    // ─── Actions ────────────────────────────────────────────────────────

    /// Send a draft campaign now and watch its delivery in the background.
    pub async fn send_now(self: &Arc<Self>, campaign_id: &str) -> ConsoleResult<DeliveryWatch> {
        match self.try_send_now(campaign_id).await {
            Ok(job) => {
                self.messages.set_status("Campaign queued for sending");
                let outcome = self.watch_delivery(job.clone());
                Ok(DeliveryWatch { job, outcome })
            }
            Err(e) => {
                self.report_error(&e);
                Err(e)
            }
        }
    }

    async fn try_send_now(&self, campaign_id: &str) -> ConsoleResult<Job> {
        let campaign = self.find(campaign_id)?;
        if !campaign.status.can_send_now() {
            return Err(ConsoleError::NotAllowed(format!(
                "Campaign \"{}\" is {} and cannot be sent now",
                campaign.name, campaign.status
            )));
        }
        let job = self
            .tracker
            .submit(JobParams::CampaignSend {
                campaign_id: campaign_id.to_string(),
            })
            .await?;
        self.set_local_status(campaign_id, CampaignStatus::Sending);
        Ok(job)
    }

    fn watch_delivery(self: &Arc<Self>, job: Job) -> JoinHandle<Option<DeliveryOutcome>> {
        let view = Arc::clone(self);
        tokio::spawn(async move {
            let result = view.tracker.poll_until_done(&job).await;
            match &result {
                Ok(Some(DeliveryOutcome::Sent)) => {
                    view.messages.set_status("Campaign sent");
                }
                Ok(Some(DeliveryOutcome::Failed)) => {
                    view.messages.set_error("Campaign finished with failed deliveries");
                }
                Ok(None) => debug!(job_id = %job.id, "Stopped waiting for delivery"),
                // a failed status lookup only ends the watch
                Err(_) => {}
            }
            view.load().await;
            result.ok().flatten()
        })
    }

    /// Delete a campaign. Scheduled campaigns are refused before any
    /// gateway call.
    pub async fn delete_campaign(&self, campaign_id: &str) -> ConsoleResult<()> {
        let result = self.try_delete(campaign_id).await;
        match &result {
            Ok(()) => self.messages.set_status("Campaign deleted"),
            Err(e) => self.report_error(e),
        }
        result
    }

    async fn try_delete(&self, campaign_id: &str) -> ConsoleResult<()> {
        let campaign = self.find(campaign_id)?;
        if !campaign.status.can_delete() {
            return Err(ConsoleError::NotAllowed(format!(
                "Campaign \"{}\" is {} and cannot be deleted",
                campaign.name, campaign.status
            )));
        }
        self.scope
            .attach("campaign delete", self.gateway.delete_campaign(campaign_id))
            .await?;
        self.campaigns
            .send_modify(|list| list.retain(|c| c.id != campaign_id));
        info!(campaign_id, "Campaign deleted");
        Ok(())
    }

    pub fn set_status_filter(&self, status: Option<CampaignStatus>) -> FilterEffect {
        self.filters.set_status(status)
    }

    pub fn set_badge(&self, badge: StatusBadge) -> FilterEffect {
        self.filters.set_badge(badge)
    }

    pub fn set_search(&self, search: impl Into<String>) -> FilterEffect {
        self.filters.set_search(search)
    }

    /// Stop every loop this view started. In-flight calls finish but their
    /// results are ignored.
    pub fn teardown(&self) {
        self.scope.teardown();
        self.messages.clear();
        info!("Campaigns view torn down");
    }

    // ─── Selectors ──────────────────────────────────────────────────────

    /// Loaded campaigns narrowed by the client-side search text.
    pub fn visible_campaigns(&self) -> Vec<Campaign> {
        let selection = self.filters.selection();
        self.campaigns
            .borrow()
            .iter()
            .filter(|c| selection.matches_campaign(c))
            .cloned()
            .collect()
    }

    pub fn watch_campaigns(&self) -> watch::Receiver<Vec<Campaign>> {
        self.campaigns.subscribe()
    }

    pub fn selection(&self) -> FilterSelection {
        self.filters.selection()
    }

    pub fn banner(&self) -> Banner {
        self.messages.banner()
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    fn find(&self, campaign_id: &str) -> ConsoleResult<Campaign> {
        self.campaigns
            .borrow()
            .iter()
            .find(|c| c.id == campaign_id)
            .cloned()
            .ok_or_else(|| ConsoleError::Validation(format!("Unknown campaign {campaign_id}")))
    }

    fn report_error(&self, error: &ConsoleError) {
        if error.is_detached() {
            debug!(error = %error, "Campaign action resolved after teardown");
        } else {
            self.messages.set_error(error.user_message());
        }
    }

    fn set_local_status(&self, campaign_id: &str, status: CampaignStatus) {
        self.campaigns.send_modify(|list| {
            if let Some(campaign) = list.iter_mut().find(|c| c.id == campaign_id) {
                campaign.status = status;
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::filters::MemoryLocation;
    use crate::testing::ScriptedGateway;
    use campaign_core::types::ProgressSnapshot;
    use chrono::Utc;
    use std::time::Duration;

    fn campaign(id: &str, name: &str, status: CampaignStatus) -> Campaign {
        Campaign {
            id: id.into(),
            name: name.into(),
            subject: format!("{name} subject"),
            status,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    async fn mounted(gateway: &Arc<ScriptedGateway>, query: &str) -> Arc<CampaignsView> {
        let view = CampaignsView::mount(
            gateway.clone(),
            Arc::new(MemoryLocation::new(query)),
            &ConsoleConfig::default(),
        );
        view.load().await;
        view
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_campaign_cannot_be_deleted() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![campaign("c-1", "Spring", CampaignStatus::Scheduled)]);
        let view = mounted(&gateway, "").await;

        let err = view.delete_campaign("c-1").await.unwrap_err();
        assert!(matches!(err, ConsoleError::NotAllowed(_)));
        assert!(gateway.deleted_campaigns().is_empty());
        assert!(view.banner().error.unwrap().contains("cannot be deleted"));
        view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_from_list() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![
            campaign("c-1", "Spring", CampaignStatus::Draft),
            campaign("c-2", "Summer", CampaignStatus::Sent),
        ]);
        let view = mounted(&gateway, "").await;

        view.delete_campaign("c-2").await.unwrap();
        assert_eq!(view.visible_campaigns().len(), 1);
        assert_eq!(view.banner().status.as_deref(), Some("Campaign deleted"));
        view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_resolved_after_teardown_leaves_view_untouched() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![campaign("c-1", "Spring", CampaignStatus::Draft)]);
        let view = mounted(&gateway, "").await;
        gateway.delay_mutations(Duration::from_secs(2));
        let mut updates = view.watch_campaigns();
        updates.borrow_and_update();

        let deleting = {
            let view = Arc::clone(&view);
            tokio::spawn(async move { view.delete_campaign("c-1").await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        view.teardown();

        assert!(deleting.await.unwrap().unwrap_err().is_detached());
        assert_eq!(gateway.deleted_campaigns(), vec!["c-1".to_string()]);
        assert!(!updates.has_changed().unwrap());
        assert_eq!(view.visible_campaigns().len(), 1);
        assert_eq!(view.banner(), Banner::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_submitted_after_teardown_is_not_tracked() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![campaign("c-1", "Spring", CampaignStatus::Draft)]);
        let view = mounted(&gateway, "").await;
        gateway.delay_mutations(Duration::from_secs(2));

        let sending = {
            let view = Arc::clone(&view);
            tokio::spawn(async move { view.send_now("c-1").await.map(|d| d.job) })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        view.teardown();

        assert!(sending.await.unwrap().unwrap_err().is_detached());
        assert!(view.tracker().is_empty());
        assert_eq!(view.visible_campaigns()[0].status, CampaignStatus::Draft);
        assert_eq!(view.banner(), Banner::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_now_only_from_draft() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![campaign("c-1", "Spring", CampaignStatus::Sent)]);
        let view = mounted(&gateway, "").await;

        assert!(matches!(
            view.send_now("c-1").await,
            Err(ConsoleError::NotAllowed(_))
        ));
        assert!(gateway.created().is_empty());
        view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_now_polls_to_sent() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![campaign("c-1", "Spring", CampaignStatus::Draft)]);
        let view = mounted(&gateway, "").await;

        let job = view.send_now("c-1").await.unwrap().job;
        gateway.script_status(
            &job.id,
            vec![
                ProgressSnapshot {
                    queued_count: 10,
                    total_count: 10,
                    ..Default::default()
                },
                ProgressSnapshot {
                    total_count: 10,
                    ..Default::default()
                },
            ],
        );
        assert_eq!(view.visible_campaigns()[0].status, CampaignStatus::Sending);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(view.banner().status.as_deref(), Some("Campaign sent"));
        view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_error_is_shown() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![campaign("c-1", "Spring", CampaignStatus::Draft)]);
        gateway.fail_submissions("Sender domain not verified");
        let view = mounted(&gateway, "").await;

        assert!(view.send_now("c-1").await.is_err());
        assert_eq!(
            view.banner().error.as_deref(),
            Some("Sender domain not verified")
        );
        assert!(view.tracker().is_empty());

        tokio::time::sleep(Duration::from_millis(4001)).await;
        assert_eq!(view.banner().error, None);
        view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_filter_refetches_and_search_does_not() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_campaigns(vec![
            campaign("c-1", "Spring promo", CampaignStatus::Draft),
            campaign("c-2", "Summer promo", CampaignStatus::Sent),
            campaign("c-3", "Welcome", CampaignStatus::Sent),
        ]);
        let view = mounted(&gateway, "").await;
        assert_eq!(gateway.campaign_queries(), vec![None]);

        assert_eq!(view.set_badge(StatusBadge::Sent), FilterEffect::Refetch);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            gateway.campaign_queries(),
            vec![None, Some(CampaignStatus::Sent)]
        );
        assert_eq!(view.visible_campaigns().len(), 2);

        assert_eq!(view.set_search("promo"), FilterEffect::LocalOnly);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(gateway.campaign_queries().len(), 2);
        assert_eq!(view.visible_campaigns().len(), 1);
        view.teardown();
    }
}
