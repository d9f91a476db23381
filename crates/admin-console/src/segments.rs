//! Segments view controller.
//!
//! Owns the audience summary (loaded on demand, refetched when the audience
//! filters change, replaced wholesale by live snapshots), segment exports
//! and the saved-segment list.

use crate::banner::{Banner, MessageBoard};
use crate::filters::{
    spawn_refetch, FilterEffect, FilterScope, FilterSelection, FilterSynchronizer, Location,
};
use crate::gateway::ConsoleGateway;
use crate::live::{summary_slot, LiveState, StreamSubscriber, SummarySlot, SummaryTransport};
use crate::scope::ViewScope;
use crate::tracker::JobTracker;
use campaign_core::config::ConsoleConfig;
use campaign_core::storage::KeyValueStore;
use campaign_core::types::{
    Engagement, ExportFormat, Job, JobKind, JobParams, SavedSegment, SegmentBucket,
    SegmentSummary,
};
use campaign_core::{ConsoleError, ConsoleResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct SegmentsView {
    gateway: Arc<dyn ConsoleGateway>,
    tracker: Arc<JobTracker>,
    filters: Arc<FilterSynchronizer>,
    live: Arc<StreamSubscriber>,
    messages: MessageBoard,
    summary: SummarySlot,
    saved: RwLock<Vec<SavedSegment>>,
    scope: ViewScope,
}

impl SegmentsView {
    /// Build the view, start the summary refetch, export watch and history
    /// refresh, and reopen the live stream if the operator left it on.
    pub fn mount(
        gateway: Arc<dyn ConsoleGateway>,
        transport: Arc<dyn SummaryTransport>,
        store: Arc<dyn KeyValueStore>,
        location: Arc<dyn Location>,
        config: &ConsoleConfig,
    ) -> ConsoleResult<Arc<Self>> {
        let view = Self::mount_without_stream(gateway, transport, store, location, config)?;
        view.live.restore();
        Ok(view)
    }

    /// Like [`mount`](Self::mount) but leaves the live stream closed whatever
    /// the stored preference says. The preference itself is untouched.
    pub fn mount_without_stream(
        gateway: Arc<dyn ConsoleGateway>,
        transport: Arc<dyn SummaryTransport>,
        store: Arc<dyn KeyValueStore>,
        location: Arc<dyn Location>,
        config: &ConsoleConfig,
    ) -> ConsoleResult<Arc<Self>> {
        let scope = ViewScope::new("segments");
        let summary = summary_slot();
        let live = Arc::new(StreamSubscriber::new(
            transport,
            store,
            config,
            scope.child("segments.live"),
            Arc::clone(&summary),
        )?);
        let tracker = Arc::new(JobTracker::new(
            Arc::clone(&gateway),
            &config.polling,
            scope.child("segments.exports"),
        ));
        let filters = Arc::new(FilterSynchronizer::mount(location, FilterScope::Segments));

        let fetch_gateway = Arc::clone(&gateway);
        let sink = Arc::clone(&summary);
        spawn_refetch(
            filters.subscribe(),
            config.polling.filter_debounce(),
            scope.clone(),
            move |query| {
                let gateway = Arc::clone(&fetch_gateway);
                async move { gateway.segment_summary(&query.segment).await }
            },
            move |loaded| {
                sink.send_replace(Some(loaded));
            },
        );
        tracker.spawn_history_refresh();
        tracker.spawn_export_watch();

        info!("Segments view mounted");
        Ok(Arc::new(Self {
            gateway,
            tracker,
            filters,
            live,
            messages: MessageBoard::for_segments(&config.messages),
            summary,
            saved: RwLock::new(Vec::new()),
            scope,
        }))
    }

    // ─── Loading ────────────────────────────────────────────────────────

    /// Fetch the summary for the current audience filters. A result that
    /// arrives after teardown is discarded; a failure keeps the old summary.
    pub async fn load_summary(&self) {
        let filter = self.filters.selection().segment_filter();
        match self.scope.run(self.gateway.segment_summary(&filter)).await {
            Some(Ok(summary)) => {
                debug!(buckets = summary.segments.len(), "Segment summary loaded");
                self.summary.send_replace(Some(summary));
            }
            Some(Err(e)) => warn!(error = %e, "Segment summary load failed"),
            None => debug!("Segment summary discarded after teardown"),
        }
    }

    /// Best-effort: failures leave the current list in place.
    pub async fn load_saved_segments(&self) {
        match self.scope.run(self.gateway.list_saved_segments()).await {
            Some(Ok(segments)) => *self.saved.write() = segments,
            Some(Err(e)) => debug!(error = %e, "Saved segment list unavailable"),
            None => {}
        }
    }

    // ─── Exports ────────────────────────────────────────────────────────

    /// Export the audience under the current filters. A second export with
    /// the same filters and format takes over the first one's slot.
    pub async fn export(&self, format: ExportFormat) -> ConsoleResult<Job> {
        let filter = self.filters.selection().segment_filter();
        let result = self
            .tracker
            .submit(JobParams::SegmentExport { filter, format })
            .await;
        match &result {
            Ok(_) => self.messages.set_status(format!("{format} export queued")),
            Err(e) => self.report_error(e),
        }
        result
    }

    /// Current export per key, newest first.
    pub fn exports(&self) -> Vec<Job> {
        self.tracker
            .jobs_by_key()
            .into_iter()
            .map(|(_, job)| job)
            .filter(|job| job.kind == JobKind::SegmentExport)
            .collect()
    }

    /// Exports from the last history refresh, in server order.
    pub fn export_history(&self) -> Vec<Job> {
        self.tracker
            .history()
            .into_iter()
            .filter(|job| job.kind == JobKind::SegmentExport)
            .collect()
    }

    // ─── Saved segments ─────────────────────────────────────────────────

    pub async fn save_segment(&self, name: &str) -> ConsoleResult<SavedSegment> {
        let result = self.try_save(name).await;
        self.report(&result, "Segment saved");
        result
    }

    async fn try_save(&self, name: &str) -> ConsoleResult<SavedSegment> {
        let name = validate_name(name)?;
        let filter = self.filters.selection().segment_filter();
        let segment = self
            .scope
            .attach("segment save", self.gateway.create_saved_segment(name, &filter))
            .await?;
        info!(segment_id = %segment.id, name = %segment.name, "Segment saved");
        self.saved.write().push(segment.clone());
        Ok(segment)
    }

    pub async fn rename_segment(&self, id: &str, name: &str) -> ConsoleResult<SavedSegment> {
        let result = self.try_rename(id, name).await;
        self.report(&result, "Segment renamed");
        result
    }

    async fn try_rename(&self, id: &str, name: &str) -> ConsoleResult<SavedSegment> {
        let name = validate_name(name)?;
        let renamed = self
            .scope
            .attach("segment rename", self.gateway.rename_saved_segment(id, name))
            .await?;
        if let Some(slot) = self.saved.write().iter_mut().find(|s| s.id == id) {
            *slot = renamed.clone();
        }
        Ok(renamed)
    }

    pub async fn delete_segment(&self, id: &str) -> ConsoleResult<()> {
        let result = self
            .scope
            .attach("segment delete", self.gateway.delete_saved_segment(id))
            .await;
        if result.is_ok() {
            self.saved.write().retain(|s| s.id != id);
        }
        self.report(&result, "Segment deleted");
        result
    }

    /// Load a saved segment's filter into the current selection.
    pub fn apply_saved_segment(&self, id: &str) -> ConsoleResult<FilterEffect> {
        let filter = self
            .saved
            .read()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.filter.clone())
            .ok_or_else(|| ConsoleError::Validation(format!("Unknown segment {id}")))?;
        Ok(self.filters.apply_segment(&filter))
    }

    pub fn saved_segments(&self) -> Vec<SavedSegment> {
        self.saved.read().clone()
    }

    fn report<T>(&self, result: &ConsoleResult<T>, success: &str) {
        match result {
            Ok(_) => self.messages.set_status(success),
            Err(e) => self.report_error(e),
        }
    }

    fn report_error(&self, error: &ConsoleError) {
        if error.is_detached() {
            debug!(error = %error, "Segment action resolved after teardown");
        } else {
            self.messages.set_error(error.user_message());
        }
    }

    // ─── Filters ────────────────────────────────────────────────────────

    pub fn set_continent(&self, continent: Option<String>) -> FilterEffect {
        self.filters.set_continent(continent)
    }

    pub fn set_source(&self, source: Option<String>) -> FilterEffect {
        self.filters.set_source(source)
    }

    pub fn set_engagement(&self, engagement: Engagement) -> FilterEffect {
        self.filters.set_engagement(engagement)
    }

    pub fn set_search(&self, search: impl Into<String>) -> FilterEffect {
        self.filters.set_search(search)
    }

    pub fn selection(&self) -> FilterSelection {
        self.filters.selection()
    }

    // ─── Live updates ───────────────────────────────────────────────────

    /// The "Live: on/off" toggle.
    pub fn set_live(&self, enabled: bool) -> ConsoleResult<()> {
        self.live.set_enabled(enabled)
    }

    pub fn live_state(&self) -> LiveState {
        self.live.state()
    }

    pub fn watch_live_state(&self) -> watch::Receiver<LiveState> {
        self.live.watch_state()
    }

    // ─── Selectors ──────────────────────────────────────────────────────

    pub fn summary(&self) -> Option<SegmentSummary> {
        self.summary.borrow().clone()
    }

    pub fn watch_summary(&self) -> watch::Receiver<Option<SegmentSummary>> {
        self.summary.subscribe()
    }

    /// Summary buckets narrowed by the client-side search text.
    pub fn visible_buckets(&self) -> Vec<SegmentBucket> {
        let selection = self.filters.selection();
        self.summary
            .borrow()
            .as_ref()
            .map(|s| {
                s.segments
                    .iter()
                    .filter(|b| selection.matches_bucket(b))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn banner(&self) -> Banner {
        self.messages.banner()
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Close the stream and stop every loop. The live preference is kept so
    /// the next mount can restore it.
    pub fn teardown(&self) {
        self.scope.teardown();
        self.live.stop();
        self.messages.clear();
        info!("Segments view torn down");
    }
}

fn validate_name(name: &str) -> ConsoleResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConsoleError::Validation(
            "Segment name must not be empty".into(),
        ));
    }
    Ok(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::filters::MemoryLocation;
    use crate::live::StreamEvent;
    use crate::testing::{ChannelTransport, ScriptedGateway};
    use campaign_core::storage::{MemoryStore, LIVE_UPDATES_KEY};
    use campaign_core::types::{JobStatus, ProgressSnapshot, SegmentFilter, SummaryTotals};
    use std::time::Duration;

    struct Harness {
        gateway: Arc<ScriptedGateway>,
        transport: Arc<ChannelTransport>,
        store: Arc<MemoryStore>,
        view: Arc<SegmentsView>,
    }

    fn mount(query: &str) -> Harness {
        let gateway = Arc::new(ScriptedGateway::new());
        let transport = Arc::new(ChannelTransport::new());
        let store = MemoryStore::shared();
        let view = SegmentsView::mount(
            gateway.clone(),
            transport.clone(),
            store.clone(),
            Arc::new(MemoryLocation::new(query)),
            &ConsoleConfig::default(),
        )
        .unwrap();
        Harness {
            gateway,
            transport,
            store,
            view,
        }
    }

    fn summary(subscribers: u64) -> SegmentSummary {
        SegmentSummary {
            segments: vec![
                SegmentBucket {
                    continent: "EU".into(),
                    source: "web".into(),
                    subscribers,
                    engaged: 1,
                },
                SegmentBucket {
                    continent: "NA".into(),
                    source: "import".into(),
                    subscribers: 3,
                    engaged: 0,
                },
            ],
            totals: SummaryTotals {
                subscribers: subscribers + 3,
                engaged: 1,
                not_engaged: subscribers + 2,
            },
            generated_at: None,
        }
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_uses_current_filters() {
        let h = mount("continent=EU&engagement=engaged");
        let job = h.view.export(ExportFormat::Csv).await.unwrap();

        assert_eq!(
            job.params,
            JobParams::SegmentExport {
                filter: SegmentFilter {
                    continent: Some("EU".into()),
                    source: None,
                    engagement: Engagement::Engaged,
                },
                format: ExportFormat::Csv,
            }
        );
        assert_eq!(h.view.banner().status.as_deref(), Some("csv export queued"));
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_export_keeps_one_entry_per_key() {
        let h = mount("continent=EU");
        h.view.export(ExportFormat::Csv).await.unwrap();
        let second = h.view.export(ExportFormat::Csv).await.unwrap();
        h.view.export(ExportFormat::Json).await.unwrap();

        let exports = h.view.exports();
        assert_eq!(exports.len(), 2);
        assert!(exports.iter().any(|j| j.id == second.id));
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_watch_completes_job() {
        let h = mount("");
        let job = h.view.export(ExportFormat::Json).await.unwrap();
        h.gateway.script_status(
            &job.id,
            vec![ProgressSnapshot {
                status: Some(JobStatus::Completed),
                file_url: Some("https://files.example.com/export.json".into()),
                ..Default::default()
            }],
        );

        tokio::time::sleep(Duration::from_millis(3100)).await;
        let tracked = h.view.exports().pop().unwrap();
        assert_eq!(tracked.status, JobStatus::Completed);
        assert_eq!(
            tracked.result_ref.as_deref(),
            Some("https://files.example.com/export.json")
        );
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_segment_name_is_rejected() {
        let h = mount("");
        let err = h.view.save_segment("   ").await.unwrap_err();
        assert!(err.is_rejected_locally());
        assert!(h.gateway.saved_segments().is_empty());
        assert_eq!(
            h.view.banner().error.as_deref(),
            Some("Segment name must not be empty")
        );

        tokio::time::sleep(Duration::from_millis(2201)).await;
        assert_eq!(h.view.banner().error, None);
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_saved_segment_lifecycle() {
        let h = mount("continent=EU&source=web");
        let saved = h.view.save_segment("  EU web  ").await.unwrap();
        assert_eq!(saved.name, "EU web");
        assert_eq!(saved.filter.continent.as_deref(), Some("EU"));

        let renamed = h.view.rename_segment(&saved.id, "Europe web").await.unwrap();
        assert_eq!(h.view.saved_segments(), vec![renamed]);
        assert_eq!(h.view.banner().status.as_deref(), Some("Segment renamed"));

        h.view.delete_segment(&saved.id).await.unwrap();
        assert!(h.view.saved_segments().is_empty());
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_saved_list_failure_keeps_current_list() {
        let h = mount("continent=EU");
        h.view.save_segment("EU").await.unwrap();
        h.gateway.fail_saved_segments(true);

        h.view.load_saved_segments().await;
        assert_eq!(h.view.saved_segments().len(), 1);
        assert_eq!(h.view.banner().error, None);
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_applying_saved_segment_refetches_summary() {
        let h = mount("");
        h.gateway.set_saved_segments(vec![SavedSegment {
            id: "seg-9".into(),
            name: "NA imports".into(),
            filter: SegmentFilter {
                continent: Some("NA".into()),
                source: Some("import".into()),
                engagement: Engagement::Any,
            },
        }]);
        h.gateway.set_summary(summary(5));
        h.view.load_saved_segments().await;

        assert_eq!(
            h.view.apply_saved_segment("seg-9").unwrap(),
            FilterEffect::Refetch
        );
        tokio::time::sleep(Duration::from_millis(301)).await;
        settle().await;

        let queries = h.gateway.summary_queries();
        assert_eq!(queries.last().unwrap().continent.as_deref(), Some("NA"));
        assert!(h.view.summary().is_some());
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_without_stream_ignores_live_preference() {
        let gateway = Arc::new(ScriptedGateway::new());
        let transport = Arc::new(ChannelTransport::new());
        let store = MemoryStore::shared();
        store.set_bool(LIVE_UPDATES_KEY, true).unwrap();

        let view = SegmentsView::mount_without_stream(
            gateway,
            transport.clone(),
            store.clone(),
            Arc::new(MemoryLocation::new("")),
            &ConsoleConfig::default(),
        )
        .unwrap();
        settle().await;
        assert_eq!(transport.connects(), 0);
        assert_eq!(view.live_state(), LiveState::Disabled);
        assert_eq!(store.get_bool(LIVE_UPDATES_KEY), Some(true));
        view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_segment_save_resolved_after_teardown_is_not_applied() {
        let h = mount("continent=EU");
        h.gateway.delay_mutations(Duration::from_secs(2));

        let view = Arc::clone(&h.view);
        let save = tokio::spawn(async move { view.save_segment("Europe").await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.view.teardown();

        let err = save.await.unwrap().unwrap_err();
        assert!(err.is_detached());
        assert_eq!(h.gateway.saved_segments().len(), 1);
        assert!(h.view.saved_segments().is_empty());
        assert_eq!(h.view.banner(), Banner::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_after_teardown_is_discarded() {
        let h = mount("");
        h.gateway.set_summary(summary(5));
        h.gateway.delay_summary(Duration::from_secs(2));

        let view = Arc::clone(&h.view);
        let load = tokio::spawn(async move { view.load_summary().await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.view.teardown();
        load.await.unwrap();

        assert_eq!(h.view.summary(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_filters_buckets_locally() {
        let h = mount("");
        h.gateway.set_summary(summary(5));
        h.view.load_summary().await;
        assert_eq!(h.view.visible_buckets().len(), 2);

        assert_eq!(h.view.set_search("import"), FilterEffect::LocalOnly);
        let visible = h.view.visible_buckets();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].continent, "NA");
        assert_eq!(h.gateway.summary_queries().len(), 1);
        h.view.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_snapshot_replaces_loaded_summary() {
        let h = mount("");
        h.gateway.set_summary(summary(5));
        h.view.load_summary().await;

        h.view.set_live(true).unwrap();
        settle().await;
        assert_eq!(h.view.live_state(), LiveState::Open);

        let pushed = summary(40);
        h.transport
            .push(StreamEvent::new(
                "segments",
                serde_json::to_string(&pushed).unwrap(),
            ))
            .await;
        settle().await;
        assert_eq!(h.view.summary(), Some(pushed));

        h.view.teardown();
        assert_eq!(h.view.live_state(), LiveState::Disabled);
        assert_eq!(h.store.get_bool(LIVE_UPDATES_KEY), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_restores_live_preference() {
        let gateway = Arc::new(ScriptedGateway::new());
        let transport = Arc::new(ChannelTransport::new());
        let store = MemoryStore::shared();
        store.set_bool(LIVE_UPDATES_KEY, true).unwrap();

        let view = SegmentsView::mount(
            gateway,
            transport.clone(),
            store,
            Arc::new(MemoryLocation::new("")),
            &ConsoleConfig::default(),
        )
        .unwrap();
        settle().await;
        assert_eq!(transport.connects(), 1);
        assert_eq!(view.live_state(), LiveState::Open);
        view.teardown();
    }
}
