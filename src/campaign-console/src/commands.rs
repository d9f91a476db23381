use crate::{
    BadgeArg, CampaignCommands, Commands, FilterArgs, LiveCommands, SegmentCommands,
    SessionCommands,
};
use anyhow::{bail, Context};
use campaign_admin_console::filters::MemoryLocation;
use campaign_admin_console::live::SummaryTransport;
use campaign_admin_console::{
    CampaignsView, ConsoleGateway, FilterSelection, LiveState, Poller, SegmentsView,
    StatusBadge, ViewScope,
};
use campaign_core::config::ConsoleConfig;
use campaign_core::storage::{ADMIN_SESSION_KEY, LIVE_UPDATES_KEY};
use campaign_core::types::{CampaignStatus, Engagement, ExportFormat, JobKind};
use campaign_core::KeyValueStore;
use campaign_gateway::SseTransport;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub async fn run(
    command: Commands,
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    store: Arc<dyn KeyValueStore>,
) -> anyhow::Result<()> {
    match command {
        Commands::Export {
            format,
            filters,
            no_wait,
        } => export(config, gateway, store, format, &filters, no_wait).await,
        Commands::Send {
            campaign_id,
            no_wait,
        } => send(config, gateway, &campaign_id, no_wait).await,
        Commands::Jobs { limit } => jobs(config, gateway, limit).await,
        Commands::Watch { job_id } => watch(config, gateway, &job_id).await,
        Commands::Campaigns { action } => campaigns(config, gateway, action).await,
        Commands::Segments { action } => segments(config, gateway, store, action).await,
        Commands::Live { action } => live(config, gateway, store, action).await,
        Commands::Session { action } => {
            match action {
                SessionCommands::Set { token } => store.set(ADMIN_SESSION_KEY, token.trim())?,
                SessionCommands::Clear => store.remove(ADMIN_SESSION_KEY)?,
            }
            info!("Admin session updated");
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn location(filters: &FilterArgs) -> Arc<MemoryLocation> {
    let query = match &filters.query {
        Some(query) => query.clone(),
        None => FilterSelection {
            continent: filters.continent.clone(),
            source: filters.source.clone(),
            engagement: filters
                .engagement
                .as_deref()
                .map(Engagement::from_param)
                .unwrap_or_default(),
            ..Default::default()
        }
        .to_query(),
    };
    Arc::new(MemoryLocation::new(query))
}

fn segments_view(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    store: Arc<dyn KeyValueStore>,
    filters: &FilterArgs,
) -> anyhow::Result<Arc<SegmentsView>> {
    let transport: Arc<dyn SummaryTransport> = Arc::new(SseTransport::new(config)?);
    // one-shot commands never stream; `live on --follow` opens it explicitly
    Ok(SegmentsView::mount_without_stream(
        gateway,
        transport,
        store,
        location(filters),
        config,
    )?)
}

// ─── Jobs ───────────────────────────────────────────────────────────────────

async fn export(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    store: Arc<dyn KeyValueStore>,
    format: ExportFormat,
    filters: &FilterArgs,
    no_wait: bool,
) -> anyhow::Result<()> {
    let view = segments_view(config, gateway, store, filters)?;
    let job = view.export(format).await?;
    info!(job_id = %job.id, key = %job.key(), "Export queued");

    if !no_wait {
        let key = job.key();
        let mut revisions = view.tracker().subscribe();
        loop {
            match view.tracker().current(&key) {
                Some(current) if current.id == job.id && !current.is_in_flight() => {
                    print_json(&current)?;
                    break;
                }
                Some(current) if current.id != job.id => {
                    info!(superseded_by = %current.id, "Export superseded");
                    break;
                }
                _ => {}
            }
            tokio::select! {
                changed = revisions.changed() => if changed.is_err() { break },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    } else {
        print_json(&job)?;
    }
    view.teardown();
    Ok(())
}

async fn send(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    campaign_id: &str,
    no_wait: bool,
) -> anyhow::Result<()> {
    let view = CampaignsView::mount(gateway, Arc::new(MemoryLocation::new("")), config);
    view.load().await;
    let delivery = view.send_now(campaign_id).await?;
    print_json(&delivery.job)?;

    if !no_wait {
        match delivery.outcome.await? {
            Some(outcome) => println!("delivery finished: {outcome:?}"),
            None => println!("stopped waiting for delivery"),
        }
    }
    view.teardown();
    Ok(())
}

async fn jobs(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let limit = limit.unwrap_or(config.polling.history_limit);
    print_json(&gateway.list_recent_jobs(limit).await?)
}

async fn watch(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    job_id: &str,
) -> anyhow::Result<()> {
    let scope = ViewScope::new("cli.watch");
    let poller = Poller::from_config(&config.polling);
    let ctrl_c = {
        let scope = scope.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                scope.teardown();
            }
        })
    };

    let outcome = poller
        .poll_until_done(job_id, &scope, || {
            gateway.job_status(JobKind::CampaignSend, job_id)
        })
        .await?;
    ctrl_c.abort();

    match outcome {
        Some(outcome) => println!("delivery finished: {outcome:?}"),
        None => println!(
            "no terminal state after {} attempts",
            poller.max_attempts()
        ),
    }
    Ok(())
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

async fn campaigns(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    action: CampaignCommands,
) -> anyhow::Result<()> {
    match action {
        CampaignCommands::List {
            status,
            badge,
            search,
        } => {
            let mut selection = FilterSelection::default();
            if let Some(status) = status {
                selection.status = Some(
                    CampaignStatus::from_param(&status)
                        .with_context(|| format!("unknown campaign status '{status}'"))?,
                );
            }
            if let Some(search) = search {
                selection.search = search;
            }
            let view = CampaignsView::mount(
                gateway,
                Arc::new(MemoryLocation::new(selection.to_query())),
                config,
            );
            if let Some(badge) = badge {
                view.set_badge(match badge {
                    BadgeArg::All => StatusBadge::All,
                    BadgeArg::Sent => StatusBadge::Sent,
                    BadgeArg::NotSent => StatusBadge::NotSent,
                });
            }
            view.load().await;
            print_json(&view.visible_campaigns())?;
            view.teardown();
            Ok(())
        }
        CampaignCommands::Delete { campaign_id } => {
            let view = CampaignsView::mount(gateway, Arc::new(MemoryLocation::new("")), config);
            view.load().await;
            view.delete_campaign(&campaign_id).await?;
            println!("deleted {campaign_id}");
            view.teardown();
            Ok(())
        }
    }
}

// ─── Segments ───────────────────────────────────────────────────────────────

async fn segments(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    store: Arc<dyn KeyValueStore>,
    action: SegmentCommands,
) -> anyhow::Result<()> {
    let filters = match &action {
        SegmentCommands::Summary { filters } | SegmentCommands::Save { filters, .. } => {
            filters.clone()
        }
        _ => FilterArgs::default(),
    };
    let view = segments_view(config, gateway, store, &filters)?;

    let result = match action {
        SegmentCommands::Summary { .. } => {
            view.load_summary().await;
            match view.summary() {
                Some(summary) => print_json(&summary),
                None => Err(anyhow::anyhow!("summary unavailable")),
            }
        }
        SegmentCommands::List => {
            view.load_saved_segments().await;
            print_json(&view.saved_segments())
        }
        SegmentCommands::Save { name, .. } => match view.save_segment(&name).await {
            Ok(segment) => print_json(&segment),
            Err(e) => Err(e.into()),
        },
        SegmentCommands::Rename { id, name } => match view.rename_segment(&id, &name).await {
            Ok(segment) => print_json(&segment),
            Err(e) => Err(e.into()),
        },
        SegmentCommands::Delete { id } => view
            .delete_segment(&id)
            .await
            .map(|_| println!("deleted {id}"))
            .map_err(Into::into),
    };
    view.teardown();
    result
}

// ─── Live ───────────────────────────────────────────────────────────────────

async fn live(
    config: &ConsoleConfig,
    gateway: Arc<dyn ConsoleGateway>,
    store: Arc<dyn KeyValueStore>,
    action: LiveCommands,
) -> anyhow::Result<()> {
    match action {
        LiveCommands::Off => {
            store.set_bool(LIVE_UPDATES_KEY, false)?;
            println!("live updates off");
            Ok(())
        }
        LiveCommands::Status => {
            let enabled = store.get_bool(LIVE_UPDATES_KEY).unwrap_or(false);
            println!("live updates {}", if enabled { "on" } else { "off" });
            Ok(())
        }
        LiveCommands::On { follow: false } => {
            store.set_bool(LIVE_UPDATES_KEY, true)?;
            println!("live updates on");
            Ok(())
        }
        LiveCommands::On { follow: true } => {
            let view = segments_view(config, gateway, store, &FilterArgs::default())?;
            view.load_summary().await;
            if let Some(summary) = view.summary() {
                print_json(&summary.totals)?;
            }
            let mut summaries = view.watch_summary();
            let mut states = view.watch_live_state();
            view.set_live(true)?;
            loop {
                tokio::select! {
                    changed = summaries.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let totals = summaries.borrow_and_update().as_ref().map(|s| s.totals.clone());
                        if let Some(totals) = totals {
                            print_json(&totals)?;
                        }
                    }
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *states.borrow_and_update();
                        if state == LiveState::Disabled {
                            view.teardown();
                            bail!("live stream closed; run `live on` to reconnect");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            view.teardown();
            Ok(())
        }
    }
}
