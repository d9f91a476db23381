//! Campaign Console — operator CLI for campaign sends, segment exports and
//! the live audience summary.

use campaign_admin_console::ConsoleGateway;
use campaign_core::config::ConsoleConfig;
use campaign_core::types::ExportFormat;
use campaign_core::{FileStore, KeyValueStore};
use campaign_gateway::HttpGateway;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::{info, warn};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "campaign-console")]
#[command(about = "Operator console for campaign sends, segment exports and live summaries")]
#[command(version)]
struct Cli {
    /// Gateway base URL (overrides config)
    #[arg(long, env = "CAMPAIGN_CONSOLE__API__BASE_URL")]
    api_url: Option<String>,

    /// Admin token (overrides config)
    #[arg(long, env = "CAMPAIGN_CONSOLE__API__ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Preference file (overrides config)
    #[arg(long, env = "CAMPAIGN_CONSOLE__STORAGE__PATH")]
    store: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the audience under the given filters
    Export {
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        #[command(flatten)]
        filters: FilterArgs,
        /// Return once the export is queued
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },
    /// Send a draft campaign now
    Send {
        campaign_id: String,
        /// Return once the send is queued
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },
    /// Show the most recent jobs
    Jobs {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Poll a campaign send job until delivery finishes
    Watch { job_id: String },
    /// Manage campaigns
    Campaigns {
        #[command(subcommand)]
        action: CampaignCommands,
    },
    /// Manage saved segments and the audience summary
    Segments {
        #[command(subcommand)]
        action: SegmentCommands,
    },
    /// Live summary updates
    Live {
        #[command(subcommand)]
        action: LiveCommands,
    },
    /// Admin session used for gateway calls and the live stream
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CampaignCommands {
    /// List campaigns
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, value_enum)]
        badge: Option<BadgeArg>,
        /// Match against name and subject
        #[arg(long)]
        search: Option<String>,
    },
    /// Delete a campaign (not allowed while scheduled)
    Delete { campaign_id: String },
}

#[derive(Subcommand, Debug)]
pub enum SegmentCommands {
    /// Audience summary for the given filters
    Summary {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// List saved segments
    List,
    /// Save the given filters under a name
    Save {
        name: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    Rename { id: String, name: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum LiveCommands {
    /// Turn live updates on
    On {
        /// Stay attached and print every snapshot
        #[arg(long, default_value_t = false)]
        follow: bool,
    },
    Off,
    Status,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    Set { token: String },
    Clear,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BadgeArg {
    All,
    Sent,
    NotSent,
}

/// Audience filters, either as flags or as a shared URL query string.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long)]
    continent: Option<String>,
    #[arg(long)]
    source: Option<String>,
    /// engaged | not_engaged
    #[arg(long)]
    engagement: Option<String>,
    /// Query string copied from a shared console URL
    #[arg(long, conflicts_with_all = ["continent", "source", "engagement"])]
    query: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_console=info,campaign_admin_console=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ConsoleConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        ConsoleConfig::default()
    });

    if let Some(api_url) = cli.api_url {
        config.api.base_url = api_url;
    }
    if let Some(token) = cli.admin_token {
        config.api.admin_token = Some(token);
    }
    if let Some(path) = cli.store {
        config.storage.path = path;
    }

    info!(
        base_url = %config.api.base_url,
        store = %config.storage.path,
        "Configuration loaded"
    );

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.storage.path)?);
    let gateway: Arc<dyn ConsoleGateway> =
        Arc::new(HttpGateway::new(&config, Arc::clone(&store))?);

    commands::run(cli.command, &config, gateway, store).await
}
