//! Live summary stream subscriber.
//!
//! Manages a single server-push subscription that keeps the segment summary
//! current without polling:
//!
//! ```text
//! disabled → connecting → open → (message)* → open
//!                           open → closed(error) → disabled
//! ```
//!
//! There is no automatic reconnect. A transport error tears the
//! subscription down and switches the persisted preference off; the
//! operator re-enables it explicitly. Each `segments` event carries a
//! complete snapshot that replaces the local summary; malformed payloads are
//! dropped.

use crate::scope::ViewScope;
use async_trait::async_trait;
use campaign_core::config::ConsoleConfig;
use campaign_core::storage::{KeyValueStore, ADMIN_SESSION_KEY, LIVE_UPDATES_KEY};
use campaign_core::types::SegmentSummary;
use campaign_core::{ConsoleError, ConsoleResult};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// One named event received from the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: String,
    pub data: String,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = ConsoleResult<StreamEvent>> + Send>>;

/// Opens the push channel. Implemented over server-sent events by
/// `campaign-gateway`.
#[async_trait]
pub trait SummaryTransport: Send + Sync {
    async fn connect(&self, url: &Url) -> ConsoleResult<EventStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Disabled,
    Connecting,
    Open,
    Closed,
}

/// Session credentials for the push channel. The transport cannot carry
/// custom headers, so they travel as query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminCredentials {
    pub session: Option<String>,
    pub token: Option<String>,
}

impl AdminCredentials {
    pub fn from_store(store: &dyn KeyValueStore, token: Option<String>) -> Self {
        Self {
            session: store.get(ADMIN_SESSION_KEY).filter(|s| !s.is_empty()),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn apply_to(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if let Some(session) = &self.session {
            pairs.append_pair("adminSession", session);
        }
        if let Some(token) = &self.token {
            pairs.append_pair("adminToken", token);
        }
    }
}

/// Shared, wholesale-replaced summary slot.
pub type SummarySlot = Arc<watch::Sender<Option<SegmentSummary>>>;

pub fn summary_slot() -> SummarySlot {
    let (tx, _) = watch::channel(None);
    Arc::new(tx)
}

struct Connection {
    generation: u64,
    cancel: CancellationToken,
}

pub struct StreamSubscriber {
    transport: Arc<dyn SummaryTransport>,
    store: Arc<dyn KeyValueStore>,
    stream_url: Url,
    event_name: String,
    admin_token: Option<String>,
    scope: ViewScope,
    summary: SummarySlot,
    state: watch::Sender<LiveState>,
    connection: Mutex<Option<Connection>>,
    generations: Mutex<u64>,
}

impl StreamSubscriber {
    pub fn new(
        transport: Arc<dyn SummaryTransport>,
        store: Arc<dyn KeyValueStore>,
        config: &ConsoleConfig,
        scope: ViewScope,
        summary: SummarySlot,
    ) -> ConsoleResult<Self> {
        let base = Url::parse(&config.api.base_url).map_err(|e| {
            ConsoleError::Config(format!("invalid base_url '{}': {}", config.api.base_url, e))
        })?;
        let stream_url = base.join(&config.live.stream_path).map_err(|e| {
            ConsoleError::Config(format!(
                "invalid stream_path '{}': {}",
                config.live.stream_path, e
            ))
        })?;
        let (state, _) = watch::channel(LiveState::Disabled);
        Ok(Self {
            transport,
            store,
            stream_url,
            event_name: config.live.event_name.clone(),
            admin_token: config.api.admin_token.clone(),
            scope,
            summary,
            state,
            connection: Mutex::new(None),
            generations: Mutex::new(0),
        })
    }

    pub fn state(&self) -> LiveState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LiveState> {
        self.state.subscribe()
    }

    /// The persisted "live updates enabled" preference.
    pub fn preference(&self) -> bool {
        self.store.get_bool(LIVE_UPDATES_KEY).unwrap_or(false)
    }

    /// Stream URL with the current credentials attached.
    pub fn subscription_url(&self) -> Url {
        let mut url = self.stream_url.clone();
        AdminCredentials::from_store(self.store.as_ref(), self.admin_token.clone())
            .apply_to(&mut url);
        url
    }

    /// Reconnect on view mount if the operator left live updates on.
    pub fn restore(self: &Arc<Self>) {
        if self.preference() {
            self.start();
        }
    }

    /// The "Live: on/off" toggle. Persists the choice, then opens or
    /// closes the subscription.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) -> ConsoleResult<()> {
        self.store.set_bool(LIVE_UPDATES_KEY, enabled)?;
        if enabled {
            self.start();
        } else {
            self.stop();
        }
        Ok(())
    }

    /// Open the subscription unless one is already active.
    pub fn start(self: &Arc<Self>) {
        if !self.scope.is_alive() {
            return;
        }
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return;
        }

        let generation = {
            let mut generations = self.generations.lock();
            *generations += 1;
            *generations
        };
        let cancel = self.scope.token().child_token();
        *connection = Some(Connection {
            generation,
            cancel: cancel.clone(),
        });
        drop(connection);

        self.state.send_replace(LiveState::Connecting);
        let subscriber = Arc::clone(self);
        tokio::spawn(async move { subscriber.run(generation, cancel).await });
    }

    /// Close the subscription without touching the stored preference.
    pub fn stop(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.cancel.cancel();
            info!("Live summary stream closed");
        }
        self.state.send_replace(LiveState::Disabled);
    }

    async fn run(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let url = self.subscription_url();
        debug!(path = url.path(), "Connecting to live summary stream");

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            connected = self.transport.connect(&url) => connected,
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(generation, e);
                return;
            }
        };
        if cancel.is_cancelled() {
            return;
        }
        self.state.send_replace(LiveState::Open);
        info!("Live summary stream open");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        self.handle_event(&event);
                    }
                    Some(Err(e)) => {
                        self.fail(generation, e);
                        break;
                    }
                    None => {
                        self.fail(generation, ConsoleError::Stream("closed by server".into()));
                        break;
                    }
                },
            }
        }
    }

    /// Apply one event. Returns whether the summary was replaced.
    pub fn handle_event(&self, event: &StreamEvent) -> bool {
        if event.event != self.event_name {
            debug!(event = %event.event, "Ignoring unrelated stream event");
            return false;
        }
        if !self.scope.is_alive() {
            return false;
        }
        match serde_json::from_str::<SegmentSummary>(&event.data) {
            Ok(summary) => {
                self.summary.send_replace(Some(summary));
                metrics::counter!("console.stream.snapshots").increment(1);
                true
            }
            Err(e) => {
                debug!(error = %e, "Dropping malformed summary payload");
                metrics::counter!("console.stream.dropped_payloads").increment(1);
                false
            }
        }
    }

    fn fail(&self, generation: u64, error: ConsoleError) {
        {
            let mut connection = self.connection.lock();
            match connection.as_ref() {
                Some(active) if active.generation == generation => {
                    *connection = None;
                }
                _ => return,
            }
        }
        warn!(error = %error, "Live summary stream failed, switching live updates off");
        self.state.send_replace(LiveState::Closed);
        if let Err(e) = self.store.set_bool(LIVE_UPDATES_KEY, false) {
            warn!(error = %e, "Failed to persist live updates preference");
        }
        self.state.send_replace(LiveState::Disabled);
    }
}
