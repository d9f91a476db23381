//! Keeps the operator's filter selection, the shareable URL and dependent
//! list fetches consistent.
//!
//! Every change rewrites the URL query (replace, never push). Changes that
//! touch a server-side query parameter publish a new [`ServerQuery`] on a
//! watch channel, which the view's debounced loader turns into a refetch;
//! purely client-side changes (search text) do not.

use crate::scope::ViewScope;
use campaign_core::types::{Campaign, CampaignStatus, Engagement, SegmentBucket, SegmentFilter};
use campaign_core::ConsoleResult;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::form_urlencoded;

const PARAM_CONTINENT: &str = "continent";
const PARAM_SOURCE: &str = "source";
const PARAM_ENGAGEMENT: &str = "engagement";
const PARAM_STATUS: &str = "status";
const PARAM_SEARCH: &str = "q";

/// Quick filter over the campaign status dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusBadge {
    #[default]
    All,
    Sent,
    NotSent,
}

impl StatusBadge {
    /// The status value a badge stands for.
    pub fn derived_status(self) -> Option<CampaignStatus> {
        match self {
            StatusBadge::All => None,
            StatusBadge::Sent => Some(CampaignStatus::Sent),
            StatusBadge::NotSent => Some(CampaignStatus::Draft),
        }
    }
}

/// Which selection fields are sent to the server by the owning view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope {
    /// Campaign list: `status` is server-side.
    Campaigns,
    /// Segment summary: `continent`, `source` and `engagement` are server-side.
    Segments,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSelection {
    pub continent: Option<String>,
    pub source: Option<String>,
    pub engagement: Engagement,
    pub status: Option<CampaignStatus>,
    pub badge: StatusBadge,
    pub search: String,
}

/// The server-relevant projection of a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerQuery {
    pub status: Option<CampaignStatus>,
    pub segment: SegmentFilter,
}

impl FilterSelection {
    /// Parse a URL query string. Unknown or malformed values fall back to
    /// the unfiltered state; the badge always starts at `All`.
    pub fn from_query(query: &str) -> Self {
        let mut selection = FilterSelection::default();
        for (name, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.as_ref() {
                PARAM_CONTINENT => selection.continent = Some(value.to_string()),
                PARAM_SOURCE => selection.source = Some(value.to_string()),
                PARAM_ENGAGEMENT => selection.engagement = Engagement::from_param(value),
                PARAM_STATUS => selection.status = CampaignStatus::from_param(value),
                PARAM_SEARCH => selection.search = value.to_string(),
                _ => {}
            }
        }
        selection
    }

    pub fn to_query(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(continent) = &self.continent {
            query.append_pair(PARAM_CONTINENT, continent);
        }
        if let Some(source) = &self.source {
            query.append_pair(PARAM_SOURCE, source);
        }
        if let Some(engagement) = self.engagement.as_param() {
            query.append_pair(PARAM_ENGAGEMENT, engagement);
        }
        if let Some(status) = self.status {
            query.append_pair(PARAM_STATUS, status.as_param());
        }
        if !self.search.is_empty() {
            query.append_pair(PARAM_SEARCH, &self.search);
        }
        query.finish()
    }

    pub fn segment_filter(&self) -> SegmentFilter {
        SegmentFilter {
            continent: self.continent.clone(),
            source: self.source.clone(),
            engagement: self.engagement,
        }
    }

    pub fn server_query(&self, scope: FilterScope) -> ServerQuery {
        match scope {
            FilterScope::Campaigns => ServerQuery {
                status: self.status,
                segment: SegmentFilter::default(),
            },
            FilterScope::Segments => ServerQuery {
                status: None,
                segment: self.segment_filter(),
            },
        }
    }

    /// The badge and the status selector never disagree.
    pub fn is_consistent(&self) -> bool {
        self.badge == StatusBadge::All || self.status == self.badge.derived_status()
    }

    pub fn matches_campaign(&self, campaign: &Campaign) -> bool {
        let needle = self.search.trim().to_lowercase();
        needle.is_empty()
            || campaign.name.to_lowercase().contains(&needle)
            || campaign.subject.to_lowercase().contains(&needle)
    }

    pub fn matches_bucket(&self, bucket: &SegmentBucket) -> bool {
        let needle = self.search.trim().to_lowercase();
        needle.is_empty()
            || bucket.continent.to_lowercase().contains(&needle)
            || bucket.source.to_lowercase().contains(&needle)
    }
}

// ─── Location ───────────────────────────────────────────────────────────────

/// The shareable location whose query string mirrors the selection.
pub trait Location: Send + Sync {
    fn query(&self) -> String;
    /// Replace the current entry's query without adding a history entry.
    fn replace_query(&self, query: &str);
}

/// In-memory location with a navigation history. Only [`push_query`]
/// (a user navigating) adds entries; replacements rewrite the current one.
///
/// [`push_query`]: MemoryLocation::push_query
pub struct MemoryLocation {
    entries: Mutex<Vec<String>>,
    replacements: Mutex<usize>,
}

impl MemoryLocation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(vec![query.into()]),
            replacements: Mutex::new(0),
        }
    }

    /// Navigate to a new entry carrying `query`.
    pub fn push_query(&self, query: &str) {
        self.entries.lock().push(query.to_string());
    }

    pub fn replacements(&self) -> usize {
        *self.replacements.lock()
    }

    pub fn history_len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Location for MemoryLocation {
    fn query(&self) -> String {
        self.entries.lock().last().cloned().unwrap_or_default()
    }

    fn replace_query(&self, query: &str) {
        let mut entries = self.entries.lock();
        match entries.last_mut() {
            Some(current) => *current = query.to_string(),
            None => entries.push(query.to_string()),
        }
        *self.replacements.lock() += 1;
    }
}

// ─── Synchronizer ───────────────────────────────────────────────────────────

/// Outcome of a filter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterEffect {
    Unchanged,
    /// Recompute from already-loaded data.
    LocalOnly,
    /// A server-side parameter changed; dependent data will be refetched.
    Refetch,
}

pub struct FilterSynchronizer {
    scope: FilterScope,
    location: Arc<dyn Location>,
    selection: RwLock<FilterSelection>,
    server: watch::Sender<ServerQuery>,
}

impl FilterSynchronizer {
    /// Initialise the selection from the location's current query.
    pub fn mount(location: Arc<dyn Location>, scope: FilterScope) -> Self {
        let selection = FilterSelection::from_query(&location.query());
        let (server, _) = watch::channel(selection.server_query(scope));
        debug!(query = %selection.to_query(), scope = ?scope, "Filters mounted from URL");
        Self {
            scope,
            location,
            selection: RwLock::new(selection),
            server,
        }
    }

    pub fn selection(&self) -> FilterSelection {
        self.selection.read().clone()
    }

    pub fn server_query(&self) -> ServerQuery {
        self.server.borrow().clone()
    }

    /// Server query changes, for the debounced loader.
    pub fn subscribe(&self) -> watch::Receiver<ServerQuery> {
        self.server.subscribe()
    }

    pub fn set_continent(&self, continent: Option<String>) -> FilterEffect {
        self.update(|s| s.continent = normalize(continent))
    }

    pub fn set_source(&self, source: Option<String>) -> FilterEffect {
        self.update(|s| s.source = normalize(source))
    }

    pub fn set_engagement(&self, engagement: Engagement) -> FilterEffect {
        self.update(|s| s.engagement = engagement)
    }

    pub fn set_search(&self, search: impl Into<String>) -> FilterEffect {
        let search = search.into();
        self.update(|s| s.search = search)
    }

    /// Choosing a status directly resets the badge.
    pub fn set_status(&self, status: Option<CampaignStatus>) -> FilterEffect {
        self.update(|s| {
            s.status = status;
            s.badge = StatusBadge::All;
        })
    }

    /// Choosing a badge drives the status to the badge's value.
    pub fn set_badge(&self, badge: StatusBadge) -> FilterEffect {
        self.update(|s| {
            s.badge = badge;
            s.status = badge.derived_status();
        })
    }

    /// Load a saved segment's frozen filter into the selection.
    pub fn apply_segment(&self, filter: &SegmentFilter) -> FilterEffect {
        self.update(|s| {
            s.continent = filter.continent.clone();
            s.source = filter.source.clone();
            s.engagement = filter.engagement;
        })
    }

    fn update(&self, change: impl FnOnce(&mut FilterSelection)) -> FilterEffect {
        let mut selection = self.selection.write();
        let before = selection.clone();
        change(&mut selection);
        debug_assert!(selection.is_consistent());
        if *selection == before {
            return FilterEffect::Unchanged;
        }

        self.location.replace_query(&selection.to_query());

        let query = selection.server_query(self.scope);
        let refetch = self.server.send_if_modified(|current| {
            if *current == query {
                false
            } else {
                *current = query;
                true
            }
        });
        if refetch {
            debug!(query = %selection.to_query(), "Server-side filter changed");
            FilterEffect::Refetch
        } else {
            FilterEffect::LocalOnly
        }
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ─── Debounced refetch ──────────────────────────────────────────────────────

/// Refetch dependent data whenever the server query changes.
///
/// Waits until no further change arrives for `debounce`, then fetches. A
/// result is applied through `apply` only if the scope is alive and no newer
/// query arrived meanwhile. Fetch errors are logged and the stale data kept.
pub fn spawn_refetch<T, F, Fut, A>(
    mut changes: watch::Receiver<ServerQuery>,
    debounce: Duration,
    scope: ViewScope,
    mut fetch: F,
    apply: A,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: FnMut(ServerQuery) -> Fut + Send + 'static,
    Fut: Future<Output = ConsoleResult<T>> + Send + 'static,
    A: Fn(T) + Send + 'static,
{
    tokio::spawn(async move {
        'outer: loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                changed = changes.changed() => if changed.is_err() { break },
            }

            loop {
                tokio::select! {
                    _ = scope.cancelled() => break 'outer,
                    _ = tokio::time::sleep(debounce) => break,
                    changed = changes.changed() => if changed.is_err() { break 'outer },
                }
            }

            let query = changes.borrow_and_update().clone();
            let result = fetch(query).await;
            if !scope.is_alive() {
                break;
            }
            if changes.has_changed().unwrap_or(false) {
                debug!(scope = scope.name(), "Refetch superseded by newer filters");
                continue;
            }
            match result {
                Ok(data) => apply(data),
                Err(e) => warn!(scope = scope.name(), error = %e, "Filtered refetch failed"),
            }
        }
        debug!(scope = scope.name(), "Refetch loop stopped");
    })
}
