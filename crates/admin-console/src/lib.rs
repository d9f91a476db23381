//! Operator console coordination layer — the async job orchestration and
//! live-state sync behind the campaign and segment views.
//!
//! # Modules
//!
//! - [`gateway`] — Remote job gateway contract
//! - [`scope`] — View lifetimes; results resolved after teardown are dropped
//! - [`poller`] — Bounded-retry status polling
//! - [`tracker`] — Two-tier job state (optimistic local map plus server history)
//! - [`filters`] — Filter selection, URL sync and debounced refetch
//! - [`live`] — Live summary stream subscription
//! - [`banner`] — Auto-expiring status and error messages
//! - [`campaigns`] / [`segments`] — View controllers composing the above
//! - `testing` — In-memory gateway and transport doubles (`testing` feature)

pub mod banner;
pub mod campaigns;
pub mod filters;
pub mod gateway;
pub mod live;
pub mod poller;
pub mod scope;
pub mod segments;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;

pub use banner::{Banner, MessageBoard};
pub use campaigns::{CampaignsView, DeliveryWatch};
pub use filters::{FilterEffect, FilterSelection, FilterSynchronizer, Location, StatusBadge};
pub use gateway::ConsoleGateway;
pub use live::{LiveState, StreamEvent, StreamSubscriber, SummaryTransport};
pub use poller::Poller;
pub use scope::ViewScope;
pub use segments::SegmentsView;
pub use tracker::JobTracker;
