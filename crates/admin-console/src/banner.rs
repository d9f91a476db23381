//! Transient status and error banners.
//!
//! Each view shows at most one status and one error message. Setting a
//! message replaces the visible one and restarts its expiry timer; messages
//! never stack.

use campaign_core::config::MessageConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Banner {
    pub status: Option<String>,
    pub error: Option<String>,
}

#[derive(Default)]
struct SlotState {
    text: Option<String>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct MessageSlot {
    kind: &'static str,
    ttl: Duration,
    state: Arc<Mutex<SlotState>>,
}

impl MessageSlot {
    fn new(kind: &'static str, ttl: Duration) -> Self {
        Self {
            kind,
            ttl,
            state: Arc::new(Mutex::new(SlotState::default())),
        }
    }

    fn set(&self, text: String) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        debug!(kind = self.kind, message = %text, "Banner message set");
        state.text = Some(text);
        state.generation += 1;

        let generation = state.generation;
        let slot = Arc::clone(&self.state);
        let ttl = self.ttl;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut state = slot.lock();
            // a newer message may have been set while this timer was waking
            if state.generation == generation {
                state.text = None;
                state.timer = None;
            }
        }));
    }

    fn get(&self) -> Option<String> {
        self.state.lock().text.clone()
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.text = None;
        state.generation += 1;
    }
}

pub struct MessageBoard {
    status: MessageSlot,
    error: MessageSlot,
}

impl MessageBoard {
    pub fn new(status_ttl: Duration, error_ttl: Duration) -> Self {
        Self {
            status: MessageSlot::new("status", status_ttl),
            error: MessageSlot::new("error", error_ttl),
        }
    }

    /// Campaign flows: status and error each last their configured TTL.
    pub fn for_campaigns(config: &MessageConfig) -> Self {
        Self::new(
            Duration::from_millis(config.status_ttl_ms),
            Duration::from_millis(config.error_ttl_ms),
        )
    }

    /// Segment actions use the shorter action TTL for both slots.
    pub fn for_segments(config: &MessageConfig) -> Self {
        let ttl = Duration::from_millis(config.segment_action_ttl_ms);
        Self::new(ttl, ttl)
    }

    pub fn set_status(&self, message: impl Into<String>) {
        self.status.set(message.into());
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.error.set(message.into());
    }

    pub fn status(&self) -> Option<String> {
        self.status.get()
    }

    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    pub fn banner(&self) -> Banner {
        Banner {
            status: self.status(),
            error: self.error(),
        }
    }

    pub fn clear(&self) {
        self.status.clear();
        self.error.clear();
    }
}

impl Drop for MessageBoard {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_expires() {
        let board = MessageBoard::new(Duration::from_millis(4000), Duration::from_millis(4000));
        board.set_status("Export queued");
        advance(3999).await;
        assert_eq!(board.status().as_deref(), Some("Export queued"));
        advance(2).await;
        assert_eq!(board.status(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_timer() {
        let board = MessageBoard::new(Duration::from_millis(4000), Duration::from_millis(4000));
        board.set_error("Send failed");
        advance(3000).await;
        board.set_error("Send failed again");

        // past the first window, inside the second
        advance(3000).await;
        assert_eq!(board.error().as_deref(), Some("Send failed again"));

        advance(999).await;
        assert_eq!(board.error().as_deref(), Some("Send failed again"));
        advance(2).await;
        assert_eq!(board.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_are_independent() {
        let board = MessageBoard::new(Duration::from_millis(2200), Duration::from_millis(2200));
        board.set_status("Segment saved");
        advance(1000).await;
        board.set_error("Rename failed");
        advance(1300).await;
        assert_eq!(
            board.banner(),
            Banner {
                status: None,
                error: Some("Rename failed".into()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_message_replaces_visible_one() {
        let board = MessageBoard::for_campaigns(&MessageConfig::default());
        board.set_status("Campaign queued");
        board.set_status("Campaign sent");
        assert_eq!(board.status().as_deref(), Some("Campaign sent"));
    }
}
