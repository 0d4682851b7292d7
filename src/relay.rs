//! Fan-out from inbound events to per-chat delivery queues.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dedup::Dedup;
use crate::dispatch::Dispatcher;
use crate::event::Event;
use crate::format;
use crate::subscriptions::SubscriptionStore;

/// Routing state for the single consumer of the event channel.
pub struct Relay {
    store: SubscriptionStore,
    dispatch: Dispatcher,
    dedup: Dedup,
}

impl Relay {
    pub fn new(store: SubscriptionStore, dispatch: Dispatcher) -> Self {
        Self {
            store,
            dispatch,
            dedup: Dedup::new(),
        }
    }

    /// Route one event, returning how many notifications were queued.
    ///
    /// Order matters: the bot filter runs before dedup so bot chatter
    /// never displaces human fingerprints from the window.
    pub fn handle(&mut self, ev: &Event) -> usize {
        if ev.from_bot_account() {
            debug!(wiki = %ev.wiki, "skipping bot account event");
            return 0;
        }
        if !self.dedup.observe(&ev.fingerprint()) {
            debug!(wiki = %ev.wiki, "suppressing duplicate event");
            return 0;
        }
        let kind = ev.effective_kind();
        let chats = self.store.matching(&ev.wiki, kind);
        if chats.is_empty() {
            return 0;
        }
        let text = format::render(ev);
        let mut queued = 0;
        for chat in chats {
            match chat.parse::<i64>() {
                Ok(id) => {
                    self.dispatch.enqueue(id, text.clone());
                    queued += 1;
                }
                Err(_) => warn!(chat = %chat, "ignoring malformed chat id in settings"),
            }
        }
        queued
    }
}

/// Consume events until the connector closes the channel.
pub async fn run(mut rx: mpsc::Receiver<Event>, mut relay: Relay) {
    while let Some(ev) = rx.recv().await {
        relay.handle(&ev);
    }
    debug!("event channel drained, relay stopping");
}
