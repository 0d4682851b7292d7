//! Ordered, rate-limited delivery of notifications.
//!
//! Each chat gets its own FIFO queue and worker task, so a slow or
//! failing chat never delays the others while messages to one chat stay
//! in order. Failed sends are retried a bounded number of times, then
//! dropped with an admin alert.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::telegram::Messenger;

/// Send attempts per message before it is dropped.
const SEND_ATTEMPTS: u32 = 3;

/// Delay knobs, shrunk by tests.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Base retry delay; attempt `n` waits `retry_base * n`.
    pub retry_base: Duration,
    /// Pause between successful sends to one chat (provider rate limit).
    pub pacing: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(1),
            pacing: Duration::from_secs(2),
        }
    }
}

/// Queue an alert for the administrator chat without blocking.
#[derive(Clone)]
pub struct AlertSender(mpsc::UnboundedSender<String>);

impl AlertSender {
    pub fn send(&self, text: impl Into<String>) {
        // The flusher only stops at shutdown; a send error then is moot.
        let _ = self.0.send(text.into());
    }
}

/// Spawn the alert flusher task. Alerts are discarded when no admin chat
/// is configured; failures to deliver an alert are logged and dropped.
pub fn spawn_alerter(messenger: Arc<dyn Messenger>, admin_chat: Option<i64>) -> AlertSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            let Some(chat) = admin_chat else { continue };
            if let Err(e) = messenger.send_message(chat, &text).await {
                warn!(error = %e, "admin alert delivery failed");
            }
        }
    });
    AlertSender(tx)
}

/// Fan-in point for outbound notifications.
#[derive(Clone)]
pub struct Dispatcher {
    queues: Arc<Mutex<HashMap<i64, mpsc::UnboundedSender<String>>>>,
    messenger: Arc<dyn Messenger>,
    alerts: AlertSender,
    timing: Timing,
}

impl Dispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, alerts: AlertSender) -> Self {
        Self::with_timing(messenger, alerts, Timing::default())
    }

    pub fn with_timing(messenger: Arc<dyn Messenger>, alerts: AlertSender, timing: Timing) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            messenger,
            alerts,
            timing,
        }
    }

    /// Append `text` to the chat's queue, spawning its worker on first use.
    pub fn enqueue(&self, chat: i64, text: String) {
        let mut queues = self.queues.lock().unwrap();
        let text = match queues.get(&chat) {
            Some(tx) => match tx.send(text) {
                Ok(()) => return,
                // Worker gone (shutdown race); respawn below.
                Err(mpsc::error::SendError(text)) => text,
            },
            None => text,
        };
        let tx = self.spawn_worker(chat);
        let _ = tx.send(text);
        queues.insert(chat, tx);
    }

    fn spawn_worker(&self, chat: i64) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(
            rx,
            self.messenger.clone(),
            self.alerts.clone(),
            chat,
            self.timing,
        ));
        tx
    }
}

/// One chat's worker: strict FIFO, bounded retries per message, fixed
/// pacing after each successful send. Retry state never carries over
/// from one message to the next.
async fn deliver(
    mut rx: mpsc::UnboundedReceiver<String>,
    messenger: Arc<dyn Messenger>,
    alerts: AlertSender,
    chat: i64,
    timing: Timing,
) {
    while let Some(text) = rx.recv().await {
        let mut delivered = false;
        for attempt in 1..=SEND_ATTEMPTS {
            match messenger.send_message(chat, &text).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    warn!(chat, attempt, error = %e, "notification delivery failed");
                    if attempt < SEND_ATTEMPTS {
                        sleep(timing.retry_base * attempt).await;
                    }
                }
            }
        }
        if delivered {
            sleep(timing.pacing).await;
        } else {
            error!(chat, "dropping notification after {SEND_ATTEMPTS} attempts");
            alerts.send(format!(
                "⚠️ Dropped a notification for chat {chat} after {SEND_ATTEMPTS} failed attempts"
            ));
        }
    }
}
