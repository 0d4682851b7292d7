//! Telegram transport and command surface.
//!
//! Outbound delivery goes through the [`Messenger`] trait so the
//! dispatcher and relay are testable without the network; the long-poll
//! command loop uses the concrete [`Bot`] directly.

use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatId, LinkPreviewOptions, ParseMode};
use thiserror::Error;
use tracing::warn;

use crate::config::Settings;
use crate::dispatch::AlertSender;
use crate::mirror::Mirror;
use crate::subscriptions::{Status, SubscriptionStore, EVENT_KINDS};
use crate::wiki;

/// A Telegram API call failed.
#[derive(Debug, Error)]
#[error("telegram request failed: {0}")]
pub struct SendError(pub String);

/// Outbound messaging seam.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver MarkdownV2 `text` to `chat_id` with link previews disabled.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SendError>;
}

/// Production [`Messenger`] backed by the Bot API.
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::MarkdownV2)
            .link_preview_options(disabled_preview())
            .await
            .map(|_| ())
            .map_err(|e| SendError(e.to_string()))
    }
}

fn disabled_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// A parsed bot command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    SetWiki(String),
    SetEvents(Vec<String>),
    Pause,
    Resume,
    Status,
    Unknown(String),
}

impl Command {
    /// Commands that change stored state and therefore require
    /// authorization in group chats.
    fn mutates(&self) -> bool {
        matches!(
            self,
            Command::SetWiki(_) | Command::SetEvents(_) | Command::Pause | Command::Resume
        )
    }
}

/// Parse a message text into a command. Plain messages return `None`;
/// a `@BotName` suffix on the command word is tolerated.
pub fn parse_command(text: &str) -> Option<Command> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?;
    let name = head.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or_default().to_lowercase();
    let args: Vec<String> = parts.map(str::to_string).collect();
    Some(match name.as_str() {
        "start" => Command::Start,
        "setwiki" => Command::SetWiki(args.first().cloned().unwrap_or_default()),
        "setevents" => Command::SetEvents(args),
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "status" => Command::Status,
        other => Command::Unknown(other.to_string()),
    })
}

/// Group-chat authorization: configured admins and the override id are
/// always allowed; otherwise the sender must appear in the chat's live
/// administrator list. A failed lookup denies (fail closed).
pub fn is_authorized(
    is_private: bool,
    sender: Option<u64>,
    admin_ids: &[u64],
    admin_override: Option<u64>,
    live_admins: Result<Vec<u64>, SendError>,
) -> bool {
    if is_private {
        return true;
    }
    let Some(sender) = sender else {
        return false;
    };
    if admin_ids.contains(&sender) || admin_override == Some(sender) {
        return true;
    }
    match live_admins {
        Ok(ids) => ids.contains(&sender),
        Err(_) => false,
    }
}

/// Run a command against the store, producing the reply text and whether
/// stored state changed (callers mirror on change).
pub fn execute(cmd: &Command, chat: &str, store: &SubscriptionStore) -> (String, bool) {
    match cmd {
        Command::Start => (
            "👋 I relay Wikimedia recent changes into this chat.\n\
             /setwiki <id> - choose a wiki, e.g. /setwiki enwiki\n\
             /setevents <kind>... - choose event kinds, e.g. /setevents edit new\n\
             /pause, /resume - stop or restart notifications\n\
             /status - show the current configuration"
                .to_string(),
            false,
        ),
        Command::SetWiki(id) => {
            if id.is_empty() {
                return ("Usage: /setwiki enwiki".to_string(), false);
            }
            if !wiki::is_valid_id(id) {
                return (
                    format!("⚠️ \"{id}\" does not look like a wiki id (expected something like enwiki or commonswiki)."),
                    false,
                );
            }
            match store.set_wiki(chat, id) {
                Ok(()) => (format!("✅ Now watching {id}."), true),
                Err(e) => (format!("⚠️ {e}"), false),
            }
        }
        Command::SetEvents(kinds) => {
            if kinds.is_empty() {
                return (
                    format!("Usage: /setevents edit new\nValid kinds: {}", EVENT_KINDS.join(", ")),
                    false,
                );
            }
            if let Some(bad) = kinds.iter().find(|k| !EVENT_KINDS.contains(&k.as_str())) {
                return (
                    format!(
                        "⚠️ Unknown event kind \"{bad}\". Valid kinds: {}",
                        EVENT_KINDS.join(", ")
                    ),
                    false,
                );
            }
            match store.set_events(chat, kinds.clone()) {
                Ok(()) => (format!("✅ Notifying for: {}.", kinds.join(", ")), true),
                Err(e) => (format!("⚠️ {e}"), false),
            }
        }
        Command::Pause => match store.set_status(chat, Status::Paused) {
            Ok(()) => ("⏸ Notifications paused. /resume restarts them.".to_string(), true),
            Err(e) => (format!("⚠️ {e}"), false),
        },
        Command::Resume => match store.set_status(chat, Status::Active) {
            Ok(()) => ("▶️ Notifications resumed.".to_string(), true),
            Err(e) => (format!("⚠️ {e}"), false),
        },
        Command::Status => match store.get(chat) {
            Some(sub) => {
                let status = match sub.status {
                    Status::Active => "active",
                    Status::Paused => "paused",
                };
                (
                    format!(
                        "Wiki: {}\nEvents: {}\nStatus: {status}",
                        sub.wiki.as_deref().unwrap_or("(not set)"),
                        if sub.events.is_empty() {
                            "(none)".to_string()
                        } else {
                            sub.events.join(", ")
                        }
                    ),
                    false,
                )
            }
            None => (
                "⚠️ Nothing configured yet. Use /setwiki to begin.".to_string(),
                false,
            ),
        },
        Command::Unknown(name) => (format!("Unknown command \"/{name}\". Try /start."), false),
    }
}

/// Long-poll loop handling configuration commands until the task is
/// aborted at shutdown. Replies are plain text; notifications go through
/// the [`Messenger`] path instead.
pub async fn run_commands(
    bot: Bot,
    cfg: Settings,
    store: SubscriptionStore,
    mirror: Option<Mirror>,
    alerts: AlertSender,
) {
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let cfg = cfg.clone();
        let store = store.clone();
        let mirror = mirror.clone();
        let alerts = alerts.clone();
        async move {
            let Some(cmd) = msg.text().and_then(parse_command) else {
                return Ok(());
            };
            let sender = msg.from.as_ref().map(|u| u.id.0);
            let authorized = if cmd.mutates() {
                let live = if msg.chat.is_private() {
                    Ok(Vec::new())
                } else {
                    bot.get_chat_administrators(msg.chat.id)
                        .await
                        .map(|members| members.into_iter().map(|m| m.user.id.0).collect())
                        .map_err(|e| SendError(e.to_string()))
                };
                is_authorized(
                    msg.chat.is_private(),
                    sender,
                    &cfg.admin_ids,
                    cfg.admin_override,
                    live,
                )
            } else {
                true
            };
            let reply = if authorized {
                let (reply, mutated) = execute(&cmd, &msg.chat.id.0.to_string(), &store);
                if mutated {
                    if let Some(mirror) = &mirror {
                        mirror.spawn_push(store.snapshot_json());
                    }
                    alerts.send(format!("⚙️ Chat {}: {reply}", msg.chat.id.0));
                }
                reply
            } else {
                "⛔ Admins only.".to_string()
            };
            if let Err(e) = bot.send_message(msg.chat.id, reply).await {
                warn!(chat = msg.chat.id.0, error = %e, "command reply failed");
            }
            Ok(())
        }
    })
    .await;
}
