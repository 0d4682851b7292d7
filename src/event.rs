//! Recent-change event model.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::Value;

/// Actor details nested under `performer` on some feed variants.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Performer {
    /// Display name of the acting user.
    pub user_text: Option<String>,
    /// Upstream's own bot classification of the actor.
    #[serde(default)]
    pub user_is_bot: bool,
    /// Group memberships, e.g. `["bot", "sysop"]`.
    #[serde(default)]
    pub user_groups: Vec<String>,
}

/// Old/new revision ids attached to edit events.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct Revision {
    pub old: Option<u64>,
    pub new: Option<u64>,
}

/// Old/new page sizes in bytes.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct Length {
    pub old: Option<i64>,
    pub new: Option<i64>,
}

/// One reported wiki action from the recent-change feed.
///
/// The feed's JSON carries many more fields than we use; unknown ones are
/// ignored. Field presence varies by event kind and by wiki, so nearly
/// everything is optional. Events are immutable once parsed.
///
/// ```json
/// {
///   "wiki": "enwiki",
///   "type": "edit",
///   "title": "Rust (programming language)",
///   "user": "ExampleUser",
///   "comment": "fix typo",
///   "timestamp": 1700000000,
///   "revision": { "old": 99, "new": 100 },
///   "length": { "old": 1200, "new": 1234 }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Event {
    /// Wiki identifier such as `enwiki` or `commonswiki`.
    #[serde(default)]
    pub wiki: String,
    /// Event kind: `edit`, `new`, `log`, `move`, `categorize`, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    pub title: Option<String>,
    pub user: Option<String>,
    pub comment: Option<String>,
    /// Unix timestamp of the action.
    pub timestamp: Option<u64>,
    /// Upstream's bot flag for the whole event.
    #[serde(default)]
    pub bot: bool,
    /// Set when the action's details were suppressed by an oversighter.
    #[serde(default)]
    pub suppressed: bool,
    /// Top-level group memberships (older feed variants).
    #[serde(default)]
    pub user_groups: Vec<String>,
    pub performer: Option<Performer>,
    pub revision: Option<Revision>,
    /// Flat revision ids (alternate feed shape).
    pub old_revid: Option<u64>,
    pub revid: Option<u64>,
    pub length: Option<Length>,
    /// Log entry subtype when `kind` is `log`, e.g. `block` or `delete`.
    pub log_type: Option<String>,
    pub log_title: Option<String>,
    /// Log-type-specific parameters, kept free-form.
    #[serde(default)]
    pub log_params: Value,
}

impl Event {
    /// Kind used for subscription matching: log entries match on their
    /// `log_type` so a chat can subscribe to `block` or `delete` directly.
    pub fn effective_kind(&self) -> &str {
        if self.kind == "log" {
            if let Some(lt) = self.log_type.as_deref() {
                return lt;
            }
        }
        &self.kind
    }

    /// Title to display, falling back to the log title.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.log_title.as_deref())
            .unwrap_or("Unknown")
    }

    /// Acting user, if any field carries one.
    pub fn display_user(&self) -> Option<&str> {
        self.user
            .as_deref()
            .or_else(|| self.performer.as_ref().and_then(|p| p.user_text.as_deref()))
    }

    pub fn old_revision(&self) -> Option<u64> {
        self.revision.and_then(|r| r.old).or(self.old_revid)
    }

    pub fn new_revision(&self) -> Option<u64> {
        self.revision.and_then(|r| r.new).or(self.revid)
    }

    /// Signed page size change in bytes, when both lengths are reported.
    pub fn byte_delta(&self) -> Option<i64> {
        let len = self.length?;
        Some(len.new? - len.old?)
    }

    /// Deduplication key. Missing timestamps use the wall clock so two
    /// timestamp-less events received far apart are not conflated.
    pub fn fingerprint(&self) -> String {
        let ts = self.timestamp.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        });
        format!(
            "{ts}|{}|{}|{}|{}",
            self.wiki,
            self.title.as_deref().unwrap_or_default(),
            self.kind,
            self.user.as_deref().unwrap_or_default()
        )
    }

    /// Whether the event was performed by a bot account, judged from
    /// every signal the feed variants expose.
    pub fn from_bot_account(&self) -> bool {
        if let Some(p) = &self.performer {
            if p.user_is_bot || p.user_groups.iter().any(|g| g == "bot") {
                return true;
            }
        }
        if self.bot || self.user_groups.iter().any(|g| g == "bot") {
            return true;
        }
        if let Some(flags) = self.log_params.get("flags").and_then(Value::as_array) {
            if flags.iter().any(|f| f.as_str() == Some("bot")) {
                return true;
            }
        }
        if self.log_params.get("bot").and_then(Value::as_bool) == Some(true) {
            return true;
        }
        // Suppressed edits hide their actor; treat them like bot noise.
        self.suppressed && self.kind == "edit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Event {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_a_typical_edit() {
        let ev = parse(json!({
            "wiki": "enwiki",
            "type": "edit",
            "title": "Foo",
            "user": "Bar",
            "comment": "fix",
            "timestamp": 1700000000u64,
            "revision": {"old": 99, "new": 100},
            "length": {"old": 10, "new": 25},
            "server_url": "ignored",
            "namespace": 0
        }));
        assert_eq!(ev.kind, "edit");
        assert_eq!(ev.old_revision(), Some(99));
        assert_eq!(ev.new_revision(), Some(100));
        assert_eq!(ev.byte_delta(), Some(15));
        assert_eq!(ev.display_title(), "Foo");
        assert_eq!(ev.display_user(), Some("Bar"));
    }

    #[test]
    fn flat_revision_ids_are_honored() {
        let ev = parse(json!({
            "wiki": "enwiki",
            "type": "edit",
            "old_revid": 7,
            "revid": 8
        }));
        assert_eq!(ev.old_revision(), Some(7));
        assert_eq!(ev.new_revision(), Some(8));
    }

    #[test]
    fn log_events_match_on_log_type() {
        let ev = parse(json!({
            "wiki": "enwiki",
            "type": "log",
            "log_type": "block",
            "log_title": "User:Spammer"
        }));
        assert_eq!(ev.effective_kind(), "block");
        assert_eq!(ev.display_title(), "User:Spammer");
        assert_eq!(ev.display_user(), None);
    }

    #[test]
    fn fingerprint_uses_empty_segment_for_missing_user() {
        let ev = parse(json!({
            "wiki": "enwiki",
            "type": "edit",
            "title": "Foo",
            "timestamp": 5
        }));
        assert_eq!(ev.fingerprint(), "5|enwiki|Foo|edit|");
    }

    #[test]
    fn performer_bot_flag_always_wins() {
        // Even when every other field looks human.
        let ev = parse(json!({
            "wiki": "enwiki",
            "type": "edit",
            "user": "NotABot",
            "bot": false,
            "user_groups": ["autoconfirmed"],
            "performer": {"user_text": "NotABot", "user_is_bot": true}
        }));
        assert!(ev.from_bot_account());
    }

    #[test]
    fn bot_signals_each_trigger() {
        let base = json!({"wiki": "w", "type": "edit"});
        let cases = [
            json!({"bot": true}),
            json!({"user_groups": ["bot"]}),
            json!({"performer": {"user_groups": ["bot"]}}),
            json!({"log_params": {"flags": ["bot"]}}),
            json!({"log_params": {"bot": true}}),
            json!({"suppressed": true}),
        ];
        for extra in cases {
            let mut merged = base.clone();
            merged
                .as_object_mut()
                .unwrap()
                .extend(extra.as_object().unwrap().clone());
            assert!(parse(merged.clone()).from_bot_account(), "case: {merged}");
        }
    }

    #[test]
    fn suppression_only_matters_for_edits() {
        let ev = parse(json!({"wiki": "w", "type": "log", "suppressed": true}));
        assert!(!ev.from_bot_account());
        let ev = parse(json!({"wiki": "w", "type": "edit", "suppressed": true}));
        assert!(ev.from_bot_account());
    }

    #[test]
    fn plain_human_edit_is_not_a_bot() {
        let ev = parse(json!({
            "wiki": "enwiki",
            "type": "edit",
            "user": "Someone",
            "user_groups": ["sysop"],
            "performer": {"user_text": "Someone", "user_groups": ["sysop"]}
        }));
        assert!(!ev.from_bot_account());
    }
}
