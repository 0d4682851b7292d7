//! Telegram MarkdownV2 rendering of recent-change events.
//!
//! Pure text construction, no I/O. Every piece of user-supplied text is
//! escaped before interpolation; a single unescaped reserved character
//! makes Telegram reject the whole message.

use serde_json::Value;
use url::Url;

use crate::event::Event;
use crate::wiki;

/// Escape `text` for MarkdownV2. The strict dialect reserves every one of
/// these characters in free text, not only the ones that open an entity.
pub fn escape(text: &str) -> String {
    const RESERVED: &[char] = &[
        '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.',
        '!',
    ];
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Percent-encode literal parentheses. URLs are interpolated into
/// `[label](url)` link syntax, where a bare `)` terminates the link.
fn link_safe(url: &str) -> String {
    url.replace('(', "%28").replace(')', "%29")
}

/// Build `{base}/wiki/{page}` with spaces replaced by underscores and the
/// page segment percent-encoded.
fn page_url(base: &str, page: &str) -> String {
    let underscored = page.replace(' ', "_");
    let url = match Url::parse(base) {
        Ok(mut u) => {
            if let Ok(mut segments) = u.path_segments_mut() {
                segments.push("wiki").push(&underscored);
            }
            u.to_string()
        }
        Err(_) => format!("{base}/wiki/{underscored}"),
    };
    link_safe(&url)
}

fn contributions_url(base: &str, user: &str) -> String {
    let underscored = user.replace(' ', "_");
    let url = match Url::parse(base) {
        Ok(mut u) => {
            if let Ok(mut segments) = u.path_segments_mut() {
                segments
                    .push("wiki")
                    .push("Special:Contributions")
                    .push(&underscored);
            }
            u.to_string()
        }
        Err(_) => format!("{base}/wiki/Special:Contributions/{underscored}"),
    };
    link_safe(&url)
}

/// Signed byte delta with an explicit `+` for non-negative values.
fn format_delta(delta: i64) -> String {
    if delta >= 0 {
        format!("+{delta} bytes")
    } else {
        format!("{delta} bytes")
    }
}

fn non_empty(text: &Option<String>) -> Option<&str> {
    text.as_deref().filter(|s| !s.is_empty())
}

/// Render one event as a MarkdownV2 message.
///
/// Layout: a kind-specific headline, kind-specific detail lines, then a
/// page link and a user link shared by every message.
pub fn render(ev: &Event) -> String {
    let base = wiki::base_url(&ev.wiki);
    let wiki_name = escape(&ev.wiki);
    let mut lines = Vec::new();

    match ev.kind.as_str() {
        "edit" => {
            lines.push(format!("✏️ *Edit* on {wiki_name}"));
            if let (Some(old), Some(new)) = (ev.old_revision(), ev.new_revision()) {
                let diff = link_safe(&format!("{base}/wiki/Special:Diff/{old}/{new}"));
                lines.push(format!("🔀 [View diff]({diff})"));
            }
            if let Some(delta) = ev.byte_delta() {
                lines.push(format!("📏 Size change: {}", escape(&format_delta(delta))));
            }
            if let Some(comment) = non_empty(&ev.comment) {
                lines.push(format!("💬 Summary: {}", escape(comment)));
            }
        }
        "new" => {
            lines.push(format!("🆕 *New page* on {wiki_name}"));
            if let Some(size) = ev.length.and_then(|l| l.new) {
                lines.push(format!("📏 Initial size: {size} bytes"));
            }
            if let Some(comment) = non_empty(&ev.comment) {
                lines.push(format!("📝 Reason: {}", escape(comment)));
            }
        }
        "move" => {
            lines.push(format!("➡️ *Page moved* on {wiki_name}"));
            if let Some(target) = ev.log_params.get("target").and_then(Value::as_str) {
                let url = page_url(&base, target);
                lines.push(format!("🎯 New title: [{}]({url})", escape(target)));
            }
            if let Some(comment) = non_empty(&ev.comment) {
                lines.push(format!("📝 Reason: {}", escape(comment)));
            }
        }
        "log" => {
            let log_type = ev.log_type.as_deref().unwrap_or("entry");
            lines.push(format!("📋 *Log: {}* on {wiki_name}", escape(log_type)));
            match log_type {
                "delete" => {
                    if let Some(count) = ev.log_params.get("count").and_then(Value::as_u64) {
                        lines.push(format!("🗑 Affected revisions: {count}"));
                    }
                }
                "block" => {
                    if let Some(duration) = ev.log_params.get("duration").and_then(Value::as_str) {
                        lines.push(format!("⏱ Duration: {}", escape(duration)));
                    }
                }
                "move" => {
                    if let Some(target) = ev.log_params.get("target").and_then(Value::as_str) {
                        let url = page_url(&base, target);
                        lines.push(format!("🎯 New title: [{}]({url})", escape(target)));
                    }
                }
                "protect" => {
                    if let Some(desc) = ev.log_params.get("description").and_then(Value::as_str) {
                        lines.push(format!("🔒 {}", escape(desc)));
                    }
                }
                _ => {}
            }
            if let Some(comment) = non_empty(&ev.comment) {
                lines.push(format!("💬 {}", escape(comment)));
            }
        }
        other => {
            lines.push(format!("🔔 *{}* on {wiki_name}", escape(other)));
        }
    }

    let title = ev.display_title();
    lines.push(format!(
        "📄 [{}]({})",
        escape(title),
        page_url(&base, title)
    ));
    match ev.display_user() {
        Some(user) => lines.push(format!(
            "👤 [{}]({})",
            escape(user),
            contributions_url(&base, user)
        )),
        None => lines.push("👤 Anonymous".to_string()),
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> Event {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn escapes_every_reserved_character() {
        let escaped = escape("a_b*c[d]e(f)g~h`i>j#k+l-m=n|o{p}q.r!s\\t");
        assert_eq!(
            escaped,
            "a\\_b\\*c\\[d\\]e\\(f\\)g\\~h\\`i\\>j\\#k\\+l\\-m\\=n\\|o\\{p\\}q\\.r\\!s\\\\t"
        );
        assert_eq!(escape("plain text"), "plain text");
    }

    #[test]
    fn edit_message_links_the_diff() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "edit",
            "title": "Foo",
            "user": "Bar",
            "comment": "fix typo",
            "revision": {"old": 99, "new": 100},
            "length": {"old": 10, "new": 25}
        })));
        assert!(text.contains("https://en.wikipedia.org/wiki/Special:Diff/99/100"));
        assert!(text.contains("Size change: \\+15 bytes"));
        assert!(text.contains("Summary: fix typo"));
        assert!(text.contains("[Foo](https://en.wikipedia.org/wiki/Foo)"));
        assert!(text.contains("[Bar](https://en.wikipedia.org/wiki/Special:Contributions/Bar)"));
    }

    #[test]
    fn edit_without_revisions_has_no_diff_line() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "edit",
            "title": "Foo"
        })));
        assert!(!text.contains("View diff"));
    }

    #[test]
    fn negative_delta_keeps_its_sign() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "edit",
            "title": "Foo",
            "revision": {"old": 1, "new": 2},
            "length": {"old": 25, "new": 10}
        })));
        assert!(text.contains("Size change: \\-15 bytes"));
    }

    #[test]
    fn new_page_reports_initial_size() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "new",
            "title": "Foo",
            "comment": "created",
            "length": {"new": 512}
        })));
        assert!(text.contains("*New page*"));
        assert!(text.contains("Initial size: 512 bytes"));
        assert!(text.contains("Reason: created"));
    }

    #[test]
    fn move_target_escapes_markup_and_round_trips() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "move",
            "title": "Old title",
            "user": "Mover",
            "log_params": {"target": "New*(title)"}
        })));
        // The label escapes markup characters...
        assert!(text.contains("New\\*\\(title\\)"));
        // ...and the link target hides parentheses from the link syntax.
        let url_start = text.find("](https://en.wikipedia.org/wiki/New*").unwrap() + 2;
        let url_end = text[url_start..].find(')').unwrap() + url_start;
        let url = &text[url_start..url_end];
        assert!(!url.contains('('));
        let decoded = url.replace("%28", "(").replace("%29", ")");
        assert_eq!(decoded, "https://en.wikipedia.org/wiki/New*(title)");
    }

    #[test]
    fn spaces_become_underscores_in_links() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "edit",
            "title": "Rust programming language"
        })));
        assert!(text.contains("https://en.wikipedia.org/wiki/Rust_programming_language"));
    }

    #[test]
    fn block_log_includes_duration() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "log",
            "log_type": "block",
            "log_title": "User:Spammer",
            "user": "AdminUser",
            "comment": "spam",
            "log_params": {"duration": "2 weeks"}
        })));
        assert!(text.contains("*Log: block*"));
        assert!(text.contains("Duration: 2 weeks"));
        assert!(text.contains("💬 spam"));
    }

    #[test]
    fn delete_log_includes_revision_count() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "log",
            "log_type": "delete",
            "log_title": "Spam page",
            "log_params": {"count": 4}
        })));
        assert!(text.contains("Affected revisions: 4"));
    }

    #[test]
    fn unknown_kind_gets_a_generic_notice() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "categorize",
            "title": "Foo"
        })));
        assert!(text.contains("🔔 *categorize* on enwiki"));
    }

    #[test]
    fn anonymous_user_renders_as_literal() {
        let text = render(&event(json!({
            "wiki": "enwiki",
            "type": "edit",
            "title": "Foo"
        })));
        assert!(text.ends_with("👤 Anonymous"));
        assert!(text.contains("[Foo]"));
    }

    #[test]
    fn titles_default_to_unknown() {
        let text = render(&event(json!({"wiki": "enwiki", "type": "edit"})));
        assert!(text.contains("[Unknown]"));
    }
}
