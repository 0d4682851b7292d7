//! Wiki identifier to base content URL resolution.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

const COMMONS_URL: &str = "https://commons.wikimedia.org";
const WIKIDATA_URL: &str = "https://www.wikidata.org";

/// Pattern for wiki identifiers: a language code followed by a sister
/// project suffix, e.g. `enwiki`, `bnwikisource`, `dewikivoyage`.
fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            "(?i)^([a-z]{2,})(wikibooks|wiktionary|wikinews|wikiquote|wikisource|wikiversity|wikivoyage|wikimedia|wiki)$",
        )
        .expect("wiki id pattern")
    })
}

/// Whether `wiki` is an identifier the resolver understands without the
/// fallback heuristic. Used to validate `/setwiki` arguments.
pub fn is_valid_id(wiki: &str) -> bool {
    id_pattern().is_match(wiki)
}

/// Resolve the base content URL for a wiki identifier.
///
/// `commonswiki` and `wikidatawiki` are special-cased; other identifiers
/// are split into language code and project suffix. Unrecognized ids fall
/// back to stripping the substring `wiki` and assuming Wikipedia, which
/// mangles ids like `wikiwiki` but matches long-standing behavior.
pub fn base_url(wiki: &str) -> String {
    match wiki {
        "commonswiki" => return COMMONS_URL.to_string(),
        "wikidatawiki" => return WIKIDATA_URL.to_string(),
        _ => {}
    }
    if let Some(caps) = id_pattern().captures(wiki) {
        let lang = caps[1].to_lowercase();
        let project = caps[2].to_lowercase();
        if project != "wiki" {
            return format!("https://{lang}.{project}.org");
        }
        return format!("https://{lang}.wikipedia.org");
    }
    warn!(wiki, "unrecognized wiki id, guessing a wikipedia.org domain");
    format!("https://{}.wikipedia.org", wiki.replace("wiki", ""))
}
