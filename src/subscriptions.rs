//! Per-chat subscription configuration and its JSON file persistence.
//!
//! A [`SubscriptionStore`] is a cloneable handle over one shared map; all
//! mutation funnels through [`SubscriptionStore::apply`], which rewrites
//! the whole settings file atomically and rolls the in-memory change back
//! when the write fails, so memory and disk never diverge.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event kinds a chat may subscribe to.
pub const EVENT_KINDS: &[&str] = &["edit", "new", "delete", "move", "block", "protect", "log"];

/// Whether a chat currently receives notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Paused,
}

/// One chat's filter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Watched wiki id, unset until the first `/setwiki`.
    pub wiki: Option<String>,
    /// Subscribed event kinds.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub status: Status,
}

impl Subscription {
    fn matches(&self, wiki: &str, kind: &str) -> bool {
        self.status == Status::Active
            && self.wiki.as_deref() == Some(wiki)
            && self.events.iter().any(|e| e == kind)
    }
}

/// Settings could not be written to disk; the mutation was rolled back.
#[derive(Debug, Error)]
#[error("could not save settings: {0}")]
pub struct PersistError(String);

/// Cloneable handle to the shared subscription map.
#[derive(Clone)]
pub struct SubscriptionStore {
    path: PathBuf,
    map: Arc<Mutex<HashMap<String, Subscription>>>,
}

impl SubscriptionStore {
    /// Load the settings file at `path`; a missing file is an empty map.
    pub fn load(path: PathBuf) -> Result<Self> {
        let map = if path.exists() {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            map: Arc::new(Mutex::new(map)),
        })
    }

    /// Apply `mutate` to the chat's subscription (creating it on first
    /// use) and persist the whole map. On a write failure the previous
    /// entry is restored and the error surfaced to the caller.
    fn apply(
        &self,
        chat: &str,
        mutate: impl FnOnce(&mut Subscription),
    ) -> std::result::Result<(), PersistError> {
        let mut map = self.map.lock().unwrap();
        let previous = map.get(chat).cloned();
        let entry = map.entry(chat.to_string()).or_default();
        mutate(entry);
        if let Err(e) = persist(&self.path, &map) {
            match previous {
                Some(prev) => {
                    map.insert(chat.to_string(), prev);
                }
                None => {
                    map.remove(chat);
                }
            }
            return Err(PersistError(e.to_string()));
        }
        Ok(())
    }

    pub fn set_wiki(&self, chat: &str, wiki: &str) -> std::result::Result<(), PersistError> {
        self.apply(chat, |sub| sub.wiki = Some(wiki.to_string()))
    }

    pub fn set_events(
        &self,
        chat: &str,
        events: Vec<String>,
    ) -> std::result::Result<(), PersistError> {
        self.apply(chat, |sub| sub.events = events)
    }

    pub fn set_status(&self, chat: &str, status: Status) -> std::result::Result<(), PersistError> {
        self.apply(chat, |sub| sub.status = status)
    }

    pub fn get(&self, chat: &str) -> Option<Subscription> {
        self.map.lock().unwrap().get(chat).cloned()
    }

    /// Chat ids with an active subscription covering `wiki` and `kind`.
    pub fn matching(&self, wiki: &str, kind: &str) -> Vec<String> {
        self.map
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, sub)| sub.matches(wiki, kind))
            .map(|(chat, _)| chat.clone())
            .collect()
    }

    /// Pretty-printed JSON of the full map, as written to disk.
    pub fn snapshot_json(&self) -> String {
        let map = self.map.lock().unwrap();
        serde_json::to_string_pretty(&*map).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Write the whole map atomically: serialize to a temp file in the same
/// directory, then rename over the target.
fn persist(path: &Path, map: &HashMap<String, Subscription>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let tmp = tempfile::NamedTempFile::new_in(&parent)?;
    serde_json::to_writer_pretty(&tmp, map)?;
    tmp.persist(path)?;
    Ok(())
}
