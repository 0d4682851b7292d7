//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

/// Default upstream recent-change feed.
pub const DEFAULT_STREAM_URL: &str = "https://stream.wikimedia.org/v2/stream/recentchange";

/// GitHub mirror coordinates; present only when token and repo are set.
#[derive(Debug, Clone)]
pub struct GithubSettings {
    pub token: String,
    /// `owner/name` repository slug.
    pub repo: String,
    /// Path of the mirrored file inside the repository.
    pub file_path: String,
    pub branch: String,
}

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Telegram bot token; required for `serve`, not for `init`.
    pub bot_token: Option<String>,
    /// Chat receiving operational alerts.
    pub admin_chat: Option<i64>,
    /// User ids always allowed to run config commands in groups.
    pub admin_ids: Vec<u64>,
    /// Single extra id with the same privilege.
    pub admin_override: Option<u64>,
    /// Upstream SSE endpoint.
    pub stream_url: String,
    /// Path of the local subscriptions file.
    pub settings_file: PathBuf,
    /// Keep-alive HTTP bind address, e.g. `127.0.0.1:8080`.
    pub bind_http: String,
    /// Reconnect delay for HTTP 429 without a Retry-After header.
    pub retry_after_fallback: Duration,
    /// Optional GitHub mirror target.
    pub github: Option<GithubSettings>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let bot_token = optional("BOT_TOKEN");
        let admin_chat = optional("ADMIN_CHAT_ID").and_then(|s| s.parse().ok());
        let admin_ids = csv_u64(env::var("ADMIN_IDS").unwrap_or_default());
        let admin_override = optional("ADMIN_OVERRIDE_ID").and_then(|s| s.parse().ok());
        let stream_url = optional("STREAM_URL").unwrap_or_else(|| DEFAULT_STREAM_URL.to_string());
        let settings_file = PathBuf::from(
            optional("SETTINGS_FILE").unwrap_or_else(|| "subscriptions.json".to_string()),
        );
        let bind_http = optional("BIND_HTTP").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let retry_after_fallback = Duration::from_secs(
            optional("RETRY_AFTER_FALLBACK_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        );
        let github = match (optional("GITHUB_TOKEN"), optional("GITHUB_REPO")) {
            (Some(token), Some(repo)) => Some(GithubSettings {
                token,
                repo,
                file_path: optional("GITHUB_FILE_PATH")
                    .unwrap_or_else(|| "subscriptions.json".to_string()),
                branch: optional("GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
            }),
            _ => None,
        };
        Ok(Self {
            bot_token,
            admin_chat,
            admin_ids,
            admin_override,
            stream_url,
            settings_file,
            bind_http,
            retry_after_fallback,
            github,
        })
    }
}

/// Read a variable, treating the empty string as unset.
fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Split a comma-separated string into `u64` values, skipping invalid entries.
pub fn csv_u64(input: impl AsRef<str>) -> Vec<u64> {
    input
        .as_ref()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// Serializes every test that touches process environment variables;
/// `dotenvy` writes into the process environment, so concurrent tests
/// would bleed into each other.
#[cfg(test)]
pub static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const VARS: &[&str] = &[
        "BOT_TOKEN",
        "ADMIN_CHAT_ID",
        "ADMIN_IDS",
        "ADMIN_OVERRIDE_ID",
        "STREAM_URL",
        "SETTINGS_FILE",
        "BIND_HTTP",
        "RETRY_AFTER_FALLBACK_SECS",
        "GITHUB_TOKEN",
        "GITHUB_REPO",
        "GITHUB_FILE_PATH",
        "GITHUB_BRANCH",
    ];

    fn clear_env() {
        for v in VARS {
            env::remove_var(v);
        }
    }

    #[test]
    fn loads_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            concat!(
                "BOT_TOKEN=123:abc\n",
                "ADMIN_CHAT_ID=-100123\n",
                "ADMIN_IDS=11, 22 ,x,33\n",
                "ADMIN_OVERRIDE_ID=44\n",
                "STREAM_URL=https://example.org/stream\n",
                "SETTINGS_FILE=/tmp/subs.json\n",
                "BIND_HTTP=127.0.0.1:9999\n",
                "RETRY_AFTER_FALLBACK_SECS=30\n",
                "GITHUB_TOKEN=tok\n",
                "GITHUB_REPO=owner/repo\n",
                "GITHUB_FILE_PATH=conf/subs.json\n",
                "GITHUB_BRANCH=master\n",
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(cfg.admin_chat, Some(-100123));
        assert_eq!(cfg.admin_ids, vec![11, 22, 33]);
        assert_eq!(cfg.admin_override, Some(44));
        assert_eq!(cfg.stream_url, "https://example.org/stream");
        assert_eq!(cfg.settings_file, PathBuf::from("/tmp/subs.json"));
        assert_eq!(cfg.bind_http, "127.0.0.1:9999");
        assert_eq!(cfg.retry_after_fallback, Duration::from_secs(30));
        let gh = cfg.github.unwrap();
        assert_eq!(gh.repo, "owner/repo");
        assert_eq!(gh.file_path, "conf/subs.json");
        assert_eq!(gh.branch, "master");
    }

    #[test]
    fn defaults_when_optional_absent() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "BOT_TOKEN=123:abc\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.stream_url, DEFAULT_STREAM_URL);
        assert_eq!(cfg.settings_file, PathBuf::from("subscriptions.json"));
        assert_eq!(cfg.bind_http, "127.0.0.1:8080");
        assert_eq!(cfg.retry_after_fallback, Duration::from_secs(60));
        assert!(cfg.admin_chat.is_none());
        assert!(cfg.admin_ids.is_empty());
        assert!(cfg.admin_override.is_none());
        assert!(cfg.github.is_none());
    }

    #[test]
    fn empty_values_count_as_unset() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            concat!(
                "BOT_TOKEN=\n",
                "GITHUB_TOKEN=tok\n",
                "GITHUB_REPO=\n",
                "STREAM_URL=\n",
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert!(cfg.bot_token.is_none());
        // A token without a repo is not a usable mirror target.
        assert!(cfg.github.is_none());
        assert_eq!(cfg.stream_url, DEFAULT_STREAM_URL);
    }

    #[test]
    fn missing_env_file_errors() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert!(Settings::from_env("/nonexistent/.env").is_err());
    }

    #[test]
    fn csv_helper() {
        assert_eq!(csv_u64("1, 2, x,3"), vec![1, 2, 3]);
        assert!(csv_u64("").is_empty());
    }
}
