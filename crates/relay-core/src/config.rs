use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_BOT_MENTION: &str = "@ScopeShield_Bot";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Typed configuration for the relay.
///
/// Values come from the process environment (after an optional `.env` file).
#[derive(Clone, Debug)]
pub struct Config {
    // Required secrets
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub assistant_id: String,
    pub webhook_secret: String,

    // Telegram
    pub bot_mention: String,

    // HTTP surface
    pub port: u16,
    pub public_url: Option<String>,

    // Persistence
    pub threads_file: PathBuf,

    // Assistant backend
    pub openai_base_url: String,
    pub poll_interval: Duration,
    pub run_timeout: Duration,
    pub history_window: u32,

    // Keep-alive
    pub keepalive_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (env, map, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = required(&get, "TELEGRAM_BOT_TOKEN")?;
        let openai_api_key = required(&get, "OPENAI_API_KEY")?;
        let assistant_id = required(&get, "ASSISTANT_ID")?;
        let webhook_secret = required(&get, "WEBHOOK_SECRET")?.trim().to_string();
        if !is_path_safe_secret(&webhook_secret) {
            return Err(Error::Config(
                "WEBHOOK_SECRET may only contain A-Z, a-z, 0-9, '_' and '-'".to_string(),
            ));
        }

        let bot_mention = normalize_mention(
            &get("BOT_MENTION").unwrap_or_else(|| DEFAULT_BOT_MENTION.to_string()),
        );

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT is not a valid port number: {raw}")))?,
            None => DEFAULT_PORT,
        };

        // Render exposes its own URL; accept it as a fallback.
        let public_url = get("PUBLIC_URL")
            .or_else(|| get("RENDER_EXTERNAL_URL"))
            .map(|u| u.trim().trim_end_matches('/').to_string());

        let threads_file =
            PathBuf::from(get("THREADS_FILE").unwrap_or_else(|| "threads.json".to_string()));

        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let poll_interval =
            Duration::from_millis(parse_u64(&get, "ASSISTANT_POLL_INTERVAL_MS").unwrap_or(1000));
        let run_timeout =
            Duration::from_secs(parse_u64(&get, "ASSISTANT_RUN_TIMEOUT_SECS").unwrap_or(300));
        let history_window = parse_u64(&get, "ASSISTANT_HISTORY_WINDOW")
            .unwrap_or(5)
            .clamp(1, 100) as u32;

        let keepalive_interval = Duration::from_secs(
            parse_u64(&get, "KEEPALIVE_INTERVAL_SECS")
                .unwrap_or(14 * 60)
                .max(1),
        );

        Ok(Self {
            telegram_bot_token,
            openai_api_key,
            assistant_id,
            webhook_secret,
            bot_mention,
            port,
            public_url,
            threads_file,
            openai_base_url,
            poll_interval,
            run_timeout,
            history_window,
            keepalive_interval,
        })
    }

    /// Path the webhook is served on, e.g. `/webhook/<secret>`.
    pub fn webhook_path(&self) -> String {
        format!("/webhook/{}", self.webhook_secret)
    }

    /// Full URL Telegram should deliver updates to, if a public URL is known.
    pub fn webhook_url(&self) -> Option<String> {
        self.public_url
            .as_ref()
            .map(|base| format!("{base}{}", self.webhook_path()))
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key).ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    get(key).and_then(|s| s.trim().parse::<u64>().ok())
}

/// The secret becomes a literal route segment, and Telegram's `secret_token`
/// uses the same alphabet.
fn is_path_safe_secret(secret: &str) -> bool {
    !secret.is_empty()
        && secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn normalize_mention(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with('@') {
        raw.to_string()
    } else {
        format!("@{raw}")
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
