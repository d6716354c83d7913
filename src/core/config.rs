use crate::core::errors::DriverError;
use secrecy::SecretString;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ScoutConfig: file-based config loader (auction-scout.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "AUCTION_SCOUT_CONFIG";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_LOGIN_ID: &str = "AUCTION_LOGIN_ID";
pub const ENV_PASSWORD: &str = "AUCTION_PASSWORD";
pub const ENV_LINE_TOKEN: &str = "LINE_CHANNEL_TOKEN";

const DEFAULT_BASE_URL: &str = "https://auction.example.jp/";

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Remote auction site sub-config (the `site` key in auction-scout.json).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SiteConfig {
    pub base_url: Option<String>,
    pub login_url: Option<String>,
    /// Substring of the URL the site lands on after a successful login.
    pub post_login_url_fragment: Option<String>,
    /// Inventory categories whose "select all" affordance is clicked before searching.
    pub categories: Option<Vec<String>>,
    /// Transaction-status checkboxes used to narrow the result list.
    pub status_filters: Option<Vec<String>>,
    pub login_id: Option<String>,
    /// Never logged.
    pub password: Option<String>,
}

/// Credentials for the remote site, resolved at job-run time.
#[derive(Clone, Debug)]
pub struct SiteCredentials {
    pub login_id: String,
    pub password: SecretString,
}

impl SiteConfig {
    /// Base URL: `AUCTION_BASE_URL` env var → JSON field → built-in default.
    pub fn resolve_base_url(&self) -> String {
        env_string("AUCTION_BASE_URL")
            .or_else(|| non_empty(&self.base_url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Login URL: `AUCTION_LOGIN_URL` env var → JSON field → `{base}/login`.
    pub fn resolve_login_url(&self) -> String {
        if let Some(u) = env_string("AUCTION_LOGIN_URL").or_else(|| non_empty(&self.login_url)) {
            return u;
        }
        let base = self.resolve_base_url();
        url::Url::parse(&base)
            .and_then(|b| b.join("login"))
            .map(|u| u.to_string())
            .unwrap_or(base)
    }

    pub fn resolve_post_login_fragment(&self) -> String {
        env_string("AUCTION_POST_LOGIN_URL")
            .or_else(|| non_empty(&self.post_login_url_fragment))
            .unwrap_or_else(|| "/menu".to_string())
    }

    pub fn resolve_categories(&self) -> Vec<String> {
        if let Some(v) = env_string("AUCTION_CATEGORIES") {
            return v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        self.categories
            .clone()
            .unwrap_or_else(|| vec!["乗用車".to_string(), "輸入車".to_string()])
    }

    pub fn resolve_status_filters(&self) -> Vec<String> {
        self.status_filters
            .clone()
            .unwrap_or_else(|| vec!["出品中".to_string()])
    }

    /// Credentials: env vars win over the JSON fields.
    ///
    /// Missing values surface as [`DriverError::Configuration`] so the caller
    /// fails the job instead of crashing the process at startup.
    pub fn credentials(&self) -> Result<SiteCredentials, DriverError> {
        let login_id = env_string(ENV_LOGIN_ID).or_else(|| non_empty(&self.login_id));
        let password = env_string(ENV_PASSWORD).or_else(|| non_empty(&self.password));
        match (login_id, password) {
            (Some(login_id), Some(password)) => Ok(SiteCredentials {
                login_id,
                password: SecretString::from(password),
            }),
            (None, _) => Err(DriverError::Configuration(format!(
                "{} is not set",
                ENV_LOGIN_ID
            ))),
            (_, None) => Err(DriverError::Configuration(format!(
                "{} is not set",
                ENV_PASSWORD
            ))),
        }
    }
}

/// Headless browser sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct BrowserSettings {
    pub chrome_executable: Option<String>,
    pub headless: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl BrowserSettings {
    /// Executable: `CHROME_EXECUTABLE` (must exist) → JSON field → auto-discovery.
    pub fn resolve_executable(&self) -> Option<String> {
        chrome_executable_override()
            .or_else(|| non_empty(&self.chrome_executable).filter(|p| Path::new(p).exists()))
            .or_else(crate::scraping::browser_manager::find_chrome_executable)
    }

    pub fn resolve_headless(&self) -> bool {
        if let Some(v) = env_string("AUCTION_SCOUT_HEADFUL") {
            return !matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        self.headless.unwrap_or(true)
    }

    pub fn resolve_viewport(&self) -> (u32, u32) {
        (self.width.unwrap_or(1366), self.height.unwrap_or(900))
    }
}

/// Timing and sizing knobs for a Driver run.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct DriverConfig {
    pub poll_interval_ms: Option<u64>,
    pub element_timeout_ms: Option<u64>,
    pub navigation_timeout_ms: Option<u64>,
    /// Hard wall-clock bound on a whole run, enforced by the job coordinator.
    pub run_timeout_secs: Option<u64>,
    pub max_rows: Option<usize>,
    pub top_n: Option<usize>,
}

/// Fully resolved driver timings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverSettings {
    pub poll_interval: Duration,
    pub element_timeout: Duration,
    /// Short wait used for optional affordances (categories, filters, markers).
    pub optional_timeout: Duration,
    pub navigation_timeout: Duration,
    pub run_timeout: Duration,
    /// Bound on closing the browser once a run has ended.
    pub release_timeout: Duration,
    pub max_rows: usize,
    pub top_n: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            element_timeout: Duration::from_secs(10),
            optional_timeout: Duration::from_secs(2),
            navigation_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(180),
            release_timeout: Duration::from_secs(10),
            max_rows: 50,
            top_n: 10,
        }
    }
}

impl DriverConfig {
    pub fn resolve(&self) -> DriverSettings {
        let d = DriverSettings::default();
        let ms = |env: &str, field: Option<u64>, fallback: Duration| {
            env_parse::<u64>(env)
                .or(field)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        DriverSettings {
            poll_interval: ms("AUCTION_POLL_INTERVAL_MS", self.poll_interval_ms, d.poll_interval),
            element_timeout: ms(
                "AUCTION_ELEMENT_TIMEOUT_MS",
                self.element_timeout_ms,
                d.element_timeout,
            ),
            optional_timeout: d.optional_timeout,
            navigation_timeout: ms(
                "AUCTION_NAVIGATION_TIMEOUT_MS",
                self.navigation_timeout_ms,
                d.navigation_timeout,
            ),
            run_timeout: env_parse::<u64>("AUCTION_RUN_TIMEOUT_SECS")
                .or(self.run_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(d.run_timeout),
            release_timeout: d.release_timeout,
            max_rows: env_parse("AUCTION_MAX_ROWS").or(self.max_rows).unwrap_or(d.max_rows),
            top_n: env_parse("AUCTION_TOP_N").or(self.top_n).unwrap_or(d.top_n),
        }
    }
}

/// Which slot form the conversation collects.
#[derive(serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormKind {
    #[default]
    Basic,
    Extended,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ConversationConfig {
    pub reset_keyword: Option<String>,
    pub skip_keywords: Option<Vec<String>>,
    pub form: Option<FormKind>,
    /// Idle time after which an abandoned session is evicted.
    pub session_ttl_secs: Option<u64>,
}

impl ConversationConfig {
    pub fn resolve_reset_keyword(&self) -> String {
        non_empty(&self.reset_keyword).unwrap_or_else(|| "リセット".to_string())
    }

    pub fn resolve_skip_keywords(&self) -> Vec<String> {
        self.skip_keywords
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec!["スキップ".to_string(), "なし".to_string()])
    }

    pub fn resolve_form(&self) -> FormKind {
        match env_string("AUCTION_SCOUT_FORM").as_deref() {
            Some("extended") => FormKind::Extended,
            Some("basic") => FormKind::Basic,
            _ => self.form.unwrap_or_default(),
        }
    }

    pub fn resolve_session_ttl(&self) -> Duration {
        Duration::from_secs(
            env_parse("AUCTION_SESSION_TTL_SECS")
                .or(self.session_ttl_secs)
                .unwrap_or(30 * 60),
        )
    }
}

/// Messaging platform sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct LineConfig {
    /// Never logged.
    pub channel_access_token: Option<String>,
    pub api_base: Option<String>,
}

impl LineConfig {
    pub fn resolve_token(&self) -> Option<SecretString> {
        env_string(ENV_LINE_TOKEN)
            .or_else(|| non_empty(&self.channel_access_token))
            .map(SecretString::from)
    }

    pub fn resolve_api_base(&self) -> String {
        non_empty(&self.api_base).unwrap_or_else(|| "https://api.line.me".to_string())
    }
}

/// Top-level config loaded from `auction-scout.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ScoutConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub line: LineConfig,
}

/// Load `auction-scout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `AUCTION_SCOUT_CONFIG` env var path
/// 2. `./auction-scout.json`
/// 3. `~/.auction-scout/config.json`
///
/// Missing file → `ScoutConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `ScoutConfig::default()`.
pub fn load_scout_config() -> ScoutConfig {
    let mut candidates = vec![std::path::PathBuf::from("auction-scout.json")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".auction-scout").join("config.json"));
    }
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.insert(0, std::path::PathBuf::from(env_path));
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        return match parse_scout_config(&contents) {
            Ok(cfg) => {
                tracing::info!("auction-scout config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    "auction-scout config parse error at {}: {}; using defaults",
                    path.display(),
                    e
                );
                ScoutConfig::default()
            }
        };
    }

    ScoutConfig::default()
}

pub fn parse_scout_config(contents: &str) -> anyhow::Result<ScoutConfig> {
    Ok(serde_json::from_str::<ScoutConfig>(contents)?)
}

/// Optional override for the Chromium-family browser executable.
///
/// Only returns a value when `CHROME_EXECUTABLE` is set to an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = env_string(ENV_CHROME_EXECUTABLE)?;
    if Path::new(&p).exists() {
        Some(p)
    } else {
        None
    }
}

/// HTTP port: `--port N` / `--port=N` → `AUCTION_SCOUT_PORT` → `PORT` → 3000.
pub fn resolve_port<I: IntoIterator<Item = String>>(args: I) -> u16 {
    let mut args = args.into_iter();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(p) = args.next().and_then(|v| v.parse::<u16>().ok()) {
                return p;
            }
        } else if let Some(p) = a.strip_prefix("--port=").and_then(|v| v.parse::<u16>().ok()) {
            return p;
        }
    }
    ["AUCTION_SCOUT_PORT", "PORT"]
        .iter()
        .find_map(|k| env_parse::<u16>(k))
        .unwrap_or(3000)
}
