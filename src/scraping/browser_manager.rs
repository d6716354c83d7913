//! Browser process management for automation runs.
//!
//! Finds a Chromium-family executable, turns a [`LaunchProfile`] into a
//! `chromiumoxide` config, and waits for pages to settle after navigation.
//! Every run launches and owns its own browser; see `cdp::CdpLauncher`.

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

/// Chromium-family desktop agents. The auction site serves a degraded layout
/// to anything else.
const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

const PATH_NAMES: &[&str] = &[
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
    "brave-browser",
];

#[cfg(target_os = "linux")]
const INSTALL_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];
#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];
#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &[];

/// Flags every automation browser starts with.
///
/// `AutomationControlled` is disabled because the login form is not rendered
/// while `navigator.webdriver` is set; `ja-JP` selects the layout the locator
/// tables target.
const BASE_ARGS: &[&str] = &[
    "--disable-gpu",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--no-first-run",
    "--no-default-browser-check",
    "--mute-audio",
    "--lang=ja-JP",
    "--disable-blink-features=AutomationControlled",
];

const SETTLE_STATE_JS: &str =
    "[document.readyState === 'complete', performance.getEntriesByType('resource').length]";
const SETTLE_POLL: Duration = Duration::from_millis(250);
const SETTLE_QUIET: Duration = Duration::from_millis(500);

pub fn random_user_agent() -> &'static str {
    use rand::prelude::*;
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

/// `CHROME_EXECUTABLE`, then `PATH`, then the platform's usual install paths.
pub fn find_chrome_executable() -> Option<String> {
    crate::core::config::chrome_executable_override()
        .or_else(|| std::env::var_os("PATH").and_then(|p| search_path(&p, PATH_NAMES)))
        .or_else(|| first_existing(INSTALL_PATHS.iter().map(PathBuf::from)))
}

fn search_path(path_var: &OsStr, names: &[&str]) -> Option<String> {
    first_existing(
        std::env::split_paths(path_var)
            .flat_map(|dir| names.iter().map(move |name| dir.join(name))),
    )
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<String> {
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .map(|p| p.to_string_lossy().into_owned())
}

/// How one automation browser is started.
#[derive(Debug, Clone)]
pub struct LaunchProfile<'a> {
    pub executable: &'a str,
    pub headless: bool,
    pub viewport: (u32, u32),
    pub user_agent: &'a str,
}

impl LaunchProfile<'_> {
    pub fn args(&self) -> Vec<String> {
        BASE_ARGS
            .iter()
            .map(|a| a.to_string())
            .chain([format!("--user-agent={}", self.user_agent)])
            .collect()
    }

    pub fn to_config(&self) -> Result<BrowserConfig> {
        let (width, height) = self.viewport;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(self.executable)
            .viewport(Viewport {
                width,
                height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(width, height);
        for arg in self.args() {
            builder = builder.arg(arg);
        }
        if !self.headless {
            builder = builder.with_head();
        }
        builder
            .build()
            .map_err(|e| anyhow!("invalid browser launch profile: {}", e))
    }
}

/// Settled once the document is complete and its resource count has held
/// steady for the quiet period.
#[derive(Debug)]
struct SettleTracker {
    quiet: Duration,
    last_count: Option<u64>,
    steady_since: Instant,
}

impl SettleTracker {
    fn new(quiet: Duration, now: Instant) -> Self {
        Self {
            quiet,
            last_count: None,
            steady_since: now,
        }
    }

    fn observe(&mut self, complete: bool, count: u64, now: Instant) -> bool {
        if !complete || self.last_count != Some(count) {
            self.last_count = Some(count);
            self.steady_since = now;
            return false;
        }
        now.duration_since(self.steady_since) >= self.quiet
    }
}

/// Wait for the page to go quiet, giving up silently after `limit`.
pub async fn wait_until_settled(page: &Page, limit: Duration) {
    let start = Instant::now();
    let mut tracker = SettleTracker::new(SETTLE_QUIET, start);
    while start.elapsed() < limit {
        let (complete, count) = read_settle_state(page).await;
        if tracker.observe(complete, count, Instant::now()) {
            debug!(
                "page settled after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            return;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
    debug!("page still busy after {}ms, continuing", limit.as_millis());
}

async fn read_settle_state(page: &Page) -> (bool, u64) {
    let value = match page.evaluate(SETTLE_STATE_JS).await {
        Ok(v) => v.into_value::<Value>().unwrap_or(Value::Null),
        Err(_) => return (false, 0),
    };
    (
        value[0].as_bool().unwrap_or(false),
        value[1].as_u64().unwrap_or(0),
    )
}
