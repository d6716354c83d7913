//! Chromium-backed [`PageSurface`].
//!
//! Every lookup and action is a small script evaluated in the top-level page.
//! Scripts walk same-origin subframes themselves (`contentDocument`), so one
//! code path covers the main document and every frame the site nests its
//! forms in. Cross-origin frames are reported as inaccessible.

use crate::core::config::ScoutConfig;
use crate::core::errors::DriverError;
use crate::scraping::browser_manager::{self, LaunchProfile};
use crate::scraping::page::{BrowserLauncher, ElementHandle, FrameInfo, FrameRef, PageSurface};
use crate::scraping::selectors::Locator;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DOM_PRELUDE: &str = r#"
const __frames = () => {
  const out = [];
  const walk = (doc) => {
    let els = [];
    try { els = Array.from(doc.querySelectorAll('iframe, frame')); } catch (_) {}
    for (const f of els) {
      let d = null;
      try { d = f.contentDocument || (f.contentWindow && f.contentWindow.document) || null; } catch (_) { d = null; }
      out.push({ doc: d, name: f.getAttribute('name') || f.id || '', url: f.getAttribute('src') || '' });
      if (d) walk(d);
    }
  };
  walk(document);
  return out;
};
const __doc = (frame) => frame < 0 ? document : ((__frames()[frame] || {}).doc || null);
const __textOf = (el) => String(el.innerText || el.value || el.textContent || '');
const __find = (doc, loc) => {
  if (!doc) return [];
  try {
    if (loc.kind === 'css') return Array.from(doc.querySelectorAll(loc.value));
    if (loc.kind === 'xpath') {
      const r = doc.evaluate(loc.value, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      const out = [];
      for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i));
      return out;
    }
    if (loc.kind === 'text') {
      const hits = Array.from(doc.querySelectorAll(loc.tag)).filter(e => __textOf(e).includes(loc.value));
      return hits.filter(e => !hits.some(o => o !== e && e.contains(o)));
    }
  } catch (_) {}
  return [];
};
const __target = (req) => __find(__doc(req.frame), req.locator)[req.index] || null;
const __win = (el) => (el.ownerDocument && el.ownerDocument.defaultView) || window;
"#;

const COUNT_JS: &str = "return __find(__doc(req.frame), req.locator).length;";

const FRAMES_JS: &str =
    "return __frames().map(f => ({ name: f.name, url: f.url, accessible: !!f.doc }));";

const CLICK_JS: &str = r#"
const el = __target(req);
if (!el) return { ok: false, error: 'element detached' };
try { el.scrollIntoView({ block: 'center' }); } catch (_) {}
el.click();
return { ok: true };
"#;

const FILL_JS: &str = r#"
const el = __target(req);
if (!el) return { ok: false, error: 'element detached' };
const win = __win(el);
const fire = (t) => { try { el.dispatchEvent(new win.Event(t, { bubbles: true })); } catch (_) {} };
try { el.focus(); } catch (_) {}
const want = String(req.text);
if (el.tagName === 'SELECT') {
  const opts = Array.from(el.options);
  let pick = opts.find(o => o.value === want)
    || opts.find(o => (o.text || '').trim() === want);
  const n = Number(want);
  if (!pick && !Number.isNaN(n)) {
    pick = opts
      .filter(o => o.value !== '' && !Number.isNaN(Number(o.value)) && Number(o.value) >= n)
      .sort((a, b) => Number(a.value) - Number(b.value))[0];
  }
  if (!pick) return { ok: false, error: 'no matching option' };
  el.value = pick.value;
} else {
  el.value = want;
}
fire('input'); fire('change');
return { ok: true };
"#;

const CHECK_JS: &str = r#"
const el = __target(req);
if (!el) return { ok: false, error: 'element detached' };
let box = el;
if (box.tagName !== 'INPUT') {
  box = el.querySelector('input[type=checkbox]')
    || (el.htmlFor && el.ownerDocument.getElementById(el.htmlFor))
    || el;
}
if (box.type === 'checkbox' && box.checked) return { ok: true, changed: false };
box.click();
return { ok: true, changed: true };
"#;

const SUBMIT_JS: &str = r#"
const el = __target(req);
if (!el) return { ok: false, error: 'element detached' };
const form = el.form || (el.closest && el.closest('form'));
if (form && typeof form.requestSubmit === 'function') { form.requestSubmit(); return { ok: true, by: 'requestSubmit' }; }
if (form) { form.submit(); return { ok: true, by: 'submit' }; }
const win = __win(el);
try { el.focus(); } catch (_) {}
for (const t of ['keydown', 'keypress', 'keyup']) {
  el.dispatchEvent(new win.KeyboardEvent(t, { key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true }));
}
return { ok: true, by: 'enter' };
"#;

const OUTER_HTML_JS: &str = r#"
const el = __target(req);
if (!el) return { ok: false, error: 'element detached' };
return { ok: true, html: String(el.outerHTML || '') };
"#;

const PAGE_TEXT_JS: &str = r#"
const parts = [String((document.body && document.body.innerText) || '')];
for (const f of __frames()) {
  if (f.doc && f.doc.body) parts.push(String(f.doc.body.innerText || ''));
}
return parts.join('\n');
"#;

fn script(body: &str, req: &Value) -> String {
    format!(
        "(() => {{\n{}\nconst req = {};\n{}\n}})()",
        DOM_PRELUDE, req, body
    )
}

fn frame_index(frame: FrameRef) -> i64 {
    match frame {
        FrameRef::Main => -1,
        FrameRef::Sub(i) => i as i64,
    }
}

fn element_request(el: &ElementHandle) -> Value {
    json!({
        "frame": frame_index(el.frame),
        "locator": el.locator,
        "index": el.index,
    })
}

/// One launched browser with one tab, owned by a single automation run.
pub struct CdpSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: tokio::task::JoinHandle<()>,
    settle_timeout: Duration,
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        // Browser's own Drop kills the child process if release() never ran.
        self.handler_task.abort();
    }
}

impl CdpSession {
    async fn eval(&self, js: String) -> Result<Value> {
        let v = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| anyhow!("evaluate failed: {}", e))?;
        Ok(v.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn act(&self, action: &str, el: &ElementHandle, extra: Option<(&str, &str)>) -> Result<Value> {
        let mut req = element_request(el);
        if let Some((k, v)) = extra {
            req[k] = json!(v);
        }
        let body = match action {
            "click" => CLICK_JS,
            "fill" => FILL_JS,
            "check" => CHECK_JS,
            "submit" => SUBMIT_JS,
            _ => OUTER_HTML_JS,
        };
        let v = self.eval(script(body, &req)).await?;
        if v.get("ok").and_then(|x| x.as_bool()).unwrap_or(false) {
            Ok(v)
        } else {
            let err = v
                .get("error")
                .and_then(|x| x.as_str())
                .unwrap_or("unknown error");
            Err(anyhow!(
                "{} on '{}' ({} in {}) failed: {}",
                action,
                el.field,
                el.locator,
                el.frame,
                err
            ))
        }
    }
}

#[async_trait]
impl PageSurface for CdpSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("navigation to {} failed: {}", url, e))?;
        browser_manager::wait_until_settled(&self.page, self.settle_timeout).await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let v = self.eval("location.href".to_string()).await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>> {
        let v = self.eval(script(FRAMES_JS, &json!({}))).await?;
        let frames = v
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|f| FrameInfo {
                        name: f.get("name").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
                        url: f.get("url").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
                        accessible: f.get("accessible").and_then(|x| x.as_bool()).unwrap_or(false),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(frames)
    }

    async fn count(&self, frame: FrameRef, locator: &Locator) -> Result<usize> {
        let req = json!({ "frame": frame_index(frame), "locator": locator });
        let v = self.eval(script(COUNT_JS, &req)).await?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, el: &ElementHandle) -> Result<()> {
        self.act("click", el, None).await.map(|_| ())
    }

    async fn fill(&self, el: &ElementHandle, text: &str) -> Result<()> {
        self.act("fill", el, Some(("text", text))).await.map(|_| ())
    }

    async fn check(&self, el: &ElementHandle) -> Result<()> {
        self.act("check", el, None).await.map(|_| ())
    }

    async fn submit(&self, el: &ElementHandle) -> Result<()> {
        self.act("submit", el, None).await.map(|_| ())
    }

    async fn outer_html(&self, el: &ElementHandle) -> Result<String> {
        let v = self.act("outer_html", el, None).await?;
        Ok(v.get("html")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn page_text(&self) -> Result<String> {
        let v = self.eval(script(PAGE_TEXT_JS, &json!({}))).await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    async fn release(&self) -> Result<()> {
        let taken = self.browser.lock().await.take();
        let result = match taken {
            Some(mut browser) => {
                if let Err(e) = self.page.clone().close().await {
                    warn!("Page close error (non-fatal): {}", e);
                }
                browser
                    .close()
                    .await
                    .map(|_| ())
                    .map_err(|e| anyhow!("browser close failed: {}", e))
            }
            None => Ok(()),
        };
        self.handler_task.abort();
        info!("🛑 Automation browser released");
        result
    }
}

/// Launches a dedicated headless browser per automation run.
#[derive(Debug, Clone)]
pub struct CdpLauncher {
    exe: Option<String>,
    headless: bool,
    viewport: (u32, u32),
    settle_timeout: Duration,
}

impl CdpLauncher {
    pub fn from_config(config: &ScoutConfig) -> Self {
        let settings = config.driver.resolve();
        Self {
            exe: config.browser.resolve_executable(),
            headless: config.browser.resolve_headless(),
            viewport: config.browser.resolve_viewport(),
            settle_timeout: settings.navigation_timeout,
        }
    }
}

#[async_trait]
impl BrowserLauncher for CdpLauncher {
    async fn launch(&self) -> Result<Box<dyn PageSurface>> {
        let exe = self.exe.clone().ok_or_else(|| {
            DriverError::Configuration(
                "No browser found. Install Chrome or Chromium, or set CHROME_EXECUTABLE.".into(),
            )
        })?;

        info!("🚀 Launching automation browser ({})", exe);
        let config = LaunchProfile {
            executable: &exe,
            headless: self.headless,
            viewport: self.viewport,
            user_agent: browser_manager::random_user_agent(),
        }
        .to_config()?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser ({}): {}", exe, e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => {
                let mut browser = browser;
                let _ = browser.close().await;
                handler_task.abort();
                return Err(anyhow!("Failed to open tab: {}", e));
            }
        };

        Ok(Box::new(CdpSession {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
            settle_timeout: self.settle_timeout,
        }))
    }
}
