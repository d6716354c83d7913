//! Scripted page state for resolver and driver tests.

use crate::scraping::page::{BrowserLauncher, ElementHandle, FrameInfo, FrameRef, PageSurface};
use crate::scraping::selectors::Locator;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What happens to the page when an action fires.
#[derive(Debug, Clone, Default)]
pub(crate) struct Effect {
    pub set_url: Option<String>,
    pub add: Vec<(FrameRef, Locator, String)>,
    pub remove: Vec<(FrameRef, Locator)>,
    pub set_text: Option<String>,
}

impl Effect {
    pub fn url(url: &str) -> Self {
        Self {
            set_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn adding(mut self, frame: FrameRef, locator: Locator, html: &str) -> Self {
        self.add.push((frame, locator, html.to_string()));
        self
    }

    pub fn removing(mut self, frame: FrameRef, locator: Locator) -> Self {
        self.remove.push((frame, locator));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.set_text = Some(text.to_string());
        self
    }
}

#[derive(Default)]
struct State {
    url: String,
    frames: Vec<FrameInfo>,
    elements: HashMap<(FrameRef, Locator), String>,
    delayed: Vec<(usize, FrameRef, Locator, String)>,
    on_click: HashMap<Locator, Effect>,
    on_submit: HashMap<Locator, Effect>,
    on_goto: HashMap<String, Effect>,
    text: String,
    actions: Vec<String>,
    polls: usize,
}

impl State {
    fn apply(&mut self, effect: Option<Effect>) {
        let Some(effect) = effect else {
            return;
        };
        if let Some(url) = effect.set_url {
            self.url = url;
        }
        for (frame, locator) in effect.remove {
            self.elements.remove(&(frame, locator));
        }
        for (frame, locator, html) in effect.add {
            self.elements.insert((frame, locator), html);
        }
        if let Some(text) = effect.set_text {
            self.text = text;
        }
    }
}

/// Injected misbehaviour, checked outside the state lock.
#[derive(Debug, Clone, Default)]
struct Faults {
    fail_release: bool,
    hang_release: bool,
    hang_goto: bool,
    panic_on_click: Option<Locator>,
}

pub(crate) struct MockPage {
    state: Mutex<State>,
    pub releases: AtomicUsize,
    faults: Faults,
}

pub(crate) struct MockPageBuilder {
    state: State,
    faults: Faults,
}

impl MockPage {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(url: &str) -> MockPageBuilder {
        MockPageBuilder {
            state: State {
                url: url.to_string(),
                ..Default::default()
            },
            faults: Faults::default(),
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn lookup(&self, el: &ElementHandle) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(&(el.frame, el.locator.clone()))
            .cloned()
            .ok_or_else(|| anyhow!("element detached: {}", el.field))
    }
}

impl MockPageBuilder {
    pub fn with(mut self, frame: FrameRef, locator: Locator, html: &str) -> Self {
        self.state.elements.insert((frame, locator), html.to_string());
        self
    }

    pub fn with_frame(mut self, name: &str, accessible: bool) -> Self {
        self.state.frames.push(FrameInfo {
            name: name.to_string(),
            url: format!("https://auction.example.jp/{}", name),
            accessible,
        });
        self
    }

    pub fn appear_after(mut self, polls: usize, frame: FrameRef, locator: Locator, html: &str) -> Self {
        self.state.delayed.push((polls, frame, locator, html.to_string()));
        self
    }

    pub fn on_click(mut self, locator: Locator, effect: Effect) -> Self {
        self.state.on_click.insert(locator, effect);
        self
    }

    pub fn on_submit(mut self, locator: Locator, effect: Effect) -> Self {
        self.state.on_submit.insert(locator, effect);
        self
    }

    pub fn on_goto(mut self, url: &str, effect: Effect) -> Self {
        self.state.on_goto.insert(url.to_string(), effect);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.state.text = text.to_string();
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.faults.fail_release = true;
        self
    }

    /// `release` never completes (counted on entry).
    pub fn hanging_release(mut self) -> Self {
        self.faults.hang_release = true;
        self
    }

    /// Every navigation stalls forever.
    pub fn hanging_goto(mut self) -> Self {
        self.faults.hang_goto = true;
        self
    }

    /// Clicking an element found through `locator` panics.
    pub fn panic_on_click(mut self, locator: Locator) -> Self {
        self.faults.panic_on_click = Some(locator);
        self
    }

    pub fn build(self) -> Arc<MockPage> {
        Arc::new(MockPage {
            state: Mutex::new(self.state),
            releases: AtomicUsize::new(0),
            faults: self.faults,
        })
    }
}

#[async_trait]
impl PageSurface for Arc<MockPage> {
    async fn goto(&self, url: &str) -> Result<()> {
        if self.faults.hang_goto {
            futures::future::pending::<()>().await;
        }
        let mut st = self.state.lock().unwrap();
        st.actions.push(format!("goto:{}", url));
        st.url = url.to_string();
        let effect = st.on_goto.get(url).cloned();
        st.apply(effect);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>> {
        Ok(self.state.lock().unwrap().frames.clone())
    }

    async fn count(&self, frame: FrameRef, locator: &Locator) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        st.polls += 1;
        let polls = st.polls;
        let (ready, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut st.delayed).into_iter().partition(|d| d.0 <= polls);
        st.delayed = pending;
        for (_, f, l, html) in ready {
            st.elements.insert((f, l), html);
        }
        if let FrameRef::Sub(i) = frame {
            if !st.frames.get(i).map(|f| f.accessible).unwrap_or(false) {
                return Ok(0);
            }
        }
        Ok(usize::from(st.elements.contains_key(&(frame, locator.clone()))))
    }

    async fn click(&self, el: &ElementHandle) -> Result<()> {
        if self.faults.panic_on_click.as_ref() == Some(&el.locator) {
            panic!("scripted click failure on {}", el.field);
        }
        self.lookup(el)?;
        let mut st = self.state.lock().unwrap();
        st.actions.push(format!("click:{}", el.field));
        let effect = st.on_click.get(&el.locator).cloned();
        st.apply(effect);
        Ok(())
    }

    async fn fill(&self, el: &ElementHandle, text: &str) -> Result<()> {
        self.lookup(el)?;
        self.state
            .lock()
            .unwrap()
            .actions
            .push(format!("fill:{}={}", el.field, text));
        Ok(())
    }

    async fn check(&self, el: &ElementHandle) -> Result<()> {
        self.lookup(el)?;
        self.state
            .lock()
            .unwrap()
            .actions
            .push(format!("check:{}", el.field));
        Ok(())
    }

    async fn submit(&self, el: &ElementHandle) -> Result<()> {
        self.lookup(el)?;
        let mut st = self.state.lock().unwrap();
        st.actions.push(format!("submit:{}", el.field));
        let effect = st.on_submit.get(&el.locator).cloned();
        st.apply(effect);
        Ok(())
    }

    async fn outer_html(&self, el: &ElementHandle) -> Result<String> {
        self.lookup(el)
    }

    async fn page_text(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().text.clone())
    }

    async fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.faults.hang_release {
            futures::future::pending::<()>().await;
        }
        if self.faults.fail_release {
            return Err(anyhow!("browser close failed"));
        }
        Ok(())
    }
}

/// Hands out the same scripted page on every launch.
pub(crate) struct MockLauncher {
    pub page: Arc<MockPage>,
    pub launches: AtomicUsize,
    pub fail_launch: bool,
}

impl MockLauncher {
    pub fn new(page: Arc<MockPage>) -> Self {
        Self {
            page,
            launches: AtomicUsize::new(0),
            fail_launch: false,
        }
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self) -> Result<Box<dyn PageSurface>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(anyhow!("Failed to launch browser"));
        }
        Ok(Box::new(self.page.clone()))
    }
}
