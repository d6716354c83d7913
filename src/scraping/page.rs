//! The narrow page interface the resolver and driver are written against.
//!
//! [`crate::scraping::cdp::CdpSession`] implements it over a real Chromium tab;
//! tests implement it over scripted page state.

use crate::scraping::selectors::Locator;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Which document a lookup runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRef {
    Main,
    /// Subframe by position in depth-first attachment order (0-based).
    Sub(usize),
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRef::Main => write!(f, "main"),
            FrameRef::Sub(i) => write!(f, "frame[{}]", i),
        }
    }
}

/// Description of an attached subframe, used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub name: String,
    pub url: String,
    /// `false` for cross-origin frames whose document cannot be inspected.
    pub accessible: bool,
}

/// A resolved element: enough to find it again for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub field: String,
    pub frame: FrameRef,
    pub locator: Locator,
    /// Index among the locator's matches in that frame.
    pub index: usize,
}

#[async_trait]
pub trait PageSurface: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Subframes currently attached, in depth-first attachment order.
    async fn frames(&self) -> Result<Vec<FrameInfo>>;

    /// Number of elements `locator` matches in `frame`.
    async fn count(&self, frame: FrameRef, locator: &Locator) -> Result<usize>;

    async fn click(&self, el: &ElementHandle) -> Result<()>;

    /// Set an input's value, or pick the matching `<option>` of a select.
    async fn fill(&self, el: &ElementHandle, text: &str) -> Result<()>;

    /// Ensure a checkbox is checked.
    async fn check(&self, el: &ElementHandle) -> Result<()>;

    /// Submit the form owning `el`, falling back to an Enter key press.
    async fn submit(&self, el: &ElementHandle) -> Result<()>;

    async fn outer_html(&self, el: &ElementHandle) -> Result<String>;

    /// Visible text of the main document and every accessible subframe.
    async fn page_text(&self) -> Result<String>;

    /// Release the underlying browser resources. Called exactly once per run.
    async fn release(&self) -> Result<()>;
}

/// Acquires a fresh page (and whatever owns it) for a single run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageSurface>>;
}
