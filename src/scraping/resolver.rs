//! Selector fallback resolution.
//!
//! Live pages: [`Resolver::resolve`] tries each candidate in order, first in
//! the main document and then in every accessible subframe, polling until
//! something matches or the timeout elapses. The first hit wins; hits from different candidates
//! are never combined.
//!
//! Static fragments: [`resolve_in_fragment`] applies the same first-match rule
//! to a parsed HTML subtree (used for per-row field lookups during extraction).

use crate::scraping::page::{ElementHandle, FrameInfo, FrameRef, PageSurface};
use crate::scraping::selectors::SelectorCandidateSet;
use scraper::{ElementRef, Selector};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Nothing matched before the timeout. Carries what was tried for the log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{field}' not found after {}ms (candidates: [{}]; frames: [{}]{})",
    .waited.as_millis(),
    .tried.join(", "),
    .frames.join(", "),
    .last_error.as_ref().map(|e| format!("; last error: {}", e)).unwrap_or_default())]
pub struct NotFound {
    pub field: String,
    pub tried: Vec<String>,
    pub frames: Vec<String>,
    pub waited: Duration,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    poll_interval: Duration,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl Resolver {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Find the first element matched by `set`, waiting up to `timeout`.
    ///
    /// The page is always scanned at least once, even with a zero timeout.
    pub async fn resolve(
        &self,
        page: &dyn PageSurface,
        set: &SelectorCandidateSet,
        timeout: Duration,
    ) -> Result<ElementHandle, NotFound> {
        let start = Instant::now();
        let mut frames_seen: Vec<FrameInfo> = Vec::new();
        let mut last_error: Option<String> = None;

        loop {
            let (hit, frames) = self.scan(page, set, &mut last_error).await;
            if let Some(handle) = hit {
                debug!(
                    "resolver: '{}' matched {} in {} after {}ms",
                    set.field,
                    handle.locator,
                    handle.frame,
                    start.elapsed().as_millis()
                );
                return Ok(handle);
            }
            frames_seen = frames;

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }

        Err(NotFound {
            field: set.field.clone(),
            tried: set.candidates.iter().map(|c| c.to_string()).collect(),
            frames: std::iter::once("main".to_string())
                .chain(frames_seen.iter().enumerate().map(|(i, f)| {
                    let label = if f.name.is_empty() { &f.url } else { &f.name };
                    if f.accessible {
                        format!("frame[{}]:{}", i, label)
                    } else {
                        format!("frame[{}]:{} (cross-origin)", i, label)
                    }
                }))
                .collect(),
            waited: start.elapsed(),
            last_error,
        })
    }

    /// `resolve` for optional affordances: a miss is not an error.
    pub async fn try_resolve(
        &self,
        page: &dyn PageSurface,
        set: &SelectorCandidateSet,
        timeout: Duration,
    ) -> Option<ElementHandle> {
        self.resolve(page, set, timeout).await.ok()
    }

    async fn scan(
        &self,
        page: &dyn PageSurface,
        set: &SelectorCandidateSet,
        last_error: &mut Option<String>,
    ) -> (Option<ElementHandle>, Vec<FrameInfo>) {
        let frames = match page.frames().await {
            Ok(f) => f,
            Err(e) => {
                *last_error = Some(e.to_string());
                Vec::new()
            }
        };

        let scopes: Vec<FrameRef> = std::iter::once(FrameRef::Main)
            .chain(
                frames
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.accessible)
                    .map(|(i, _)| FrameRef::Sub(i)),
            )
            .collect();

        // Candidate-major: a more specific candidate in any frame beats a
        // generic one in the main document.
        for locator in &set.candidates {
            for &scope in &scopes {
                match page.count(scope, locator).await {
                    Ok(n) if n > 0 => {
                        return (
                            Some(ElementHandle {
                                field: set.field.clone(),
                                frame: scope,
                                locator: locator.clone(),
                                index: 0,
                            }),
                            frames,
                        );
                    }
                    Ok(_) => {}
                    // Mid-navigation evaluation failures count as "not yet".
                    Err(e) => *last_error = Some(e.to_string()),
                }
            }
        }
        (None, frames)
    }
}

/// First element under `root` matched by any CSS candidate of `set`, in candidate order.
pub fn resolve_in_fragment<'a>(
    root: ElementRef<'a>,
    set: &SelectorCandidateSet,
) -> Option<ElementRef<'a>> {
    set.css_candidates().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        root.select(&selector).next()
    })
}

/// All elements under `root` matched by the first CSS candidate that matches anything.
pub fn resolve_all_in_fragment<'a>(
    root: ElementRef<'a>,
    set: &SelectorCandidateSet,
) -> Vec<ElementRef<'a>> {
    for css in set.css_candidates() {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let hits: Vec<_> = root.select(&selector).collect();
        if !hits.is_empty() {
            return hits;
        }
    }
    Vec::new()
}
