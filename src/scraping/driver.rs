//! Remote site driver: one browser, one ordered pipeline, one release.
//!
//! The steps and their failure policies are data ([`PIPELINE`]). A `Fatal`
//! step error ends the run; a `Degrade` step error is logged and the run goes
//! on with whatever state the page is in. Whichever way the pipeline exits
//! (including a panic or the run timeout) the page is released exactly once.

use crate::core::config::{DriverSettings, ScoutConfig, SiteConfig, SiteCredentials};
use crate::errors::DriverError;
use crate::features::job_coordinator::ListingSearch;
use crate::scraping::cdp::CdpLauncher;
use crate::scraping::extract::{extract_listings, rank_listings};
use crate::scraping::page::{BrowserLauncher, PageSurface};
use crate::scraping::resolver::Resolver;
use crate::scraping::selectors::{SelectorCandidateSet, SiteSelectors};
use crate::types::{ListingRecord, SearchCriteria};
use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use futures::FutureExt;
use secrecy::ExposeSecret;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepName {
    Authenticate,
    SessionCollisionCheck,
    VenueSelection,
    KeywordSubmission,
    ResultFiltering,
    Extraction,
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepName::Authenticate => "authenticate",
            StepName::SessionCollisionCheck => "session collision check",
            StepName::VenueSelection => "venue selection",
            StepName::KeywordSubmission => "keyword submission",
            StepName::ResultFiltering => "result filtering",
            StepName::Extraction => "extraction",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the run with the step's error.
    Fatal,
    /// Log and continue.
    Degrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStep {
    pub name: StepName,
    pub policy: FailurePolicy,
}

/// Step order and failure policy of every run.
///
/// Venue selection tolerates missing categories internally; it only fails
/// when the search form never becomes reachable.
pub const PIPELINE: [PipelineStep; 6] = [
    PipelineStep {
        name: StepName::Authenticate,
        policy: FailurePolicy::Fatal,
    },
    PipelineStep {
        name: StepName::SessionCollisionCheck,
        policy: FailurePolicy::Fatal,
    },
    PipelineStep {
        name: StepName::VenueSelection,
        policy: FailurePolicy::Fatal,
    },
    PipelineStep {
        name: StepName::KeywordSubmission,
        policy: FailurePolicy::Fatal,
    },
    PipelineStep {
        name: StepName::ResultFiltering,
        policy: FailurePolicy::Degrade,
    },
    PipelineStep {
        name: StepName::Extraction,
        policy: FailurePolicy::Fatal,
    },
];

struct RunContext<'a> {
    page: &'a dyn PageSurface,
    criteria: &'a SearchCriteria,
    credentials: &'a SiteCredentials,
    records: Vec<ListingRecord>,
}

pub struct SiteDriver {
    launcher: Arc<dyn BrowserLauncher>,
    site: SiteConfig,
    selectors: SiteSelectors,
    settings: DriverSettings,
    resolver: Resolver,
}

impl SiteDriver {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        site: SiteConfig,
        selectors: SiteSelectors,
        settings: DriverSettings,
    ) -> Self {
        Self {
            launcher,
            site,
            selectors,
            resolver: Resolver::new(settings.poll_interval),
            settings,
        }
    }

    /// Real Chromium launcher, default locator table.
    pub fn from_config(config: &ScoutConfig) -> Self {
        Self::new(
            Arc::new(CdpLauncher::from_config(config)),
            config.site.clone(),
            SiteSelectors::default(),
            config.driver.resolve(),
        )
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Search the remote site. `Ok(vec![])` means the search ran and matched nothing.
    pub async fn run(&self, criteria: &SearchCriteria) -> Result<Vec<ListingRecord>, DriverError> {
        // Missing credentials fail the job before a browser is spent on it.
        let credentials = self.site.credentials()?;

        let page = self.launcher.launch().await.map_err(DriverError::from)?;
        let start = Instant::now();

        let pipeline = AssertUnwindSafe(self.execute(page.as_ref(), criteria, &credentials))
            .catch_unwind();
        let result = match tokio::time::timeout(self.settings.run_timeout, pipeline).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(DriverError::Unknown("driver step panicked".to_string())),
            Err(_) => Err(DriverError::timeout(
                "run",
                format!("exceeded {}ms", self.settings.run_timeout.as_millis()),
            )),
        };

        match tokio::time::timeout(self.settings.release_timeout, page.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("driver: browser release reported an error: {}", e),
            Err(_) => warn!(
                "driver: browser release did not finish within {}ms, dropping it",
                self.settings.release_timeout.as_millis()
            ),
        }
        info!(
            "driver: run finished in {}ms ({})",
            start.elapsed().as_millis(),
            match &result {
                Ok(r) => format!("{} record(s)", r.len()),
                Err(e) => e.to_string(),
            }
        );
        result
    }

    async fn execute(
        &self,
        page: &dyn PageSurface,
        criteria: &SearchCriteria,
        credentials: &SiteCredentials,
    ) -> Result<Vec<ListingRecord>, DriverError> {
        let mut ctx = RunContext {
            page,
            criteria,
            credentials,
            records: Vec::new(),
        };

        for step in PIPELINE.iter() {
            let started = Instant::now();
            debug!("driver: step '{}' started", step.name);
            match self.run_step(step.name, &mut ctx).await {
                Ok(()) => debug!(
                    "driver: step '{}' done in {}ms",
                    step.name,
                    started.elapsed().as_millis()
                ),
                Err(e) => match step.policy {
                    FailurePolicy::Fatal => {
                        error!("driver: step '{}' failed: {}", step.name, e);
                        return Err(e);
                    }
                    FailurePolicy::Degrade => {
                        warn!("driver: step '{}' degraded, continuing: {}", step.name, e);
                    }
                },
            }
        }
        Ok(ctx.records)
    }

    async fn run_step(&self, step: StepName, ctx: &mut RunContext<'_>) -> Result<(), DriverError> {
        match step {
            StepName::Authenticate => self.authenticate(ctx.page, ctx.credentials).await,
            StepName::SessionCollisionCheck => self.check_collision(ctx.page).await,
            StepName::VenueSelection => self.select_venues(ctx.page).await,
            StepName::KeywordSubmission => self.submit_keyword(ctx.page, ctx.criteria).await,
            StepName::ResultFiltering => self.filter_results(ctx.page).await,
            StepName::Extraction => {
                ctx.records = self.extract(ctx.page).await?;
                Ok(())
            }
        }
    }

    async fn authenticate(
        &self,
        page: &dyn PageSurface,
        credentials: &SiteCredentials,
    ) -> Result<(), DriverError> {
        let base = self.site.resolve_base_url();
        page.goto(&base)
            .await
            .map_err(|e| DriverError::timeout(StepName::Authenticate.to_string(), e.to_string()))?;

        if self
            .resolver
            .try_resolve(page, &self.selectors.logged_in_marker, self.settings.optional_timeout)
            .await
            .is_some()
        {
            info!("driver: existing session is already authenticated");
            return Ok(());
        }

        let login_url = self.site.resolve_login_url();
        page.goto(&login_url)
            .await
            .map_err(|e| DriverError::timeout(StepName::Authenticate.to_string(), e.to_string()))?;

        let auth = |e: &dyn fmt::Display| DriverError::AuthFailure(e.to_string());
        let timeout = self.settings.element_timeout;
        let user = self
            .resolver
            .resolve(page, &self.selectors.login_username, timeout)
            .await
            .map_err(|e| auth(&e))?;
        let password = self
            .resolver
            .resolve(page, &self.selectors.login_password, timeout)
            .await
            .map_err(|e| auth(&e))?;
        let submit = self
            .resolver
            .resolve(page, &self.selectors.login_submit, timeout)
            .await
            .map_err(|e| auth(&e))?;

        page.fill(&user, &credentials.login_id)
            .await
            .map_err(|e| auth(&e))?;
        page.fill(&password, credentials.password.expose_secret())
            .await
            .map_err(|e| auth(&e))?;
        page.click(&submit).await.map_err(|e| auth(&e))?;

        self.confirm_login(page).await
    }

    /// Logged in once either the marker shows up or the post-login URL is reached.
    async fn confirm_login(&self, page: &dyn PageSurface) -> Result<(), DriverError> {
        let fragment = self.site.resolve_post_login_fragment();
        let limit = self.settings.navigation_timeout;

        let marker = async {
            match self
                .resolver
                .resolve(page, &self.selectors.logged_in_marker, limit)
                .await
            {
                Ok(_) => "logged-in marker",
                Err(_) => futures::future::pending::<&'static str>().await,
            }
        };
        let landed = async {
            loop {
                if let Ok(url) = page.current_url().await {
                    if url.contains(&fragment) {
                        return "post-login url";
                    }
                }
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        };

        let raced = tokio::time::timeout(limit, async {
            tokio::select! {
                via = marker => via,
                via = landed => via,
            }
        })
        .await;

        match raced {
            Ok(via) => {
                info!("driver: login confirmed via {}", via);
                Ok(())
            }
            Err(_) => Err(DriverError::AuthFailure(format!(
                "neither the logged-in marker nor a url containing '{}' appeared within {}ms",
                fragment,
                limit.as_millis()
            ))),
        }
    }

    async fn check_collision(&self, page: &dyn PageSurface) -> Result<(), DriverError> {
        let markers = &self.selectors.collision_markers;
        if markers.is_empty() {
            return Ok(());
        }
        let text = page.page_text().await?;
        let matcher = AhoCorasick::new(markers)
            .map_err(|e| DriverError::Configuration(format!("collision markers: {}", e)))?;
        match matcher.find(&text) {
            Some(m) => Err(DriverError::AuthCollision(format!(
                "page reports '{}'",
                markers[m.pattern().as_usize()]
            ))),
            None => Ok(()),
        }
    }

    async fn select_venues(&self, page: &dyn PageSurface) -> Result<(), DriverError> {
        for category in self.site.resolve_categories() {
            let set = self.selectors.category_select_all(&category);
            match self.resolver.try_resolve(page, &set, self.settings.optional_timeout).await {
                Some(el) => match page.click(&el).await {
                    Ok(()) => info!("driver: selected all of category '{}'", category),
                    Err(e) => warn!("driver: could not select category '{}': {}", category, e),
                },
                None => warn!("driver: category '{}' not offered, searching without it", category),
            }
        }

        if let Some(next) = self
            .resolver
            .try_resolve(page, &self.selectors.proceed_to_search, self.settings.optional_timeout)
            .await
        {
            page.click(&next).await?;
        }

        self.resolver
            .resolve(page, &self.selectors.keyword_input, self.settings.navigation_timeout)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::timeout(StepName::VenueSelection.to_string(), e.to_string()))
    }

    async fn submit_keyword(
        &self,
        page: &dyn PageSurface,
        criteria: &SearchCriteria,
    ) -> Result<(), DriverError> {
        let step = StepName::KeywordSubmission.to_string();
        let input = self
            .resolver
            .resolve(page, &self.selectors.keyword_input, self.settings.element_timeout)
            .await
            .map_err(|e| DriverError::timeout(step.clone(), e.to_string()))?;

        let freeword = criteria.freeword();
        page.fill(&input, &freeword).await?;
        info!("driver: searching for '{}'", freeword);

        if let Some(yen) = criteria.budget_yen {
            self.apply_optional_filter(page, &self.selectors.budget_input, yen)
                .await;
        }
        if let Some(km) = criteria.mileage_km {
            self.apply_optional_filter(page, &self.selectors.mileage_input, km)
                .await;
        }

        match self
            .resolver
            .try_resolve(page, &self.selectors.search_submit, self.settings.optional_timeout)
            .await
        {
            Some(button) => page.click(&button).await?,
            None => page.submit(&input).await?,
        }

        self.wait_for_results(page, &step).await
    }

    async fn apply_optional_filter(&self, page: &dyn PageSurface, set: &SelectorCandidateSet, value: u64) {
        match self.resolver.try_resolve(page, set, self.settings.optional_timeout).await {
            Some(el) => {
                if let Err(e) = page.fill(&el, &value.to_string()).await {
                    warn!("driver: {} not applied: {}", set.field, e);
                }
            }
            None => warn!("driver: {} not available, skipping", set.field),
        }
    }

    async fn filter_results(&self, page: &dyn PageSurface) -> Result<(), DriverError> {
        let statuses = self.site.resolve_status_filters();
        if statuses.is_empty() {
            return Ok(());
        }

        let mut checked = 0usize;
        for status in &statuses {
            let set = self.selectors.status_checkbox(status);
            match self.resolver.try_resolve(page, &set, self.settings.optional_timeout).await {
                Some(el) => match page.check(&el).await {
                    Ok(()) => checked += 1,
                    Err(e) => warn!("driver: could not tick '{}': {}", status, e),
                },
                None => debug!("driver: status filter '{}' not present", status),
            }
        }
        if checked == 0 {
            return Err(DriverError::timeout(
                StepName::ResultFiltering.to_string(),
                "no status filter controls found",
            ));
        }

        if let Some(apply) = self
            .resolver
            .try_resolve(page, &self.selectors.filter_apply, self.settings.optional_timeout)
            .await
        {
            page.click(&apply).await?;
        }
        self.wait_for_results(page, &StepName::ResultFiltering.to_string())
            .await
    }

    async fn extract(&self, page: &dyn PageSurface) -> Result<Vec<ListingRecord>, DriverError> {
        let surface = self
            .resolver
            .resolve(page, &self.results_surface(), self.settings.element_timeout)
            .await
            .map_err(|e| DriverError::ExtractionUnavailable(e.to_string()))?;

        if self
            .selectors
            .no_results_marker
            .candidates
            .contains(&surface.locator)
        {
            info!("driver: site reports no matching listings");
            return Ok(Vec::new());
        }

        let html = page
            .outer_html(&surface)
            .await
            .map_err(|e| DriverError::ExtractionUnavailable(e.to_string()))?;
        let base = page
            .current_url()
            .await
            .ok()
            .filter(|u| u.starts_with("http"))
            .unwrap_or_else(|| self.site.resolve_base_url());

        let records = extract_listings(&html, &self.selectors, &base, self.settings.max_rows);
        Ok(rank_listings(records, self.settings.top_n))
    }

    /// Results container or an explicit "no results" notice, whichever shows first.
    fn results_surface(&self) -> SelectorCandidateSet {
        let mut candidates = self.selectors.results_container.candidates.clone();
        candidates.extend(self.selectors.no_results_marker.candidates.iter().cloned());
        SelectorCandidateSet::new("results surface", candidates)
    }

    async fn wait_for_results(&self, page: &dyn PageSurface, step: &str) -> Result<(), DriverError> {
        self.resolver
            .resolve(page, &self.results_surface(), self.settings.navigation_timeout)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::timeout(step, e.to_string()))
    }
}

#[async_trait]
impl ListingSearch for SiteDriver {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ListingRecord>, DriverError> {
        self.run(criteria).await
    }
}

/// Timings small enough for scripted pages.
#[cfg(test)]
pub(crate) fn fast_settings() -> DriverSettings {
    use std::time::Duration;
    DriverSettings {
        poll_interval: Duration::from_millis(2),
        element_timeout: Duration::from_millis(40),
        optional_timeout: Duration::from_millis(10),
        navigation_timeout: Duration::from_millis(60),
        run_timeout: Duration::from_secs(5),
        release_timeout: Duration::from_millis(50),
        max_rows: 50,
        top_n: 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::FailureKind;
    use crate::scraping::page::FrameRef;
    use crate::scraping::selectors::Locator;
    use crate::scraping::testing::{Effect, MockLauncher, MockPage, MockPageBuilder};

    const BASE: &str = "https://auction.example.jp/";
    const RESULTS: &str = r#"<table id="resultList"><tbody>
        <tr class="item"><td><span class="car-name">ヤリス A</span></td><td class="price">150万円</td></tr>
        <tr class="item"><td><span class="car-name">ヤリス B</span></td><td class="price">90万円</td></tr>
    </tbody></table>"#;

    fn first(set: &SelectorCandidateSet) -> Locator {
        set.candidates[0].clone()
    }

    fn css(set: &SelectorCandidateSet, i: usize) -> Locator {
        set.candidates[i].clone()
    }

    fn site() -> SiteConfig {
        SiteConfig {
            base_url: Some(BASE.into()),
            categories: Some(vec!["乗用車".into(), "輸入車".into()]),
            status_filters: Some(vec!["出品中".into()]),
            login_id: Some("dealer01".into()),
            password: Some("s3cret".into()),
            ..Default::default()
        }
    }

    /// A site that needs a login, offers one category, and returns two rows.
    fn happy_site() -> MockPageBuilder {
        let s = SiteSelectors::default();
        let results = first(&s.results_container);
        MockPage::new("about:blank")
            .with(FrameRef::Main, first(&s.login_username), "<input>")
            .with(FrameRef::Main, first(&s.login_password), "<input>")
            .with(FrameRef::Main, first(&s.login_submit), "<button>")
            .on_click(
                first(&s.login_submit),
                Effect::url("https://auction.example.jp/menu").adding(
                    FrameRef::Main,
                    first(&s.logged_in_marker),
                    "<a>",
                ),
            )
            .with(
                FrameRef::Main,
                css(&s.category_select_all("乗用車"), 1),
                "<button>",
            )
            .with(FrameRef::Main, first(&s.proceed_to_search), "<button>")
            .on_click(
                first(&s.proceed_to_search),
                Effect::default().adding(FrameRef::Main, first(&s.keyword_input), "<input>"),
            )
            .with(FrameRef::Main, first(&s.budget_input), "<select>")
            .with(FrameRef::Main, first(&s.search_submit), "<button>")
            .on_click(
                first(&s.search_submit),
                Effect::default().adding(FrameRef::Main, results.clone(), RESULTS),
            )
            .with(
                FrameRef::Main,
                first(&s.status_checkbox("出品中")),
                "<input type=checkbox>",
            )
            .with(FrameRef::Main, first(&s.filter_apply), "<button>")
    }

    fn driver_for(page: Arc<MockPage>) -> (SiteDriver, Arc<MockLauncher>) {
        let launcher = Arc::new(MockLauncher::new(page));
        let driver = SiteDriver::new(
            launcher.clone(),
            site(),
            SiteSelectors::default(),
            fast_settings(),
        );
        (driver, launcher)
    }

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            maker: Some("トヨタ".into()),
            model: Some("ヤリス".into()),
            budget_yen: Some(1_000_000),
            mileage_km: Some(50_000),
            ..Default::default()
        }
    }

    #[test]
    fn pipeline_order_and_policies() {
        let names: Vec<StepName> = PIPELINE.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                StepName::Authenticate,
                StepName::SessionCollisionCheck,
                StepName::VenueSelection,
                StepName::KeywordSubmission,
                StepName::ResultFiltering,
                StepName::Extraction,
            ]
        );
        let degrade: Vec<StepName> = PIPELINE
            .iter()
            .filter(|s| s.policy == FailurePolicy::Degrade)
            .map(|s| s.name)
            .collect();
        assert_eq!(degrade, vec![StepName::ResultFiltering]);
    }

    #[tokio::test]
    async fn full_run_logs_in_searches_and_ranks() {
        let page = happy_site().build();
        let (driver, launcher) = driver_for(page.clone());

        let records = driver.run(&criteria()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "ヤリス B");
        assert_eq!(records[0].price_sort_key, 900_000);
        assert_eq!(records[1].title, "ヤリス A");
        assert_eq!(page.release_count(), 1);
        assert_eq!(launcher.launches.load(std::sync::atomic::Ordering::SeqCst), 1);

        let actions = page.actions();
        let expected_in_order = [
            "goto:https://auction.example.jp/",
            "goto:https://auction.example.jp/login",
            "fill:login username field=dealer01",
            "fill:login password field=s3cret",
            "click:login submit button",
            "click:category select-all (乗用車)",
            "click:proceed to search button",
            "fill:freeword search input=トヨタ ヤリス",
            "fill:budget upper bound=1000000",
            "click:search submit button",
            "check:status filter (出品中)",
            "click:filter apply button",
        ];
        let mut pos = 0;
        for want in expected_in_order {
            let found = actions[pos..]
                .iter()
                .position(|a| a == want)
                .unwrap_or_else(|| panic!("missing or out of order: {want}\nactions: {actions:?}"));
            pos += found + 1;
        }
        assert!(
            !actions.iter().any(|a| a.starts_with("fill:mileage")),
            "absent mileage filter is skipped"
        );
    }

    #[tokio::test]
    async fn existing_session_skips_login_form() {
        let s = SiteSelectors::default();
        let page = happy_site()
            .with(FrameRef::Main, first(&s.logged_in_marker), "<a>")
            .build();
        let (driver, _) = driver_for(page.clone());
        driver.run(&criteria()).await.unwrap();
        assert!(!page.actions().iter().any(|a| a.contains("login")));
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_launch() {
        let page = happy_site().build();
        let launcher = Arc::new(MockLauncher::new(page.clone()));
        let driver = SiteDriver::new(
            launcher.clone(),
            SiteConfig {
                base_url: Some(BASE.into()),
                ..Default::default()
            },
            SiteSelectors::default(),
            fast_settings(),
        );
        if std::env::var(crate::core::config::ENV_LOGIN_ID).is_ok() {
            return;
        }
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert_eq!(launcher.launches.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(page.release_count(), 0);
    }

    #[tokio::test]
    async fn login_without_confirmation_is_auth_failure() {
        let s = SiteSelectors::default();
        let page = MockPage::new("about:blank")
            .with(FrameRef::Main, first(&s.login_username), "<input>")
            .with(FrameRef::Main, first(&s.login_password), "<input>")
            .with(FrameRef::Main, first(&s.login_submit), "<button>")
            .build();
        let (driver, _) = driver_for(page.clone());
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::AuthFailure);
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn missing_login_form_is_auth_failure() {
        let page = MockPage::new("about:blank").build();
        let (driver, _) = driver_for(page.clone());
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::AuthFailure);
        assert!(err.to_string().contains("login username field"));
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn collision_text_aborts_run() {
        let s = SiteSelectors::default();
        let page = happy_site()
            .on_click(
                first(&s.login_submit),
                Effect::url("https://auction.example.jp/menu")
                    .text("このIDは他の端末でログインされています。"),
            )
            .build();
        let (driver, _) = driver_for(page.clone());
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::AuthCollision);
        assert!(!page.actions().iter().any(|a| a.contains("freeword")));
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_search_form_is_fatal() {
        let s = SiteSelectors::default();
        let page = happy_site()
            .on_click(first(&s.proceed_to_search), Effect::default())
            .build();
        let (driver, _) = driver_for(page.clone());
        match driver.run(&criteria()).await.unwrap_err() {
            DriverError::NavigationTimeout { step, .. } => assert_eq!(step, "venue selection"),
            other => panic!("expected navigation timeout, got {other:?}"),
        }
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn no_results_notice_is_empty_success() {
        let s = SiteSelectors::default();
        let page = happy_site()
            .on_click(
                first(&s.search_submit),
                Effect::default().adding(FrameRef::Main, first(&s.no_results_marker), "<p>"),
            )
            .build();
        let (driver, _) = driver_for(page.clone());
        let records = driver.run(&criteria()).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn results_that_never_appear_time_out() {
        let s = SiteSelectors::default();
        let page = happy_site()
            .on_click(first(&s.search_submit), Effect::default())
            .build();
        let (driver, _) = driver_for(page.clone());
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NavigationTimeout);
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn missing_filter_ui_degrades_to_unfiltered_results() {
        let s = SiteSelectors::default();
        let page = happy_site()
            .on_click(
                first(&s.login_submit),
                Effect::url("https://auction.example.jp/menu").removing(
                    FrameRef::Main,
                    first(&s.status_checkbox("出品中")),
                ),
            )
            .build();
        let (driver, _) = driver_for(page.clone());
        let records = driver.run(&criteria()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(!page.actions().iter().any(|a| a.starts_with("check:")));
    }

    #[tokio::test]
    async fn vanished_container_is_extraction_unavailable() {
        let s = SiteSelectors::default();
        let page = happy_site()
            .on_click(
                first(&s.filter_apply),
                Effect::default().removing(FrameRef::Main, first(&s.results_container)),
            )
            .build();
        let (driver, _) = driver_for(page.clone());
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ExtractionUnavailable);
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn release_error_does_not_mask_outcome() {
        let page = happy_site().failing_release().build();
        let (driver, _) = driver_for(page.clone());
        let records = driver.run(&criteria()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_unknown_and_nothing_to_release() {
        let page = happy_site().build();
        let mut launcher = MockLauncher::new(page.clone());
        launcher.fail_launch = true;
        let driver = SiteDriver::new(
            Arc::new(launcher),
            site(),
            SiteSelectors::default(),
            fast_settings(),
        );
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unknown);
        assert_eq!(page.release_count(), 0);
    }
    #[tokio::test]
    async fn panicking_step_is_unknown_and_still_releases() {
        let s = SiteSelectors::default();
        let page = happy_site().panic_on_click(first(&s.login_submit)).build();
        let (driver, _) = driver_for(page.clone());
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unknown);
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn run_timeout_fails_hung_navigation_and_releases() {
        let page = happy_site().hanging_goto().build();
        let launcher = Arc::new(MockLauncher::new(page.clone()));
        let driver = SiteDriver::new(
            launcher,
            site(),
            SiteSelectors::default(),
            DriverSettings {
                run_timeout: std::time::Duration::from_millis(100),
                ..fast_settings()
            },
        );
        let err = driver.run(&criteria()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NavigationTimeout);
        assert!(matches!(err, DriverError::NavigationTimeout { ref step, .. } if step == "run"));
        assert_eq!(page.release_count(), 1);
    }

    #[tokio::test]
    async fn stuck_release_is_bounded_and_keeps_outcome() {
        let page = happy_site().hanging_release().build();
        let (driver, _) = driver_for(page.clone());
        let started = Instant::now();
        let records = driver.run(&criteria()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(page.release_count(), 1);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
