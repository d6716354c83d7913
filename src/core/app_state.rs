use crate::core::config::ScoutConfig;
use crate::features::conversation::ConversationEngine;
use crate::features::delivery::{reply_channel_from_config, PushDelivery, ReplyChannel};
use crate::features::job_coordinator::JobCoordinator;
use crate::scraping::driver::SiteDriver;
use std::sync::Arc;
use std::time::Duration;

/// Extra time the coordinator grants beyond the driver's own run and release
/// timeouts before it abandons the run.
const HARD_TIMEOUT_GRACE: Duration = Duration::from_secs(30);
const SEEN_EVENT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ScoutConfig>,
    pub conversation: Arc<ConversationEngine>,
    pub coordinator: JobCoordinator,
    pub replies: Arc<dyn ReplyChannel>,
    /// Webhook event ids already handled (platform redelivery guard).
    pub seen_events: moka::future::Cache<String, ()>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("base_url", &self.config.site.resolve_base_url())
            .field("seen_events", &self.seen_events.entry_count())
            .finish()
    }
}

impl AppState {
    pub fn new(config: ScoutConfig, http_client: reqwest::Client) -> Self {
        let conversation = Arc::new(ConversationEngine::from_config(&config.conversation));
        let replies = reply_channel_from_config(&config.line, http_client);
        let driver = Arc::new(SiteDriver::from_config(&config));
        let settings = driver.settings();
        let hard_timeout = settings.run_timeout + settings.release_timeout + HARD_TIMEOUT_GRACE;
        let coordinator = JobCoordinator::new(
            driver,
            Arc::new(PushDelivery::new(replies.clone())),
            conversation.clone(),
            hard_timeout,
        );
        Self::with_parts(config, conversation, coordinator, replies)
    }

    /// Assemble from pre-built parts (alternate search backends, test doubles).
    pub fn with_parts(
        config: ScoutConfig,
        conversation: Arc<ConversationEngine>,
        coordinator: JobCoordinator,
        replies: Arc<dyn ReplyChannel>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            conversation,
            coordinator,
            replies,
            seen_events: moka::future::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(SEEN_EVENT_TTL)
                .build(),
        }
    }
}
