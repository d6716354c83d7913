#![allow(dead_code)]

use async_trait::async_trait;
use auction_scout::config::ScoutConfig;
use auction_scout::conversation::{ConversationEngine, ConversationState};
use auction_scout::delivery::{format_outcome, PushDelivery, ReplyChannel};
use auction_scout::errors::DriverError;
use auction_scout::job_coordinator::{JobCoordinator, JobOutcome, ListingSearch};
use auction_scout::{AppState, InboundMessage, ListingRecord, SearchCriteria};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Search backend with a canned answer and an optional delay.
pub struct StubSearch {
    pub result: Result<Vec<ListingRecord>, DriverError>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<SearchCriteria>>,
}

impl StubSearch {
    pub fn returning(result: Result<Vec<ListingRecord>, DriverError>) -> Arc<Self> {
        Self::slow(result, Duration::ZERO)
    }

    pub fn slow(result: Result<Vec<ListingRecord>, DriverError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result,
            delay,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSearch for StubSearch {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ListingRecord>, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(criteria.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// Reply channel that records everything sent, in order.
#[derive(Default)]
pub struct RecordingChannel {
    pub log: Mutex<Vec<Sent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Reply { handle: String, text: String },
    Push { user_id: String, outcome: JobOutcome, text: String },
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    pub fn pushes_to(&self, user_id: &str) -> Vec<JobOutcome> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Push {
                    user_id: u,
                    outcome,
                    ..
                } if u == user_id => Some(outcome),
                _ => None,
            })
            .collect()
    }

    pub fn replies(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Reply { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ReplyChannel for RecordingChannel {
    async fn reply(&self, reply_handle: &str, text: &str) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(Sent::Reply {
            handle: reply_handle.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn push(&self, user_id: &str, outcome: &JobOutcome) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(Sent::Push {
            user_id: user_id.to_string(),
            outcome: outcome.clone(),
            text: format_outcome(outcome),
        });
        Ok(())
    }
}

pub fn app_with(search: Arc<StubSearch>) -> (AppState, Arc<RecordingChannel>) {
    let conversation = Arc::new(ConversationEngine::basic());
    let channel = Arc::new(RecordingChannel::default());
    let coordinator = JobCoordinator::new(
        search,
        Arc::new(PushDelivery::new(channel.clone())),
        conversation.clone(),
        Duration::from_secs(5),
    );
    let state = AppState::with_parts(ScoutConfig::default(), conversation, coordinator, channel.clone());
    (state, channel)
}

pub fn msg(user: &str, text: &str, event: &str) -> InboundMessage {
    InboundMessage {
        user_id: user.to_string(),
        text: text.to_string(),
        reply_handle: Some(format!("rt-{}", event)),
        event_id: Some(event.to_string()),
        redelivery: false,
    }
}

pub fn listing(title: &str, price_yen: u64) -> ListingRecord {
    ListingRecord {
        title: title.to_string(),
        grade: None,
        district: None,
        year: None,
        mileage_text: String::new(),
        price_text: format!("{}円", price_yen),
        price_sort_key: price_yen,
        image_url: None,
        detail_url: None,
    }
}

/// Wait until the user's job has fully wound down (no job, no session).
pub async fn wait_idle(state: &AppState, user: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let idle = !state.coordinator.is_running(user).await
            && state.conversation.state_of(user).await == ConversationState::Idle;
        if idle {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job for {} never finished",
            user
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
