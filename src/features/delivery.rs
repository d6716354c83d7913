//! Outbound messages: the immediate acknowledgment and the later job result.
//!
//! Replies go out once on the platform's single-use reply token. Pushes are
//! retried with exponential backoff on network errors, 429 and 5xx.

use crate::core::config::LineConfig;
use crate::features::job_coordinator::{AutomationJob, JobListener, JobOutcome};
use crate::types::ListingRecord;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const REPLY_PATH: &str = "/v2/bot/message/reply";
const PUSH_PATH: &str = "/v2/bot/message/push";
/// Platform limit for one text message.
const MAX_TEXT_CHARS: usize = 5000;

const NO_RESULTS_TEXT: &str =
    "条件に一致する車両が見つかりませんでした。条件を変えてもう一度お試しください。";
const RESTART_HINT: &str = "新しく検索するには、何かメッセージを送ってください。";

#[async_trait]
pub trait ReplyChannel: Send + Sync {
    /// Answer an inbound message using its reply handle.
    async fn reply(&self, reply_handle: &str, text: &str) -> Result<()>;

    /// Deliver a job's terminal outcome to the user.
    async fn push(&self, user_id: &str, outcome: &JobOutcome) -> Result<()>;
}

fn listing_line(rank: usize, r: &ListingRecord) -> String {
    let mut head = format!("{}. {}", rank, r.title);
    if let Some(g) = &r.grade {
        head.push(' ');
        head.push_str(g);
    }
    let details: Vec<&str> = [
        Some(r.price_text.as_str()),
        r.year.as_deref(),
        Some(r.mileage_text.as_str()),
        r.district.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|s| !s.is_empty())
    .collect();

    let mut out = head;
    if !details.is_empty() {
        out.push_str("\n   ");
        out.push_str(&details.join(" / "));
    }
    if let Some(url) = &r.detail_url {
        out.push_str("\n   ");
        out.push_str(url);
    }
    out
}

/// Plain-text rendering of a job outcome.
pub fn format_outcome(outcome: &JobOutcome) -> String {
    let body = match outcome {
        JobOutcome::Listings(records) => {
            let mut lines = vec![format!(
                "検索結果 {}件（価格の安い順）",
                records.len()
            )];
            lines.extend(
                records
                    .iter()
                    .enumerate()
                    .map(|(i, r)| listing_line(i + 1, r)),
            );
            lines.join("\n")
        }
        JobOutcome::NoResults => NO_RESULTS_TEXT.to_string(),
        JobOutcome::Failed(kind) => kind.user_message().to_string(),
    };
    let text = format!("{}\n\n{}", body, RESTART_HINT);
    if text.chars().count() > MAX_TEXT_CHARS {
        text.chars().take(MAX_TEXT_CHARS - 1).chain(['…']).collect()
    } else {
        text
    }
}

fn text_messages(text: &str) -> Value {
    json!([{ "type": "text", "text": text }])
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Messaging API client (bearer-token auth).
pub struct LineMessagingClient {
    http: reqwest::Client,
    api_base: String,
    token: SecretString,
}

impl LineMessagingClient {
    pub fn new(http: reqwest::Client, api_base: String, token: SecretString) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(), backoff::Error<anyhow::Error>> {
        let resp = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow!("request to {} failed: {}", path, e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = resp.text().await.unwrap_or_default();
        let err = anyhow!("{} returned {}: {}", path, status, detail);
        if is_retryable(status) {
            Err(backoff::Error::transient(err))
        } else {
            Err(backoff::Error::permanent(err))
        }
    }
}

#[async_trait]
impl ReplyChannel for LineMessagingClient {
    async fn reply(&self, reply_handle: &str, text: &str) -> Result<()> {
        let body = json!({
            "replyToken": reply_handle,
            "messages": text_messages(text),
        });
        self.post(REPLY_PATH, &body).await.map_err(|e| match e {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }

    async fn push(&self, user_id: &str, outcome: &JobOutcome) -> Result<()> {
        let body = json!({
            "to": user_id,
            "messages": text_messages(&format_outcome(outcome)),
        });
        retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(500))
                .with_max_interval(Duration::from_secs(5))
                .with_max_elapsed_time(Some(Duration::from_secs(30)))
                .build(),
            || async { self.post(PUSH_PATH, &body).await },
        )
        .await
    }
}

/// Used when no channel token is configured: messages only go to the log.
#[derive(Debug, Default, Clone)]
pub struct LogReplyChannel;

#[async_trait]
impl ReplyChannel for LogReplyChannel {
    async fn reply(&self, reply_handle: &str, text: &str) -> Result<()> {
        info!("reply [{}]: {}", reply_handle, text);
        Ok(())
    }

    async fn push(&self, user_id: &str, outcome: &JobOutcome) -> Result<()> {
        info!("push [{}]: {}", user_id, format_outcome(outcome));
        Ok(())
    }
}

pub fn reply_channel_from_config(config: &LineConfig, http: reqwest::Client) -> Arc<dyn ReplyChannel> {
    match config.resolve_token() {
        Some(token) => Arc::new(LineMessagingClient::new(http, config.resolve_api_base(), token)),
        None => {
            warn!("no LINE channel token configured; replies will only be logged");
            Arc::new(LogReplyChannel)
        }
    }
}

/// Pushes every finished job's outcome to its user.
pub struct PushDelivery {
    channel: Arc<dyn ReplyChannel>,
}

impl PushDelivery {
    pub fn new(channel: Arc<dyn ReplyChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl JobListener for PushDelivery {
    async fn on_complete(&self, job: &AutomationJob, outcome: &JobOutcome) {
        match self.channel.push(&job.user_id, outcome).await {
            Ok(()) => info!("job {}: outcome delivered to {}", job.id, job.user_id),
            Err(e) => error!("job {}: could not deliver outcome: {:#}", job.id, e),
        }
    }
}
