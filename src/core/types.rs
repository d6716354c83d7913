use serde::{Deserialize, Serialize};

/// Immutable, normalized snapshot of a completed conversation.
///
/// Text fields are `None` when the user skipped them. `budget_yen` and
/// `mileage_km` are always canonical integers, never the raw localized text.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    #[serde(default)]
    pub maker: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    /// Body type (sedan, minivan, ...).
    #[serde(default, rename = "type")]
    pub body_type: Option<String>,
    #[serde(default)]
    pub budget_yen: Option<u64>,
    #[serde(default)]
    pub mileage_km: Option<u64>,
    #[serde(default)]
    pub keyword: Option<String>,
}

impl SearchCriteria {
    /// Non-empty free-text fields joined with a single space, in the order the
    /// remote freeword search expects them.
    pub fn freeword(&self) -> String {
        [
            &self.maker,
            &self.model,
            &self.grade,
            &self.body_type,
            &self.keyword,
        ]
        .iter()
        .filter_map(|f| f.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// One extracted search-result row, handed once to the delivery layer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub title: String,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    pub mileage_text: String,
    pub price_text: String,
    /// Ordering key derived from `price_text`; `PRICE_SORT_SENTINEL` when unparseable.
    pub price_sort_key: u64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub detail_url: Option<String>,
}

/// Sort key assigned to listings whose price could not be parsed, so they sort last.
pub const PRICE_SORT_SENTINEL: u64 = u64::MAX;

// ───────────────────────────────────────────────────────────────────────────
// Inbound webhook envelope (messaging platform)
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
    #[serde(default)]
    pub delivery_context: Option<DeliveryContext>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryContext {
    #[serde(default)]
    pub is_redelivery: bool,
}

/// A text message extracted from the webhook envelope, ready for the conversation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: String,
    pub text: String,
    pub reply_handle: Option<String>,
    pub event_id: Option<String>,
    /// The platform flagged this event as a retry of an earlier delivery.
    pub redelivery: bool,
}

impl WebhookEvent {
    /// Returns the inbound text message carried by this event, if it is one.
    pub fn as_text_message(&self) -> Option<InboundMessage> {
        if self.event_type != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.message_type != "text" {
            return None;
        }
        let user_id = self.source.as_ref()?.user_id.clone()?;
        Some(InboundMessage {
            user_id,
            text: message.text.clone().unwrap_or_default(),
            reply_handle: self.reply_token.clone(),
            event_id: self.webhook_event_id.clone(),
            redelivery: self
                .delivery_context
                .as_ref()
                .is_some_and(|d| d.is_redelivery),
        })
    }
}
