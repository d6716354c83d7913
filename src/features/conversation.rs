//! Slot-filling conversation engine.
//!
//! One [`ConversationSession`] per user walks a fixed [`SlotForm`] one field per
//! turn. When the last field is answered the session moves to `Dispatching` and
//! the engine hands back normalized [`SearchCriteria`]. The session is only
//! removed once the job coordinator reports the search finished, so messages
//! sent mid-search get the busy reply instead of opening a second session.

use crate::core::config::{ConversationConfig, FormKind};
use crate::features::job_coordinator::SessionCloser;
use crate::features::normalizer::{currency_to_yen, display_man, distance_to_km};
use crate::features::session_store::{KeyedStore, MemoryStore};
use crate::types::SearchCriteria;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const BUSY_REPLY: &str = "ただいま検索中です。結果が届くまでお待ちください。";
const REQUIRED_NOTICE: &str = "この項目は省略できません。";
const ACK_HEADER: &str = "以下の条件で検索します。結果が届くまで少々お待ちください。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotField {
    Maker,
    Model,
    Grade,
    BodyType,
    Budget,
    Mileage,
    Keyword,
}

impl SlotField {
    pub fn label(self) -> &'static str {
        match self {
            SlotField::Maker => "メーカー",
            SlotField::Model => "車種",
            SlotField::Grade => "グレード",
            SlotField::BodyType => "ボディタイプ",
            SlotField::Budget => "予算上限",
            SlotField::Mileage => "走行距離上限",
            SlotField::Keyword => "キーワード",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub field: SlotField,
    pub question: &'static str,
    pub skippable: bool,
}

/// Ordered list of fields a session collects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotForm {
    slots: Vec<SlotSpec>,
}

impl SlotForm {
    /// maker, model, budget, mileage.
    pub fn basic() -> Self {
        Self {
            slots: vec![
                SlotSpec {
                    field: SlotField::Maker,
                    question: "メーカーを入力してください。（例：トヨタ）",
                    skippable: false,
                },
                SlotSpec {
                    field: SlotField::Model,
                    question: "車種を入力してください。（例：ヤリス）",
                    skippable: true,
                },
                SlotSpec {
                    field: SlotField::Budget,
                    question: "予算の上限を入力してください。（例：100万）",
                    skippable: true,
                },
                SlotSpec {
                    field: SlotField::Mileage,
                    question: "走行距離の上限を入力してください。（例：5万km）",
                    skippable: true,
                },
            ],
        }
    }

    /// The basic form plus grade, body type and a free keyword.
    pub fn extended() -> Self {
        let mut slots = Self::basic().slots;
        slots.insert(
            2,
            SlotSpec {
                field: SlotField::Grade,
                question: "グレードを入力してください。（例：ハイブリッドZ）",
                skippable: true,
            },
        );
        slots.insert(
            3,
            SlotSpec {
                field: SlotField::BodyType,
                question: "ボディタイプを入力してください。（例：ミニバン）",
                skippable: true,
            },
        );
        slots.push(SlotSpec {
            field: SlotField::Keyword,
            question: "その他のキーワードがあれば入力してください。（例：禁煙車）",
            skippable: true,
        });
        Self { slots }
    }

    pub fn from_kind(kind: FormKind) -> Self {
        match kind {
            FormKind::Basic => Self::basic(),
            FormKind::Extended => Self::extended(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&SlotSpec> {
        self.slots.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Collecting,
    Dispatching,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    pub user_id: String,
    pub step_index: usize,
    /// Raw text per answered field; an empty string records a skip.
    pub collected: BTreeMap<SlotField, String>,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

impl ConversationSession {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            step_index: 0,
            collected: BTreeMap::new(),
            state: ConversationState::Collecting,
            created_at: Utc::now(),
        }
    }

    /// Normalized snapshot of what was collected.
    pub fn criteria(&self) -> SearchCriteria {
        let text = |field: SlotField| {
            self.collected
                .get(&field)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let raw = |field: SlotField| self.collected.get(&field).map(String::as_str).unwrap_or("");
        SearchCriteria {
            maker: text(SlotField::Maker),
            model: text(SlotField::Model),
            grade: text(SlotField::Grade),
            body_type: text(SlotField::BodyType),
            budget_yen: currency_to_yen(raw(SlotField::Budget)),
            mileage_km: distance_to_km(raw(SlotField::Mileage)),
            keyword: text(SlotField::Keyword),
        }
    }
}

/// Result of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub reply: String,
    /// Present exactly once per session: on the turn that completes the form.
    pub dispatch: Option<SearchCriteria>,
}

impl Turn {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            dispatch: None,
        }
    }
}

pub struct ConversationEngine {
    form: SlotForm,
    reset_keyword: String,
    skip_keywords: Vec<String>,
    sessions: Arc<dyn KeyedStore<ConversationSession>>,
    // Serializes read-modify-write of sessions across concurrent webhook calls.
    gate: Mutex<()>,
}

impl ConversationEngine {
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::with_store(
            SlotForm::from_kind(config.resolve_form()),
            config.resolve_reset_keyword(),
            config.resolve_skip_keywords(),
            Arc::new(MemoryStore::with_idle_ttl(config.resolve_session_ttl())),
        )
    }

    pub fn with_store(
        form: SlotForm,
        reset_keyword: String,
        skip_keywords: Vec<String>,
        sessions: Arc<dyn KeyedStore<ConversationSession>>,
    ) -> Self {
        Self {
            form,
            reset_keyword,
            skip_keywords,
            sessions,
            gate: Mutex::new(()),
        }
    }

    /// Defaults: basic form, `リセット`, `スキップ` / `なし`, no eviction.
    pub fn basic() -> Self {
        let defaults = ConversationConfig::default();
        Self::with_store(
            SlotForm::basic(),
            defaults.resolve_reset_keyword(),
            defaults.resolve_skip_keywords(),
            Arc::new(MemoryStore::new()),
        )
    }

    pub fn form(&self) -> &SlotForm {
        &self.form
    }

    /// Question text for step `index`, with a skip hint on optional fields.
    pub fn question(&self, index: usize) -> String {
        let Some(slot) = self.form.slot(index) else {
            return String::new();
        };
        match (slot.skippable, self.skip_keywords.first()) {
            (true, Some(skip)) => format!(
                "{}\n※指定しない場合は「{}」と送信してください。",
                slot.question, skip
            ),
            _ => slot.question.to_string(),
        }
    }

    fn is_skip(&self, text: &str) -> bool {
        self.skip_keywords.iter().any(|k| k == text)
    }

    pub async fn on_message(&self, user_id: &str, text: &str) -> Turn {
        let _gate = self.gate.lock().await;
        let text = text.trim();
        let existing = self.sessions.get(user_id).await;

        if matches!(&existing, Some(s) if s.state == ConversationState::Dispatching) {
            debug!("conversation: {} is busy, dropping message", user_id);
            return Turn::reply(BUSY_REPLY);
        }

        if text == self.reset_keyword {
            info!("conversation: reset by {}", user_id);
            self.sessions
                .set(user_id, ConversationSession::new(user_id))
                .await;
            return Turn::reply(self.question(0));
        }

        let Some(mut session) = existing else {
            info!("conversation: new session for {}", user_id);
            self.sessions
                .set(user_id, ConversationSession::new(user_id))
                .await;
            return Turn::reply(self.question(0));
        };

        let Some(slot) = self.form.slot(session.step_index).cloned() else {
            // Form shrank under a live session; start over.
            self.sessions
                .set(user_id, ConversationSession::new(user_id))
                .await;
            return Turn::reply(self.question(0));
        };

        let skipped = self.is_skip(text);
        if text.is_empty() || (skipped && !slot.skippable) {
            return Turn::reply(format!(
                "{}\n{}",
                REQUIRED_NOTICE,
                self.question(session.step_index)
            ));
        }

        let value = if skipped { String::new() } else { text.to_string() };
        session.collected.insert(slot.field, value);
        session.step_index += 1;

        if session.step_index < self.form.len() {
            let reply = self.question(session.step_index);
            self.sessions.set(user_id, session).await;
            return Turn::reply(reply);
        }

        session.state = ConversationState::Dispatching;
        let criteria = session.criteria();
        info!(
            "conversation: {} completed form, dispatching '{}'",
            user_id,
            criteria.freeword()
        );
        self.sessions.set(user_id, session).await;
        Turn {
            reply: acknowledgment(&criteria),
            dispatch: Some(criteria),
        }
    }

    pub async fn state_of(&self, user_id: &str) -> ConversationState {
        self.sessions
            .get(user_id)
            .await
            .map(|s| s.state)
            .unwrap_or(ConversationState::Idle)
    }

    pub async fn session(&self, user_id: &str) -> Option<ConversationSession> {
        self.sessions.get(user_id).await
    }

    /// Drop the user's session; the next message starts a fresh one.
    pub async fn finish(&self, user_id: &str) {
        let _gate = self.gate.lock().await;
        if self.sessions.delete(user_id).await.is_some() {
            debug!("conversation: session for {} cleared", user_id);
        }
    }
}

#[async_trait]
impl SessionCloser for ConversationEngine {
    async fn close_session(&self, user_id: &str) {
        self.finish(user_id).await;
    }
}

fn acknowledgment(criteria: &SearchCriteria) -> String {
    let mut lines = vec![ACK_HEADER.to_string()];
    let mut push = |label: &str, value: Option<String>| {
        lines.push(format!(
            "・{}：{}",
            label,
            value.unwrap_or_else(|| "指定なし".to_string())
        ));
    };
    push(SlotField::Maker.label(), criteria.maker.clone());
    push(SlotField::Model.label(), criteria.model.clone());
    if criteria.grade.is_some() {
        push(SlotField::Grade.label(), criteria.grade.clone());
    }
    if criteria.body_type.is_some() {
        push(SlotField::BodyType.label(), criteria.body_type.clone());
    }
    push(
        SlotField::Budget.label(),
        criteria.budget_yen.map(|v| format!("{}円", display_man(v))),
    );
    push(
        SlotField::Mileage.label(),
        criteria.mileage_km.map(|v| format!("{}km", display_man(v))),
    );
    if criteria.keyword.is_some() {
        push(SlotField::Keyword.label(), criteria.keyword.clone());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn answer_all(engine: &ConversationEngine, user: &str, answers: &[&str]) -> Turn {
        let mut last = engine.on_message(user, "こんにちは").await;
        for a in answers {
            last = engine.on_message(user, a).await;
        }
        last
    }

    #[tokio::test]
    async fn first_message_opens_session_with_first_question() {
        let engine = ConversationEngine::basic();
        let turn = engine.on_message("u1", "車を探したい").await;
        assert_eq!(turn.reply, engine.question(0));
        assert!(turn.dispatch.is_none());
        let s = engine.session("u1").await.unwrap();
        assert_eq!(s.step_index, 0);
        assert_eq!(s.state, ConversationState::Collecting);
    }

    #[tokio::test]
    async fn step_index_advances_one_field_per_turn() {
        let engine = ConversationEngine::basic();
        engine.on_message("u1", "hi").await;
        let t = engine.on_message("u1", "トヨタ").await;
        assert_eq!(t.reply, engine.question(1));
        assert_eq!(engine.session("u1").await.unwrap().step_index, 1);
        engine.on_message("u1", "ヤリス").await;
        assert_eq!(engine.session("u1").await.unwrap().step_index, 2);
    }

    #[tokio::test]
    async fn completing_form_dispatches_normalized_criteria() {
        let engine = ConversationEngine::basic();
        let turn = answer_all(&engine, "u1", &["トヨタ", "ヤリス", "100万", "5万km"]).await;
        let criteria = turn.dispatch.expect("dispatch on last field");
        assert_eq!(criteria.maker.as_deref(), Some("トヨタ"));
        assert_eq!(criteria.model.as_deref(), Some("ヤリス"));
        assert_eq!(criteria.budget_yen, Some(1_000_000));
        assert_eq!(criteria.mileage_km, Some(50_000));
        assert!(turn.reply.starts_with(ACK_HEADER));
        assert!(turn.reply.contains("100万円"));
        assert_eq!(engine.state_of("u1").await, ConversationState::Dispatching);
    }

    #[tokio::test]
    async fn skip_keyword_records_no_constraint() {
        let engine = ConversationEngine::basic();
        let turn = answer_all(&engine, "u1", &["ホンダ", "スキップ", "なし", "スキップ"]).await;
        let criteria = turn.dispatch.unwrap();
        assert_eq!(criteria.maker.as_deref(), Some("ホンダ"));
        assert_eq!(criteria.model, None);
        assert_eq!(criteria.budget_yen, None);
        assert_eq!(criteria.mileage_km, None);
        assert!(turn.reply.contains("指定なし"));
    }

    #[tokio::test]
    async fn required_field_rejects_skip_and_blank() {
        let engine = ConversationEngine::basic();
        engine.on_message("u1", "hi").await;
        let t = engine.on_message("u1", "スキップ").await;
        assert!(t.reply.starts_with(REQUIRED_NOTICE));
        assert!(t.reply.ends_with(&engine.question(0)));
        let t = engine.on_message("u1", "   ").await;
        assert!(t.reply.starts_with(REQUIRED_NOTICE));
        assert_eq!(engine.session("u1").await.unwrap().step_index, 0);
    }

    #[tokio::test]
    async fn reset_discards_collected_values() {
        let engine = ConversationEngine::basic();
        answer_all(&engine, "u1", &["トヨタ", "ヤリス"]).await;
        let t = engine.on_message("u1", "リセット").await;
        assert_eq!(t.reply, engine.question(0));
        let s = engine.session("u1").await.unwrap();
        assert_eq!(s.step_index, 0);
        assert!(s.collected.is_empty());
        assert_eq!(s.state, ConversationState::Collecting);
    }

    #[tokio::test]
    async fn messages_while_dispatching_get_busy_reply() {
        let engine = ConversationEngine::basic();
        answer_all(&engine, "u1", &["トヨタ", "ヤリス", "100万", "5万km"]).await;
        for text in ["まだ？", "リセット"] {
            let t = engine.on_message("u1", text).await;
            assert_eq!(t.reply, BUSY_REPLY);
            assert!(t.dispatch.is_none());
        }
        assert_eq!(engine.state_of("u1").await, ConversationState::Dispatching);

        engine.close_session("u1").await;
        assert_eq!(engine.state_of("u1").await, ConversationState::Idle);
        let t = engine.on_message("u1", "もう一度").await;
        assert_eq!(t.reply, engine.question(0));
    }

    #[tokio::test]
    async fn sessions_are_per_user() {
        let engine = ConversationEngine::basic();
        answer_all(&engine, "u1", &["トヨタ"]).await;
        engine.on_message("u2", "hi").await;
        assert_eq!(engine.session("u1").await.unwrap().step_index, 1);
        assert_eq!(engine.session("u2").await.unwrap().step_index, 0);
    }

    #[tokio::test]
    async fn extended_form_collects_grade_type_and_keyword() {
        let engine = ConversationEngine::with_store(
            SlotForm::extended(),
            "リセット".into(),
            vec!["スキップ".into()],
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(engine.form().len(), 7);
        let turn = answer_all(
            &engine,
            "u1",
            &["トヨタ", "アルファード", "Sグレード", "ミニバン", "500万", "3千km", "禁煙"],
        )
        .await;
        let c = turn.dispatch.unwrap();
        assert_eq!(c.grade.as_deref(), Some("Sグレード"));
        assert_eq!(c.body_type.as_deref(), Some("ミニバン"));
        assert_eq!(c.keyword.as_deref(), Some("禁煙"));
        assert_eq!(c.mileage_km, Some(3_000));
        assert_eq!(c.freeword(), "トヨタ アルファード Sグレード ミニバン 禁煙");
    }

    #[test]
    fn skippable_questions_carry_hint() {
        let engine = ConversationEngine::basic();
        assert!(!engine.question(0).contains("スキップ"));
        assert!(engine.question(1).contains("「スキップ」"));
    }
}
