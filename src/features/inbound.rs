//! Routes inbound chat messages through the conversation engine and, on a
//! completed form, hands the criteria to the job coordinator.

use crate::conversation::BUSY_REPLY;
use crate::core::AppState;
use crate::features::job_coordinator::SubmitOutcome;
use crate::types::{InboundMessage, WebhookEnvelope};
use tracing::{debug, info, warn};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    /// Same platform event seen before; nothing sent.
    Duplicate,
    Replied,
    /// Acknowledged and a search job started.
    Dispatched,
}

pub async fn handle_inbound(state: &AppState, msg: InboundMessage) -> InboundDisposition {
    if let Some(event_id) = &msg.event_id {
        let first_sighting = state
            .seen_events
            .entry(event_id.clone())
            .or_insert(())
            .await
            .is_fresh();
        if !first_sighting {
            info!(
                "inbound: event {} already handled (platform redelivery flag: {}), skipping",
                event_id, msg.redelivery
            );
            return InboundDisposition::Duplicate;
        }
        if msg.redelivery {
            // Retried by the platform but unseen here, e.g. sent before a restart.
            debug!("inbound: event {} is a platform redelivery seen for the first time", event_id);
        }
    }

    if state.coordinator.is_running(&msg.user_id).await {
        send_reply(state, &msg, BUSY_REPLY).await;
        return InboundDisposition::Replied;
    }

    let turn = state.conversation.on_message(&msg.user_id, &msg.text).await;
    // The acknowledgment must be out before the job can push its result.
    send_reply(state, &msg, &turn.reply).await;

    let Some(criteria) = turn.dispatch else {
        return InboundDisposition::Replied;
    };
    match state.coordinator.submit(&msg.user_id, criteria).await {
        SubmitOutcome::Started(ticket) => {
            debug!("inbound: job {} dispatched for {}", ticket.id, msg.user_id);
            InboundDisposition::Dispatched
        }
        SubmitOutcome::AlreadyRunning => {
            warn!(
                "inbound: {} completed a form while a job was still running; discarding the new session",
                msg.user_id
            );
            state.conversation.finish(&msg.user_id).await;
            InboundDisposition::Replied
        }
    }
}

async fn send_reply(state: &AppState, msg: &InboundMessage, text: &str) {
    let Some(handle) = &msg.reply_handle else {
        debug!("inbound: no reply handle for {}, reply dropped", msg.user_id);
        return;
    };
    if let Err(e) = state.replies.reply(handle, text).await {
        warn!("inbound: reply to {} failed: {:#}", msg.user_id, e);
    }
}

/// Handle every text message in a webhook envelope, in order.
pub async fn handle_envelope(state: &AppState, envelope: WebhookEnvelope) -> Vec<InboundDisposition> {
    let mut handled = Vec::new();
    for event in &envelope.events {
        match event.as_text_message() {
            Some(msg) => handled.push(handle_inbound(state, msg).await),
            None => debug!("inbound: ignoring '{}' event", event.event_type),
        }
    }
    handled
}
