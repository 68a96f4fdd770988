//! Per-conversation intake state.
//!
//! One conversation is always in exactly one phase; every transition
//! happens under that conversation's async lock, so two events for the
//! same chat can never interleave mid-step. Different conversations
//! share nothing and proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::channels::AttachmentRef;
use crate::registry::Ticket;

/// Intake phase of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No intake in progress.
    #[default]
    Idle,
    /// Waiting for the requester's contact email (or "pular").
    AwaitingContactEmail,
    /// Category menu shown, waiting for a pick.
    AwaitingCategorySelection,
    /// High-confidence suggestion shown, waiting for yes/no.
    AwaitingCategoryConfirmation,
    /// Category fixed, waiting for the problem description.
    AwaitingDescription,
    /// Review summary shown, waiting for confirm / add / replace.
    AwaitingReview,
    /// "Add detail" picked at review, waiting for the extra text.
    AwaitingAdditionalInfo,
    /// "Replace" picked at review, waiting for the new description.
    AwaitingRevisedDescription,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::AwaitingContactEmail => "awaiting_contact_email",
            Phase::AwaitingCategorySelection => "awaiting_category_selection",
            Phase::AwaitingCategoryConfirmation => "awaiting_category_confirmation",
            Phase::AwaitingDescription => "awaiting_description",
            Phase::AwaitingReview => "awaiting_review",
            Phase::AwaitingAdditionalInfo => "awaiting_additional_info",
            Phase::AwaitingRevisedDescription => "awaiting_revised_description",
        };
        f.write_str(s)
    }
}

/// Ticket built at review time but not yet fully confirmed.
///
/// The flags record which side effects already happened, so a retry
/// after a collaborator failure never registers the same ticket or
/// appends the same ledger row twice.
#[derive(Debug, Clone)]
pub struct PendingTicket {
    pub ticket: Ticket,
    pub registered: bool,
    pub ledger_recorded: bool,
}

/// Everything accumulated for one conversation's intake.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub phase: Phase,
    /// Category fixed by explicit pick or confirmed suggestion.
    pub selected_category: Option<String>,
    /// High-confidence classifier suggestion awaiting confirmation.
    pub suggested_category: Option<String>,
    pub draft_description: Option<String>,
    /// Files received at any phase; snapshotted into the ticket on confirm.
    pub staged_attachments: Vec<AttachmentRef>,
    pub pending_ticket: Option<PendingTicket>,
}

impl ConversationState {
    /// Drop everything back to idle. Used after finalize and on cancel.
    pub fn reset(&mut self) {
        *self = ConversationState::default();
    }
}

/// Keyed store of conversation states.
///
/// The outer mutex only guards the map; each conversation carries its
/// own `tokio::sync::Mutex` that handlers hold across awaits.
#[derive(Default)]
pub struct ConversationStore {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<ConversationState>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the state cell for a conversation.
    pub fn entry(&self, conversation_id: i64) -> Arc<tokio::sync::Mutex<ConversationState>> {
        let mut map = self.inner.lock().unwrap();
        Arc::clone(
            map.entry(conversation_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ConversationState::default()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle() {
        let state = ConversationState::default();
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.staged_attachments.is_empty());
        assert!(state.pending_ticket.is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = ConversationState {
            phase: Phase::AwaitingReview,
            selected_category: Some("garantia".into()),
            draft_description: Some("defeito".into()),
            ..Default::default()
        };
        state.reset();
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.selected_category.is_none());
        assert!(state.draft_description.is_none());
    }

    #[tokio::test]
    async fn store_returns_same_cell_per_conversation() {
        let store = ConversationStore::new();
        let a = store.entry(10);
        let b = store.entry(10);
        let c = store.entry(11);

        a.lock().await.phase = Phase::AwaitingDescription;
        assert_eq!(b.lock().await.phase, Phase::AwaitingDescription);
        assert_eq!(c.lock().await.phase, Phase::Idle);
    }

    #[test]
    fn phase_serde_round_trip() {
        let json = serde_json::to_string(&Phase::AwaitingCategoryConfirmation).unwrap();
        assert_eq!(json, "\"awaiting_category_confirmation\"");
        let back: Phase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Phase::AwaitingCategoryConfirmation);
    }
}
