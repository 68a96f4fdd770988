//! Ticket registry — maps protocol tokens to tickets and conversations.
//!
//! In-process only (single active instance assumed). A ticket is immutable
//! after registration except for `status`. The registry guards two
//! invariants itself: a protocol is registered at most once for the
//! process lifetime, and a conversation holds at most one active
//! (non-finalized) ticket. Status lifecycle ordering
//! (open → in_progress → finalized) is the caller's responsibility — the
//! registry records whatever transition it is told.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::AttachmentRef;
use crate::error::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Finalized,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "Aberto",
            Self::InProgress => "Em andamento",
            Self::Finalized => "Finalizado",
        };
        write!(f, "{s}")
    }
}

/// A confirmed support request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Correlation token, immutable once issued.
    pub protocol: String,
    /// Owning conversation.
    pub conversation_id: i64,
    pub requester_name: String,
    /// Optional contact address, carbon-copied on the notification.
    pub requester_contact: Option<String>,
    pub category_key: String,
    /// Final description, frozen at creation.
    pub description: String,
    /// Frozen snapshot of staged attachments.
    pub attachments: Vec<AttachmentRef>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    by_protocol: HashMap<String, Ticket>,
    by_conversation: HashMap<i64, String>,
}

/// In-memory protocol ↔ ticket map.
#[derive(Debug, Default)]
pub struct TicketRegistry {
    inner: Mutex<Inner>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new ticket under its protocol.
    ///
    /// Rejects a duplicate protocol (`ProtocolCollision`) — never a silent
    /// overwrite — and rejects a second active ticket for the same
    /// conversation (`ActiveTicketExists`).
    pub fn register(&self, ticket: Ticket) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().expect("registry lock");

        if inner.by_protocol.contains_key(&ticket.protocol) {
            return Err(RegistryError::ProtocolCollision {
                protocol: ticket.protocol,
            });
        }

        if let Some(existing_protocol) = inner.by_conversation.get(&ticket.conversation_id)
            && let Some(existing) = inner.by_protocol.get(existing_protocol)
            && existing.status != TicketStatus::Finalized
        {
            return Err(RegistryError::ActiveTicketExists {
                conversation_id: ticket.conversation_id,
                protocol: existing_protocol.clone(),
            });
        }

        inner
            .by_conversation
            .insert(ticket.conversation_id, ticket.protocol.clone());
        inner.by_protocol.insert(ticket.protocol.clone(), ticket);
        Ok(())
    }

    /// Look up a ticket by protocol.
    pub fn lookup(&self, protocol: &str) -> Option<Ticket> {
        self.inner
            .lock()
            .expect("registry lock")
            .by_protocol
            .get(protocol)
            .cloned()
    }

    /// The conversation's active (non-finalized) ticket, if any.
    pub fn find_by_conversation(&self, conversation_id: i64) -> Option<Ticket> {
        let inner = self.inner.lock().expect("registry lock");
        let protocol = inner.by_conversation.get(&conversation_id)?;
        inner
            .by_protocol
            .get(protocol)
            .filter(|t| t.status != TicketStatus::Finalized)
            .cloned()
    }

    /// Set a ticket's status. Does not enforce lifecycle ordering.
    pub fn set_status(&self, protocol: &str, status: TicketStatus) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().expect("registry lock");
        let ticket = inner
            .by_protocol
            .get_mut(protocol)
            .ok_or_else(|| RegistryError::NotFound {
                protocol: protocol.to_string(),
            })?;
        ticket.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(protocol: &str, conversation_id: i64) -> Ticket {
        Ticket {
            protocol: protocol.into(),
            conversation_id,
            requester_name: "Ana Silva".into(),
            requester_contact: Some("ana@example.com".into()),
            category_key: "financeiro".into(),
            description: "segunda via do boleto".into(),
            attachments: vec![],
            status: TicketStatus::Open,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lookup_after_register_returns_same_ticket() {
        let registry = TicketRegistry::new();
        registry.register(ticket("20250824-1432", 10)).unwrap();
        let found = registry.lookup("20250824-1432").unwrap();
        assert_eq!(found.conversation_id, 10);
        assert_eq!(found.status, TicketStatus::Open);
        assert_eq!(found.description, "segunda via do boleto");
    }

    #[test]
    fn duplicate_protocol_is_rejected() {
        // Two tickets minted in the same minute by a naive generator
        // carry the same token — the registry must reject, not overwrite.
        let registry = TicketRegistry::new();
        registry.register(ticket("20250824-1432", 10)).unwrap();
        let err = registry.register(ticket("20250824-1432", 11)).unwrap_err();
        assert!(matches!(err, RegistryError::ProtocolCollision { .. }));
        // First registration untouched.
        assert_eq!(registry.lookup("20250824-1432").unwrap().conversation_id, 10);
    }

    #[test]
    fn second_active_ticket_for_conversation_is_rejected() {
        let registry = TicketRegistry::new();
        registry.register(ticket("20250824-1432", 10)).unwrap();
        let err = registry.register(ticket("20250824-1433", 10)).unwrap_err();
        match err {
            RegistryError::ActiveTicketExists { protocol, .. } => {
                assert_eq!(protocol, "20250824-1432");
            }
            other => panic!("expected ActiveTicketExists, got {other:?}"),
        }
    }

    #[test]
    fn finalized_ticket_frees_the_conversation() {
        let registry = TicketRegistry::new();
        registry.register(ticket("20250824-1432", 10)).unwrap();
        registry
            .set_status("20250824-1432", TicketStatus::Finalized)
            .unwrap();
        assert!(registry.find_by_conversation(10).is_none());
        registry.register(ticket("20250824-1500", 10)).unwrap();
        assert_eq!(
            registry.find_by_conversation(10).unwrap().protocol,
            "20250824-1500"
        );
        // Finalized ticket is never deleted, only status-transitioned.
        assert!(registry.lookup("20250824-1432").is_some());
    }

    #[test]
    fn set_status_on_unknown_protocol_errors() {
        let registry = TicketRegistry::new();
        let err = registry
            .set_status("19990101-0000", TicketStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn status_transition_is_visible_on_lookup() {
        let registry = TicketRegistry::new();
        registry.register(ticket("20250824-1432", 10)).unwrap();
        registry
            .set_status("20250824-1432", TicketStatus::InProgress)
            .unwrap();
        assert_eq!(
            registry.lookup("20250824-1432").unwrap().status,
            TicketStatus::InProgress
        );
    }

    #[test]
    fn status_display_matches_ledger_wording() {
        assert_eq!(TicketStatus::Open.to_string(), "Aberto");
        assert_eq!(TicketStatus::InProgress.to_string(), "Em andamento");
        assert_eq!(TicketStatus::Finalized.to_string(), "Finalizado");
    }
}
