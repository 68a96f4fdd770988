//! Reply correlation — matches inbound team emails back to conversations.
//!
//! The notification subject embeds `Protocolo <token>`; when the team
//! replies, the token (searched in the subject first, then the body) is
//! the only link back to the originating chat. This is a best-effort
//! channel: an unresolvable reply is dropped with a log entry — no retry,
//! no dead-letter queue.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, warn};

use crate::channels::{ChatOutbound, Choice};
use crate::ledger::Ledger;
use crate::registry::{TicketRegistry, TicketStatus};

/// Case-insensitive `protocolo` label, optional separator, then the token
/// (base `YYYYMMDD-HHmm`, optionally with the same-minute `-NN` suffix).
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)protocolo\s*[:\-–—]?\s*(\d{8}-\d{4}(?:-\d{2})?)").unwrap()
});

/// One polled reply from the notification mailbox.
#[derive(Debug, Clone)]
pub struct InboundReply {
    pub subject: String,
    pub body: String,
    /// Attachment file names, informational only.
    pub attachments: Vec<String>,
}

/// What happened to a handled reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Token resolved; body delivered to the conversation.
    Delivered { protocol: String },
    /// No token found in subject or body.
    NoToken,
    /// Token found but no registered ticket — dropped.
    UnknownToken(String),
    /// Token resolved but the chat send failed; the ticket is untouched.
    DeliveryFailed { protocol: String },
}

/// Extract a protocol token, trying the subject before the body.
pub fn extract_token(subject: &str, body: &str) -> Option<String> {
    TOKEN_PATTERN
        .captures(subject)
        .or_else(|| TOKEN_PATTERN.captures(body))
        .map(|caps| caps[1].to_string())
}

/// Resolves polled replies to live conversations.
pub struct ReplyCorrelator {
    registry: Arc<TicketRegistry>,
    chat: Arc<dyn ChatOutbound>,
    ledger: Arc<dyn Ledger>,
}

impl ReplyCorrelator {
    pub fn new(
        registry: Arc<TicketRegistry>,
        chat: Arc<dyn ChatOutbound>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            registry,
            chat,
            ledger,
        }
    }

    /// Handle one polled reply. Failures inside a delivery are logged and
    /// swallowed — the reply channel is best-effort by design.
    pub async fn handle_reply(&self, reply: &InboundReply) -> ReplyOutcome {
        let Some(protocol) = extract_token(&reply.subject, &reply.body) else {
            warn!(subject = %reply.subject, "Reply without protocol token dropped");
            return ReplyOutcome::NoToken;
        };

        let Some(ticket) = self.registry.lookup(&protocol) else {
            warn!(%protocol, "Reply token matches no registered ticket, dropped");
            return ReplyOutcome::UnknownToken(protocol);
        };

        let mut text = format!(
            "📩 *Resposta da equipe* — Protocolo {protocol}\n\n{}",
            reply.body.trim()
        );
        if !reply.attachments.is_empty() {
            text.push_str(&format!("\n\n📎 Anexos: {}", reply.attachments.join(", ")));
        }

        let choices = [
            Choice::new("✅ Finalizar chamado", format!("fin_{protocol}")),
            Choice::new("✍️ Continuar conversando", format!("cont_{protocol}")),
        ];
        if let Err(e) = self
            .chat
            .send_choices(ticket.conversation_id, &text, &choices)
            .await
        {
            warn!(%protocol, error = %e, "Failed to deliver reply to conversation");
            return ReplyOutcome::DeliveryFailed { protocol };
        }

        if ticket.status == TicketStatus::Open {
            if let Err(e) = self.registry.set_status(&protocol, TicketStatus::InProgress) {
                warn!(%protocol, error = %e, "Failed to mark ticket in progress");
            }
            if let Err(e) = self
                .ledger
                .update_status(&protocol, TicketStatus::InProgress)
                .await
            {
                warn!(%protocol, error = %e, "Ledger status update failed");
            }
        }

        if let Err(e) = self.ledger.append_reply(&protocol, &reply.body).await {
            warn!(%protocol, error = %e, "Ledger reply append failed");
        }

        info!(%protocol, "Reply delivered to conversation");
        ReplyOutcome::Delivered { protocol }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::{ChannelError, LedgerError};
    use crate::notify::notification_subject;
    use crate::protocol::ProtocolGenerator;
    use crate::registry::Ticket;

    // ── Token extraction ────────────────────────────────────────────

    #[test]
    fn extract_token_from_subject() {
        let token = extract_token("RE: Novo chamado – Protocolo 20250824-1432 – Financeiro", "");
        assert_eq!(token.as_deref(), Some("20250824-1432"));
    }

    #[test]
    fn extract_token_round_trips_generated_tokens() {
        let generator = ProtocolGenerator::new();
        let token = generator.generate();
        let subject = notification_subject(&token, "Financeiro");
        assert_eq!(extract_token(&subject, "").as_deref(), Some(token.as_str()));
    }

    #[test]
    fn extract_token_round_trips_suffixed_tokens() {
        let subject = notification_subject("20250824-1432-02", "Garantia");
        assert_eq!(
            extract_token(&subject, "").as_deref(),
            Some("20250824-1432-02")
        );
    }

    #[test]
    fn extract_token_prefers_subject_over_body() {
        let token = extract_token(
            "Protocolo 20250824-1432",
            "sobre o protocolo 20250101-0900",
        );
        assert_eq!(token.as_deref(), Some("20250824-1432"));
    }

    #[test]
    fn extract_token_falls_back_to_body() {
        let token = extract_token(
            "RE: chamado em aberto",
            "Bom dia,\n\nsegue retorno do Protocolo: 20250824-1432.\nAtt.",
        );
        assert_eq!(token.as_deref(), Some("20250824-1432"));
    }

    #[test]
    fn extract_token_is_case_insensitive() {
        assert!(extract_token("PROTOCOLO 20250824-1432", "").is_some());
        assert!(extract_token("protocolo: 20250824-1432", "").is_some());
    }

    #[test]
    fn extract_token_requires_label() {
        // A bare date-like number without the label is not a token.
        assert!(extract_token("pedido 20250824-1432", "").is_none());
    }

    #[test]
    fn extract_token_none_when_absent() {
        assert!(extract_token("RE: orçamento", "sem referência nenhuma").is_none());
    }

    // ── Correlator ──────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingChat {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ChatOutbound for RecordingChat {
        async fn send(&self, conversation_id: i64, text: &str) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id, text.to_string()));
            Ok(())
        }

        async fn send_choices(
            &self,
            conversation_id: i64,
            text: &str,
            _choices: &[Choice],
        ) -> Result<(), ChannelError> {
            self.send(conversation_id, text).await
        }
    }

    #[derive(Default)]
    struct RecordingLedger {
        status_updates: Mutex<Vec<(String, TicketStatus)>>,
        replies: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Ledger for RecordingLedger {
        async fn append_row(&self, _ticket: &Ticket) -> Result<(), LedgerError> {
            Ok(())
        }

        async fn update_status(
            &self,
            protocol: &str,
            status: TicketStatus,
        ) -> Result<(), LedgerError> {
            self.status_updates
                .lock()
                .unwrap()
                .push((protocol.to_string(), status));
            Ok(())
        }

        async fn append_reply(&self, protocol: &str, text: &str) -> Result<(), LedgerError> {
            self.replies
                .lock()
                .unwrap()
                .push((protocol.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn open_ticket(protocol: &str, conversation_id: i64) -> Ticket {
        Ticket {
            protocol: protocol.into(),
            conversation_id,
            requester_name: "Ana".into(),
            requester_contact: None,
            category_key: "garantia".into(),
            description: "aparelho com defeito".into(),
            attachments: vec![],
            status: TicketStatus::Open,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolved_reply_is_delivered_and_ticket_progresses() {
        let registry = Arc::new(TicketRegistry::new());
        registry.register(open_ticket("20250824-1432", 55)).unwrap();
        let chat = Arc::new(RecordingChat::default());
        let ledger = Arc::new(RecordingLedger::default());
        let correlator =
            ReplyCorrelator::new(registry.clone(), chat.clone(), ledger.clone());

        let reply = InboundReply {
            subject: "RE: Novo chamado – Protocolo 20250824-1432 – Garantia".into(),
            body: "Troca autorizada, enviaremos o aparelho novo.".into(),
            attachments: vec![],
        };
        let outcome = correlator.handle_reply(&reply).await;

        assert_eq!(
            outcome,
            ReplyOutcome::Delivered {
                protocol: "20250824-1432".into()
            }
        );
        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 55);
        assert!(sent[0].1.contains("Troca autorizada"));
        assert_eq!(
            registry.lookup("20250824-1432").unwrap().status,
            TicketStatus::InProgress
        );
        assert_eq!(ledger.replies.lock().unwrap().len(), 1);
        assert_eq!(ledger.status_updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn in_progress_ticket_is_not_restatused() {
        let registry = Arc::new(TicketRegistry::new());
        registry.register(open_ticket("20250824-1432", 55)).unwrap();
        registry
            .set_status("20250824-1432", TicketStatus::InProgress)
            .unwrap();
        let chat = Arc::new(RecordingChat::default());
        let ledger = Arc::new(RecordingLedger::default());
        let correlator =
            ReplyCorrelator::new(registry.clone(), chat.clone(), ledger.clone());

        let reply = InboundReply {
            subject: "Protocolo 20250824-1432".into(),
            body: "segunda resposta".into(),
            attachments: vec![],
        };
        correlator.handle_reply(&reply).await;
        assert!(ledger.status_updates.lock().unwrap().is_empty());
        assert_eq!(ledger.replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_token_produces_zero_outbound_sends() {
        let registry = Arc::new(TicketRegistry::new());
        let chat = Arc::new(RecordingChat::default());
        let ledger = Arc::new(RecordingLedger::default());
        let correlator =
            ReplyCorrelator::new(registry, chat.clone(), ledger.clone());

        let reply = InboundReply {
            subject: "RE: Protocolo 19990101-0000".into(),
            body: "resposta órfã".into(),
            attachments: vec![],
        };
        let outcome = correlator.handle_reply(&reply).await;
        assert_eq!(outcome, ReplyOutcome::UnknownToken("19990101-0000".into()));
        assert!(chat.sent.lock().unwrap().is_empty());
        assert!(ledger.replies.lock().unwrap().is_empty());
    }

    struct FailingChat;

    #[async_trait]
    impl ChatOutbound for FailingChat {
        async fn send(&self, _conversation_id: i64, _text: &str) -> Result<(), ChannelError> {
            Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "offline".into(),
            })
        }

        async fn send_choices(
            &self,
            conversation_id: i64,
            text: &str,
            _choices: &[Choice],
        ) -> Result<(), ChannelError> {
            self.send(conversation_id, text).await
        }
    }

    #[tokio::test]
    async fn delivery_failure_leaves_ticket_untouched() {
        let registry = Arc::new(TicketRegistry::new());
        registry.register(open_ticket("20250824-1432", 55)).unwrap();
        let ledger = Arc::new(RecordingLedger::default());
        let correlator =
            ReplyCorrelator::new(registry.clone(), Arc::new(FailingChat), ledger.clone());

        let reply = InboundReply {
            subject: "Protocolo 20250824-1432".into(),
            body: "resposta que não chega".into(),
            attachments: vec![],
        };
        let outcome = correlator.handle_reply(&reply).await;
        assert_eq!(
            outcome,
            ReplyOutcome::DeliveryFailed {
                protocol: "20250824-1432".into()
            }
        );
        // Status stays open and nothing reaches the ledger.
        assert_eq!(
            registry.lookup("20250824-1432").unwrap().status,
            TicketStatus::Open
        );
        assert!(ledger.status_updates.lock().unwrap().is_empty());
        assert!(ledger.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tokenless_reply_is_dropped() {
        let registry = Arc::new(TicketRegistry::new());
        let chat = Arc::new(RecordingChat::default());
        let ledger = Arc::new(RecordingLedger::default());
        let correlator = ReplyCorrelator::new(registry, chat.clone(), ledger);

        let reply = InboundReply {
            subject: "newsletter semanal".into(),
            body: "promoções".into(),
            attachments: vec![],
        };
        assert_eq!(correlator.handle_reply(&reply).await, ReplyOutcome::NoToken);
        assert!(chat.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_attachments_are_listed() {
        let registry = Arc::new(TicketRegistry::new());
        registry.register(open_ticket("20250824-1432", 55)).unwrap();
        let chat = Arc::new(RecordingChat::default());
        let ledger = Arc::new(RecordingLedger::default());
        let correlator = ReplyCorrelator::new(registry, chat.clone(), ledger);

        let reply = InboundReply {
            subject: "Protocolo 20250824-1432".into(),
            body: "segue laudo em anexo".into(),
            attachments: vec!["laudo.pdf".into()],
        };
        correlator.handle_reply(&reply).await;
        let sent = chat.sent.lock().unwrap();
        assert!(sent[0].1.contains("laudo.pdf"));
    }
}
