//! The intake step machine.
//!
//! Every inbound chat event lands here. The machine locks the
//! conversation's state cell for the whole transition, so per-chat
//! ordering is guaranteed even though each event runs on its own task.
//! Collaborator failures (mail, ledger) leave the phase and the pending
//! ticket untouched; the user retries by pressing the same button again
//! and already-completed side effects are skipped via the pending-ticket
//! flags.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::catalog::CategoryCatalog;
use crate::channels::{AttachmentRef, ChatEvent, ChatEventKind, ChatOutbound, Choice};
use crate::classify::{Classifier, Confidence};
use crate::contacts::ContactDirectory;
use crate::error::{RegistryError, Result};
use crate::intake::state::{ConversationState, ConversationStore, PendingTicket, Phase};
use crate::ledger::Ledger;
use crate::notify::{notification_body, notification_subject, Notifier};
use crate::protocol::ProtocolGenerator;
use crate::registry::{Ticket, TicketRegistry, TicketStatus};
use crate::summarize::{fallback_summary, Summarizer};

/// Phrase that starts an intake from idle regardless of classification.
pub const INTAKE_TRIGGER: &str = "abrir chamado";

/// Everything the machine needs, wired once at startup.
pub struct IntakeDeps {
    pub catalog: Arc<CategoryCatalog>,
    pub classifier: Classifier,
    pub generator: ProtocolGenerator,
    pub registry: Arc<TicketRegistry>,
    pub contacts: Arc<ContactDirectory>,
    pub chat: Arc<dyn ChatOutbound>,
    pub notifier: Arc<dyn Notifier>,
    pub ledger: Arc<dyn Ledger>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

pub struct IntakeMachine {
    catalog: Arc<CategoryCatalog>,
    classifier: Classifier,
    generator: ProtocolGenerator,
    pub(crate) conversations: ConversationStore,
    registry: Arc<TicketRegistry>,
    contacts: Arc<ContactDirectory>,
    chat: Arc<dyn ChatOutbound>,
    notifier: Arc<dyn Notifier>,
    ledger: Arc<dyn Ledger>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl IntakeMachine {
    pub fn new(deps: IntakeDeps) -> Self {
        Self {
            catalog: deps.catalog,
            classifier: deps.classifier,
            generator: deps.generator,
            conversations: ConversationStore::new(),
            registry: deps.registry,
            contacts: deps.contacts,
            chat: deps.chat,
            notifier: deps.notifier,
            ledger: deps.ledger,
            summarizer: deps.summarizer,
        }
    }

    /// Handle one inbound event. Holds the conversation lock end to end.
    pub async fn handle_event(&self, event: ChatEvent) -> Result<()> {
        self.contacts.upsert_name(event.sender_id, &event.sender_name);

        let cell = self.conversations.entry(event.conversation_id);
        let mut state = cell.lock().await;

        match event.kind.clone() {
            ChatEventKind::Text(text) => self.on_text(&mut state, &event, &text).await,
            ChatEventKind::Choice(data) => self.on_choice(&mut state, &event, &data).await,
            ChatEventKind::Attachment(file) => self.on_attachment(&mut state, &event, file).await,
        }
    }

    // ── Text events ─────────────────────────────────────────────────

    async fn on_text(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
        text: &str,
    ) -> Result<()> {
        match state.phase {
            Phase::Idle => self.begin_intake(state, event, text).await,
            Phase::AwaitingContactEmail => self.on_contact_email(state, event, text).await,
            Phase::AwaitingCategorySelection | Phase::AwaitingCategoryConfirmation => {
                self.chat
                    .send(
                        event.conversation_id,
                        "Use os botões acima para escolher o setor, por favor. 🙂",
                    )
                    .await?;
                Ok(())
            }
            Phase::AwaitingDescription => {
                state.draft_description = Some(text.trim().to_string());
                self.present_review(state, event).await
            }
            Phase::AwaitingReview => {
                self.chat
                    .send(
                        event.conversation_id,
                        "Use os botões do resumo: confirmar, adicionar informação ou refazer a descrição.",
                    )
                    .await?;
                Ok(())
            }
            Phase::AwaitingAdditionalInfo => {
                let draft = state.draft_description.take().unwrap_or_default();
                state.draft_description =
                    Some(format!("{draft}\n\nComplemento: {}", text.trim()));
                self.present_review(state, event).await
            }
            Phase::AwaitingRevisedDescription => {
                state.draft_description = Some(text.trim().to_string());
                self.present_review(state, event).await
            }
        }
    }

    /// Start an intake from idle text, routing by classification.
    async fn begin_intake(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
        text: &str,
    ) -> Result<()> {
        let lowered = text.to_lowercase();

        // Resume-or-reject: one active ticket per conversation. An
        // explicit new-intake request is rejected; any other idle text
        // continues the active ticket.
        if let Some(open) = self.registry.find_by_conversation(event.conversation_id) {
            if !lowered.contains(INTAKE_TRIGGER) {
                return self.continue_ticket(event, &open.protocol, text).await;
            }
            let choices = [
                Choice::new("✅ Finalizar chamado", format!("fin_{}", open.protocol)),
                Choice::new("✍️ Continuar conversando", format!("cont_{}", open.protocol)),
            ];
            self.chat
                .send_choices(
                    event.conversation_id,
                    &format!(
                        "⚠️ Você já tem um chamado em aberto (Protocolo {}).\n\
                         Finalize-o antes de abrir um novo, ou continue a conversa dele.",
                        open.protocol
                    ),
                    &choices,
                )
                .await?;
            return Ok(());
        }

        if !lowered.contains(INTAKE_TRIGGER) {
            match self.classifier.classify(text) {
                Some(c) if c.confidence == Confidence::High => {
                    state.selected_category = Some(c.category_key);
                }
                Some(c) => {
                    state.suggested_category = Some(c.category_key);
                }
                None => {}
            }
        }

        info!(
            conversation_id = event.conversation_id,
            selected = ?state.selected_category,
            suggested = ?state.suggested_category,
            "Intake started"
        );

        if self.contacts.email_of(event.sender_id).is_none() {
            state.phase = Phase::AwaitingContactEmail;
            self.chat
                .send(
                    event.conversation_id,
                    "Olá! Para abrir seu chamado, me informe um e-mail de contato \
                     (ou responda \"pular\" para seguir sem e-mail). 📧",
                )
                .await?;
            return Ok(());
        }

        self.route_after_contact(state, event).await
    }

    async fn on_contact_email(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
        text: &str,
    ) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("pular") {
            return self.route_after_contact(state, event).await;
        }
        if trimmed.contains('@') && !trimmed.contains(char::is_whitespace) {
            self.contacts.set_email(event.sender_id, trimmed);
            self.chat
                .send(
                    event.conversation_id,
                    &format!("E-mail {trimmed} registrado. ✅"),
                )
                .await?;
            return self.route_after_contact(state, event).await;
        }
        self.chat
            .send(
                event.conversation_id,
                "Isso não parece um e-mail válido. Envie um endereço como \
                 nome@empresa.com.br, ou responda \"pular\".",
            )
            .await?;
        Ok(())
    }

    /// Route to the category step that matches what classification left
    /// in the state.
    async fn route_after_contact(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
    ) -> Result<()> {
        if let Some(key) = state.selected_category.clone() {
            state.phase = Phase::AwaitingDescription;
            self.chat
                .send(
                    event.conversation_id,
                    &format!(
                        "Entendi, isso é com o setor *{}*. 📝\n\
                         Me descreva sua solicitação com o máximo de detalhes.",
                        self.catalog.display_name(&key)
                    ),
                )
                .await?;
            return Ok(());
        }

        if let Some(key) = state.suggested_category.clone() {
            state.phase = Phase::AwaitingCategoryConfirmation;
            let choices = [
                Choice::new("👍 Sim, é isso", "sugg_yes"),
                Choice::new("👎 Não, escolher outro", "sugg_no"),
            ];
            self.chat
                .send_choices(
                    event.conversation_id,
                    &format!(
                        "Sua solicitação parece ser do setor *{}*. Confirma?",
                        self.catalog.display_name(&key)
                    ),
                    &choices,
                )
                .await?;
            return Ok(());
        }

        self.send_category_menu(state, event.conversation_id).await
    }

    async fn send_category_menu(
        &self,
        state: &mut ConversationState,
        conversation_id: i64,
    ) -> Result<()> {
        state.phase = Phase::AwaitingCategorySelection;
        let choices: Vec<Choice> = self
            .catalog
            .iter()
            .map(|c| Choice::new(c.display_name.clone(), format!("cat_{}", c.key)))
            .collect();
        self.chat
            .send_choices(
                conversation_id,
                "Qual setor atende sua solicitação? Escolha abaixo: 👇",
                &choices,
            )
            .await?;
        Ok(())
    }

    // ── Choice events ───────────────────────────────────────────────

    async fn on_choice(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
        data: &str,
    ) -> Result<()> {
        if let Some(key) = data.strip_prefix("cat_") {
            if state.phase != Phase::AwaitingCategorySelection {
                debug!(data, phase = %state.phase, "Stale category pick ignored");
                return Ok(());
            }
            if self.catalog.get(key).is_none() {
                warn!(key, "Category pick for unknown key ignored");
                return Ok(());
            }
            state.selected_category = Some(key.to_string());
            state.suggested_category = None;
            state.phase = Phase::AwaitingDescription;
            self.chat
                .send(
                    event.conversation_id,
                    &format!(
                        "Setor *{}* selecionado. 📝\n\
                         Me descreva sua solicitação com o máximo de detalhes.",
                        self.catalog.display_name(key)
                    ),
                )
                .await?;
            return Ok(());
        }

        match data {
            "sugg_yes" => {
                if state.phase != Phase::AwaitingCategoryConfirmation {
                    return Ok(());
                }
                let key = match state.suggested_category.take() {
                    Some(k) => k,
                    None => return self.send_category_menu(state, event.conversation_id).await,
                };
                state.selected_category = Some(key.clone());
                state.phase = Phase::AwaitingDescription;
                self.chat
                    .send(
                        event.conversation_id,
                        &format!(
                            "Perfeito, setor *{}*. 📝\n\
                             Me descreva sua solicitação com o máximo de detalhes.",
                            self.catalog.display_name(&key)
                        ),
                    )
                    .await?;
            }
            "sugg_no" => {
                if state.phase != Phase::AwaitingCategoryConfirmation {
                    return Ok(());
                }
                state.suggested_category = None;
                self.send_category_menu(state, event.conversation_id).await?;
            }
            "rev_confirm" => {
                if state.phase != Phase::AwaitingReview {
                    debug!("Stale confirm ignored");
                    return Ok(());
                }
                self.confirm_ticket(state, event).await?;
            }
            "rev_add" => {
                if state.phase != Phase::AwaitingReview {
                    return Ok(());
                }
                state.phase = Phase::AwaitingAdditionalInfo;
                self.chat
                    .send(
                        event.conversation_id,
                        "Pode enviar a informação adicional. ➕",
                    )
                    .await?;
            }
            "rev_replace" => {
                if state.phase != Phase::AwaitingReview {
                    return Ok(());
                }
                state.phase = Phase::AwaitingRevisedDescription;
                self.chat
                    .send(
                        event.conversation_id,
                        "Sem problema, envie a nova descrição. ✏️",
                    )
                    .await?;
            }
            other => {
                if let Some(protocol) = other.strip_prefix("fin_") {
                    self.finalize_ticket(state, event, protocol).await?;
                } else if let Some(_protocol) = other.strip_prefix("cont_") {
                    self.chat
                        .send(
                            event.conversation_id,
                            "Combinado! Pode continuar escrevendo; a equipe responde \
                             pelo mesmo protocolo. ✍️",
                        )
                        .await?;
                } else {
                    warn!(data = other, "Unknown callback data ignored");
                }
            }
        }
        Ok(())
    }

    /// Append idle text to the active ticket's ledger row so the team
    /// sees it under the same protocol.
    async fn continue_ticket(
        &self,
        event: &ChatEvent,
        protocol: &str,
        text: &str,
    ) -> Result<()> {
        if let Err(e) = self.ledger.append_reply(protocol, text).await {
            warn!(%protocol, error = %e, "Continuation append failed");
            self.chat
                .send(
                    event.conversation_id,
                    "⚠️ Não consegui anexar sua mensagem ao chamado agora. \
                     Tente novamente em instantes.",
                )
                .await?;
            return Ok(());
        }
        self.chat
            .send(
                event.conversation_id,
                &format!(
                    "💬 Mensagem adicionada ao chamado {protocol}. \
                     A equipe responde pelo mesmo protocolo."
                ),
            )
            .await?;
        Ok(())
    }

    async fn finalize_ticket(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
        protocol: &str,
    ) -> Result<()> {
        match self.registry.set_status(protocol, TicketStatus::Finalized) {
            Ok(()) => {
                if let Err(e) = self
                    .ledger
                    .update_status(protocol, TicketStatus::Finalized)
                    .await
                {
                    warn!(%protocol, error = %e, "Ledger finalize update failed");
                }
                state.reset();
                info!(%protocol, "Ticket finalized");
                self.chat
                    .send(
                        event.conversation_id,
                        &format!("✅ Chamado {protocol} finalizado. Obrigado!"),
                    )
                    .await?;
            }
            Err(e) => {
                warn!(%protocol, error = %e, "Finalize for unknown protocol");
                self.chat
                    .send(
                        event.conversation_id,
                        "Não encontrei esse chamado para finalizar. 🤔",
                    )
                    .await?;
            }
        }
        Ok(())
    }

    // ── Attachment events ───────────────────────────────────────────

    /// Attachments are staged in any phase and never change the phase.
    async fn on_attachment(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
        file: AttachmentRef,
    ) -> Result<()> {
        let label = file.label().to_string();
        state.staged_attachments.push(file);
        self.chat
            .send(
                event.conversation_id,
                &format!("📎 Anexo \"{label}\" recebido e incluído no chamado."),
            )
            .await?;
        Ok(())
    }

    // ── Review and confirm ──────────────────────────────────────────

    async fn present_review(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
    ) -> Result<()> {
        let description = state.draft_description.clone().unwrap_or_default();
        let category_key = state.selected_category.clone().unwrap_or_default();
        let display = self.catalog.display_name(&category_key);

        // The summary is an enrichment; a slow or failing agent degrades
        // to the deterministic local format.
        let mut summary = match &self.summarizer {
            Some(agent) => match agent.summarize(&display, &description).await {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => fallback_summary(&display, &description),
                Err(e) => {
                    warn!(error = %e, "Summary agent failed, using local fallback");
                    fallback_summary(&display, &description)
                }
            },
            None => fallback_summary(&display, &description),
        };

        if !state.staged_attachments.is_empty() {
            let names: Vec<&str> = state
                .staged_attachments
                .iter()
                .map(AttachmentRef::label)
                .collect();
            summary.push_str(&format!("\n📎 Anexos: {}", names.join(", ")));
        }
        summary.push_str("\n\nConfirma a abertura do chamado?");

        state.phase = Phase::AwaitingReview;
        let choices = [
            Choice::new("✅ Confirmar e abrir chamado", "rev_confirm"),
            Choice::new("➕ Adicionar informação", "rev_add"),
            Choice::new("✏️ Refazer descrição", "rev_replace"),
        ];
        self.chat
            .send_choices(event.conversation_id, &summary, &choices)
            .await?;
        Ok(())
    }

    /// Materialize the pending ticket. Retry-safe: each side effect is
    /// recorded in the pending flags, so pressing confirm again after a
    /// failure never duplicates a registration or a ledger row.
    async fn confirm_ticket(
        &self,
        state: &mut ConversationState,
        event: &ChatEvent,
    ) -> Result<()> {
        let category_key = match state.selected_category.clone() {
            Some(k) => k,
            None => {
                warn!("Confirm without a selected category, restarting menu");
                return self.send_category_menu(state, event.conversation_id).await;
            }
        };
        let display = self.catalog.display_name(&category_key);

        if state.pending_ticket.is_none() {
            let requester_name = self
                .contacts
                .get(event.sender_id)
                .map(|r| r.display_name)
                .unwrap_or_else(|| event.sender_name.clone());
            let ticket = Ticket {
                protocol: self.generator.generate(),
                conversation_id: event.conversation_id,
                requester_name,
                requester_contact: self.contacts.email_of(event.sender_id),
                category_key: category_key.clone(),
                description: state.draft_description.clone().unwrap_or_default(),
                attachments: state.staged_attachments.clone(),
                status: TicketStatus::Open,
                created_at: Utc::now(),
            };
            state.pending_ticket = Some(PendingTicket {
                ticket,
                registered: false,
                ledger_recorded: false,
            });
        }
        let pending = state.pending_ticket.as_mut().expect("pending ticket set above");

        if !pending.registered {
            let mut result = self.registry.register(pending.ticket.clone());
            if let Err(RegistryError::ProtocolCollision { protocol }) = &result {
                // External registration beat us to the token; reissue once.
                warn!(%protocol, "Protocol collision on confirm, reissuing token");
                pending.ticket.protocol = self.generator.generate();
                result = self.registry.register(pending.ticket.clone());
            }
            match result {
                Ok(()) => pending.registered = true,
                Err(RegistryError::ActiveTicketExists { protocol, .. }) => {
                    self.chat
                        .send(
                            event.conversation_id,
                            &format!(
                                "⚠️ Você já tem um chamado em aberto (Protocolo {protocol}). \
                                 Finalize-o antes de abrir um novo."
                            ),
                        )
                        .await?;
                    state.reset();
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Ticket registration failed");
                    self.chat
                        .send(
                            event.conversation_id,
                            "⚠️ Não consegui registrar o chamado agora. \
                             Toque em Confirmar novamente em instantes.",
                        )
                        .await?;
                    return Ok(());
                }
            }
        }

        let ticket_snapshot = pending.ticket.clone();

        if !pending.ledger_recorded {
            match self.ledger.append_row(&ticket_snapshot).await {
                Ok(()) => pending.ledger_recorded = true,
                Err(e) => {
                    warn!(error = %e, "Ledger append failed, keeping pending ticket");
                    self.chat
                        .send(
                            event.conversation_id,
                            "⚠️ Não consegui registrar o chamado agora. \
                             Toque em Confirmar novamente em instantes.",
                        )
                        .await?;
                    return Ok(());
                }
            }
        }

        let targets = self
            .catalog
            .get(&category_key)
            .map(|c| c.notify_targets.clone())
            .unwrap_or_default();
        let subject = notification_subject(&ticket_snapshot.protocol, &display);
        let body = notification_body(
            &ticket_snapshot.protocol,
            &ticket_snapshot.requester_name,
            &display,
            &ticket_snapshot.description,
        );
        let attachment_names: Vec<String> = ticket_snapshot
            .attachments
            .iter()
            .map(|a| a.label().to_string())
            .collect();

        if let Err(e) = self
            .notifier
            .notify(
                &targets,
                &subject,
                &body,
                &attachment_names,
                ticket_snapshot.requester_contact.as_deref(),
            )
            .await
        {
            warn!(error = %e, "Team notification failed, keeping pending ticket");
            self.chat
                .send(
                    event.conversation_id,
                    "⚠️ O chamado foi registrado mas a equipe ainda não foi notificada. \
                     Toque em Confirmar novamente em instantes.",
                )
                .await?;
            return Ok(());
        }

        info!(
            protocol = %ticket_snapshot.protocol,
            category = %category_key,
            "Ticket opened and team notified"
        );
        state.reset();
        self.chat
            .send(
                event.conversation_id,
                &format!(
                    "✅ *Chamado aberto!*\n\n\
                     📌 Protocolo: {}\n\
                     🏢 Setor: {display}\n\n\
                     Nossa equipe foi notificada e responderá em breve. \
                     Guarde o protocolo para acompanhar.",
                    ticket_snapshot.protocol
                ),
            )
            .await?;
        Ok(())
    }
}
