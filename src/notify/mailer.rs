//! Outbound notification mail via SMTP (lettre).
//!
//! The subject embeds the protocol token in a fixed position — the reply
//! correlator parses it back out of the team's answer, so the format here
//! and the regex in `correlate` are two halves of one contract.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::NotifyError;

/// Outbound notifier contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify a team about a ticket. `cc` carbon-copies the requester.
    async fn notify(
        &self,
        targets: &[String],
        subject: &str,
        body: &str,
        attachment_names: &[String],
        cc: Option<&str>,
    ) -> Result<(), NotifyError>;
}

/// Subject line with the protocol token in its fixed, parseable position.
pub fn notification_subject(protocol: &str, category_display: &str) -> String {
    format!("Novo chamado – Protocolo {protocol} – {category_display}")
}

/// Notification body shown to the receiving team.
pub fn notification_body(
    protocol: &str,
    requester: &str,
    category_display: &str,
    description: &str,
) -> String {
    format!(
        "Olá equipe {category_display},\n\n\
         Um novo chamado foi aberto.\n\n\
         Protocolo : {protocol}\n\
         Solicitante: {requester}\n\
         Categoria  : {category_display}\n\
         Solicitação: {description}\n\n\
         Por favor, verifiquem e deem seguimento.\n\n\
         CAR – Central de Atendimento ao Representante"
    )
}

/// SMTP implementation of the notifier.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build and send the message. Blocking — run in `spawn_blocking`.
    fn send_blocking(
        config: &SmtpConfig,
        targets: &[String],
        subject: &str,
        body: &str,
        cc: Option<&str>,
    ) -> Result<(), NotifyError> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| NotifyError::InvalidAddress {
                address: config.from_address.clone(),
                reason: format!("{e}"),
            })?;

        let mut builder = Message::builder().from(from).subject(subject);
        for target in targets {
            let to: Mailbox = target.parse().map_err(|e| NotifyError::InvalidAddress {
                address: target.clone(),
                reason: format!("{e}"),
            })?;
            builder = builder.to(to);
        }
        if let Some(cc_addr) = cc
            && let Ok(mailbox) = cc_addr.parse::<Mailbox>()
        {
            builder = builder.cc(mailbox);
        }

        let email = builder
            .body(body.to_string())
            .map_err(|e| NotifyError::BuildFailed(e.to_string()))?;

        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| NotifyError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        transport
            .send(&email)
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(
        &self,
        targets: &[String],
        subject: &str,
        body: &str,
        attachment_names: &[String],
        cc: Option<&str>,
    ) -> Result<(), NotifyError> {
        if targets.is_empty() {
            return Err(NotifyError::BuildFailed("no notification targets".into()));
        }

        // Chat-side files stay on the chat transport; the team sees the
        // names and asks the requester when it needs the content.
        let mut full_body = body.to_string();
        if !attachment_names.is_empty() {
            full_body.push_str(&format!(
                "\n\nAnexos enviados pelo solicitante: {}",
                attachment_names.join(", ")
            ));
        }

        let config = self.config.clone();
        let targets = targets.to_vec();
        let subject_owned = subject.to_string();
        let cc_owned = cc.map(String::from);
        tokio::task::spawn_blocking(move || {
            Self::send_blocking(
                &config,
                &targets,
                &subject_owned,
                &full_body,
                cc_owned.as_deref(),
            )
        })
        .await
        .map_err(|e| NotifyError::SendFailed(format!("send task panicked: {e}")))??;

        info!(subject = %subject, "Notification email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_embeds_token_in_fixed_position() {
        let subject = notification_subject("20250824-1432", "Financeiro");
        assert_eq!(
            subject,
            "Novo chamado – Protocolo 20250824-1432 – Financeiro"
        );
    }

    #[test]
    fn body_carries_ticket_fields() {
        let body = notification_body(
            "20250824-1432",
            "Ana Silva",
            "Garantia",
            "aparelho com defeito",
        );
        assert!(body.contains("Protocolo : 20250824-1432"));
        assert!(body.contains("Solicitante: Ana Silva"));
        assert!(body.contains("equipe Garantia"));
        assert!(body.contains("aparelho com defeito"));
    }

    #[tokio::test]
    async fn notify_rejects_empty_target_list() {
        let notifier = SmtpNotifier::new(SmtpConfig {
            host: "smtp.test".into(),
            port: 587,
            username: "user".into(),
            password: secrecy::SecretString::from("pass"),
            from_address: "car@test".into(),
            from_name: "CAR".into(),
        });
        let result = notifier.notify(&[], "s", "b", &[], None).await;
        assert!(matches!(result, Err(NotifyError::BuildFailed(_))));
    }

    #[tokio::test]
    async fn notify_rejects_invalid_target_address() {
        let notifier = SmtpNotifier::new(SmtpConfig {
            host: "smtp.test".into(),
            port: 587,
            username: "user".into(),
            password: secrecy::SecretString::from("pass"),
            from_address: "car@test.com".into(),
            from_name: "CAR".into(),
        });
        let result = notifier
            .notify(&["not an address".into()], "s", "b", &[], None)
            .await;
        assert!(matches!(result, Err(NotifyError::InvalidAddress { .. })));
    }
}
