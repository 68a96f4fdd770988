//! Inbound reply mailbox — raw IMAP over TLS, polled on an interval.
//!
//! Each tick fetches unseen messages, marks them `\Seen` on the server
//! and hands them to the correlator. Transport failures wait a fixed
//! extra delay and retry on the next tick; there is no backoff and no
//! persistence, an unreachable mailbox just delays replies.

use std::collections::HashSet;
use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mail_parser::{MessageParser, MimeHeaders};
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ImapConfig;
use crate::correlate::{InboundReply, ReplyCorrelator};

type ImapError = Box<dyn std::error::Error + Send + Sync>;

/// Strip HTML tags and normalize whitespace (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

fn extract_attachment_names(parsed: &mail_parser::Message) -> Vec<String> {
    parsed
        .attachments()
        .filter_map(|part| MimeHeaders::attachment_name(part).map(str::to_string))
        .collect()
}

/// One fetched message: (message_id, reply).
type FetchedReply = (String, InboundReply);

/// Fetch unseen messages via raw IMAP over TLS (blocking — run in
/// `spawn_blocking`).
fn fetch_unseen(config: &ImapConfig) -> Result<Vec<FetchedReply>, ImapError> {
    let tcp = TcpStream::connect((&*config.host, config.port))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls_pki_types::ServerName<'_> =
        rustls_pki_types::ServerName::try_from(config.host.clone())?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let read_line =
        |tls: &mut rustls::StreamOwned<rustls::ClientConnection, TcpStream>| -> Result<String, ImapError> {
            let mut buf = Vec::new();
            loop {
                let mut byte = [0u8; 1];
                match std::io::Read::read(tls, &mut byte) {
                    Ok(0) => return Err("IMAP connection closed".into()),
                    Ok(_) => {
                        buf.push(byte[0]);
                        if buf.ends_with(b"\r\n") {
                            return Ok(String::from_utf8_lossy(&buf).to_string());
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

    let send_cmd =
        |tls: &mut rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
         tag: &str,
         cmd: &str|
         -> Result<Vec<String>, ImapError> {
            let full = format!("{tag} {cmd}\r\n");
            IoWrite::write_all(tls, full.as_bytes())?;
            IoWrite::flush(tls)?;
            let mut lines = Vec::new();
            loop {
                let line = read_line(tls)?;
                let done = line.starts_with(tag);
                lines.push(line);
                if done {
                    break;
                }
            }
            Ok(lines)
        };

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err("IMAP login failed".into());
    }

    let _select = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;

    let search_resp = send_cmd(&mut tls, "A3", "SEARCH UNSEEN")?;
    let mut uids: Vec<String> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend(parts[2..].iter().map(|s| s.to_string()));
            }
        }
    }

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut tls, &fetch_tag, &format!("FETCH {uid} RFC822"))?;

        let raw: String = fetch_resp
            .iter()
            .skip(1)
            .take(fetch_resp.len().saturating_sub(2))
            .cloned()
            .collect();

        if let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) {
            let subject = parsed.subject().unwrap_or_default().to_string();
            let body = extract_text(&parsed);
            let attachments = extract_attachment_names(&parsed);
            let msg_id = parsed
                .message_id()
                .map(str::to_string)
                .unwrap_or_else(|| format!("gen-{}", uuid::Uuid::new_v4()));
            results.push((
                msg_id,
                InboundReply {
                    subject,
                    body,
                    attachments,
                },
            ));
        }

        let store_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let _ = send_cmd(&mut tls, &store_tag, &format!("STORE {uid} +FLAGS (\\Seen)"));
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(results)
}

/// Spawn the reply poll loop. Returns the task handle and a shutdown
/// flag; setting the flag stops the loop at the next tick.
pub fn spawn_reply_poller(
    config: ImapConfig,
    correlator: Arc<ReplyCorrelator>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Reply mailbox polling every {}s on {}",
            config.poll_interval_secs, config.host
        );

        // `\Seen` already prevents refetching; the set guards against
        // servers that are slow to persist the flag.
        let mut seen: HashSet<String> = HashSet::new();
        let mut tick =
            tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

        loop {
            tick.tick().await;

            if shutdown_flag.load(Ordering::Relaxed) {
                info!("Reply poll loop shutting down");
                return;
            }

            let cfg = config.clone();
            match tokio::task::spawn_blocking(move || fetch_unseen(&cfg)).await {
                Ok(Ok(messages)) => {
                    for (msg_id, reply) in messages {
                        if !seen.insert(msg_id) {
                            continue;
                        }
                        correlator.handle_reply(&reply).await;
                    }
                }
                Ok(Err(e)) => {
                    warn!("Reply poll failed: {e}");
                    tokio::time::sleep(Duration::from_secs(config.retry_delay_secs)).await;
                }
                Err(e) => {
                    error!("Reply poll task panicked: {e}");
                    tokio::time::sleep(Duration::from_secs(config.retry_delay_secs)).await;
                }
            }
        }
    });

    (handle, shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Troca autorizada</p>"), "Troca autorizada");
    }

    #[test]
    fn strip_html_nested_tags_and_whitespace() {
        assert_eq!(
            strip_html("<div><b>Protocolo</b>   20250824-1432</div>"),
            "Protocolo 20250824-1432"
        );
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("sem html"), "sem html");
    }

    #[test]
    fn parsed_reply_keeps_subject_and_body() {
        let raw = b"From: equipe@galtecom.com.br\r\n\
Subject: RE: Novo chamado - Protocolo 20250824-1432 - Garantia\r\n\
Content-Type: text/plain\r\n\
\r\n\
Troca autorizada.\r\n";
        let parsed = MessageParser::default().parse(raw.as_slice()).unwrap();
        assert!(parsed.subject().unwrap().contains("20250824-1432"));
        assert_eq!(extract_text(&parsed).trim(), "Troca autorizada.");
        assert!(extract_attachment_names(&parsed).is_empty());
    }
}
