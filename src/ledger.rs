//! Spreadsheet ledger — append-only audit log keyed by protocol.
//!
//! Rows live in a Google Sheets tab with the layout
//! `A:H = protocolo, data/hora, solicitante, setor, solicitação, anexos,
//! status, última resposta`. Lookups are a linear scan over column A; the
//! sheet is small and human-maintained, so that is acceptable at this
//! scale.

use async_trait::async_trait;
use chrono::Local;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::catalog::CategoryCatalog;
use crate::config::SheetsConfig;
use crate::error::LedgerError;
use crate::registry::{Ticket, TicketStatus};

/// Status column in the sheet layout.
const STATUS_COLUMN: char = 'G';
/// Last-reply column in the sheet layout.
const REPLY_COLUMN: char = 'H';

/// Append-only audit log contract.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append one row for a freshly confirmed ticket.
    async fn append_row(&self, ticket: &Ticket) -> Result<(), LedgerError>;

    /// Rewrite the status cell of the ticket's row.
    async fn update_status(&self, protocol: &str, status: TicketStatus)
    -> Result<(), LedgerError>;

    /// Record the latest team reply on the ticket's row.
    async fn append_reply(&self, protocol: &str, text: &str) -> Result<(), LedgerError>;
}

/// Render a ticket as its sheet row (columns A through H).
pub fn ticket_row(ticket: &Ticket, category_display: &str) -> Vec<String> {
    let attachments = ticket
        .attachments
        .iter()
        .map(|a| a.label().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        ticket.protocol.clone(),
        ticket
            .created_at
            .with_timezone(&Local)
            .format("%d/%m/%Y %H:%M")
            .to_string(),
        ticket.requester_name.clone(),
        category_display.to_string(),
        ticket.description.clone(),
        attachments,
        ticket.status.to_string(),
        String::new(),
    ]
}

/// Find the 1-based sheet row whose column A equals `protocol`.
///
/// `values` is the `values` array of a Sheets `values.get` response;
/// row 1 is assumed to be the header.
pub fn find_protocol_row(values: &serde_json::Value, protocol: &str) -> Option<usize> {
    let rows = values.as_array()?;
    rows.iter()
        .enumerate()
        .skip(1)
        .find(|(_, row)| {
            row.get(0)
                .and_then(serde_json::Value::as_str)
                .is_some_and(|cell| cell == protocol)
        })
        .map(|(i, _)| i + 1)
}

/// Google Sheets implementation of the ledger.
pub struct SheetsLedger {
    config: SheetsConfig,
    catalog: std::sync::Arc<CategoryCatalog>,
    client: reqwest::Client,
}

impl SheetsLedger {
    pub fn new(config: SheetsConfig, catalog: std::sync::Arc<CategoryCatalog>) -> Self {
        Self {
            config,
            catalog,
            client: reqwest::Client::new(),
        }
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}!{}{}",
            self.config.spreadsheet_id, self.config.sheet_name, range, suffix
        )
    }

    async fn fetch_rows(&self) -> Result<serde_json::Value, LedgerError> {
        let resp = self
            .client
            .get(self.values_url("A:H", ""))
            .bearer_auth(self.config.api_token.expose_secret())
            .send()
            .await
            .map_err(|e| LedgerError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LedgerError::Rejected(format!(
                "values.get returned {}",
                resp.status()
            )));
        }
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Http(e.to_string()))?;
        Ok(data.get("values").cloned().unwrap_or_default())
    }

    async fn write_cell(&self, cell: String, value: &str) -> Result<(), LedgerError> {
        let resp = self
            .client
            .put(self.values_url(&cell, "?valueInputOption=USER_ENTERED"))
            .bearer_auth(self.config.api_token.expose_secret())
            .json(&serde_json::json!({ "values": [[value]] }))
            .send()
            .await
            .map_err(|e| LedgerError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LedgerError::Rejected(format!(
                "values.update returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn locate(&self, protocol: &str) -> Result<usize, LedgerError> {
        let values = self.fetch_rows().await?;
        find_protocol_row(&values, protocol).ok_or_else(|| LedgerError::RowNotFound {
            protocol: protocol.to_string(),
        })
    }
}

#[async_trait]
impl Ledger for SheetsLedger {
    async fn append_row(&self, ticket: &Ticket) -> Result<(), LedgerError> {
        let display = self.catalog.display_name(&ticket.category_key);
        let row = ticket_row(ticket, &display);
        let resp = self
            .client
            .post(self.values_url("A:H", ":append?valueInputOption=USER_ENTERED"))
            .bearer_auth(self.config.api_token.expose_secret())
            .json(&serde_json::json!({ "values": [row] }))
            .send()
            .await
            .map_err(|e| LedgerError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LedgerError::Rejected(format!(
                "values.append returned {}",
                resp.status()
            )));
        }
        debug!(protocol = %ticket.protocol, "Ledger row appended");
        Ok(())
    }

    async fn update_status(
        &self,
        protocol: &str,
        status: TicketStatus,
    ) -> Result<(), LedgerError> {
        let row = self.locate(protocol).await?;
        self.write_cell(format!("{STATUS_COLUMN}{row}"), &status.to_string())
            .await
    }

    async fn append_reply(&self, protocol: &str, text: &str) -> Result<(), LedgerError> {
        let row = self.locate(protocol).await?;
        self.write_cell(format!("{REPLY_COLUMN}{row}"), text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::channels::AttachmentRef;

    fn sample_ticket() -> Ticket {
        Ticket {
            protocol: "20250824-1432".into(),
            conversation_id: 10,
            requester_name: "Ana Silva".into(),
            requester_contact: None,
            category_key: "garantia".into(),
            description: "aparelho com defeito".into(),
            attachments: vec![
                AttachmentRef::new("f1", Some("nota.pdf".into())),
                AttachmentRef::new("f2", None),
            ],
            status: TicketStatus::Open,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn ticket_row_has_eight_columns() {
        let row = ticket_row(&sample_ticket(), "Garantia");
        assert_eq!(row.len(), 8);
        assert_eq!(row[0], "20250824-1432");
        assert_eq!(row[2], "Ana Silva");
        assert_eq!(row[3], "Garantia");
        assert_eq!(row[4], "aparelho com defeito");
        assert_eq!(row[5], "nota.pdf, arquivo");
        assert_eq!(row[6], "Aberto");
        assert_eq!(row[7], "");
    }

    #[test]
    fn find_protocol_row_skips_header() {
        let values = serde_json::json!([
            ["Protocolo", "Data"],
            ["20250824-1400", "24/08/2025 14:00"],
            ["20250824-1432", "24/08/2025 14:32"],
        ]);
        assert_eq!(find_protocol_row(&values, "20250824-1432"), Some(3));
        assert_eq!(find_protocol_row(&values, "20250824-1400"), Some(2));
    }

    #[test]
    fn find_protocol_row_misses_unknown_token() {
        let values = serde_json::json!([
            ["Protocolo"],
            ["20250824-1400"],
        ]);
        assert_eq!(find_protocol_row(&values, "19990101-0000"), None);
    }

    #[test]
    fn find_protocol_row_handles_empty_sheet() {
        assert_eq!(find_protocol_row(&serde_json::json!([]), "x"), None);
        assert_eq!(find_protocol_row(&serde_json::Value::Null, "x"), None);
    }
}
