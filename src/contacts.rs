//! Contact directory — persisted per-sender record.
//!
//! Keyed by the stable sender id. The display name is refreshed on every
//! inbound event; the contact email is captured once during the
//! `awaiting_contact_email` phase and pre-fills later intakes.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub display_name: String,
    pub contact_email: Option<String>,
}

#[derive(Debug, Default)]
pub struct ContactDirectory {
    inner: Mutex<HashMap<i64, ContactRecord>>,
}

impl ContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh the display name, preserving a stored email.
    pub fn upsert_name(&self, sender_id: i64, display_name: &str) {
        let mut inner = self.inner.lock().expect("contacts lock");
        inner
            .entry(sender_id)
            .and_modify(|r| r.display_name = display_name.to_string())
            .or_insert_with(|| ContactRecord {
                display_name: display_name.to_string(),
                contact_email: None,
            });
    }

    /// Store the contact email for a sender.
    pub fn set_email(&self, sender_id: i64, email: &str) {
        let mut inner = self.inner.lock().expect("contacts lock");
        inner
            .entry(sender_id)
            .and_modify(|r| r.contact_email = Some(email.to_string()))
            .or_insert_with(|| ContactRecord {
                display_name: String::new(),
                contact_email: Some(email.to_string()),
            });
    }

    pub fn get(&self, sender_id: i64) -> Option<ContactRecord> {
        self.inner
            .lock()
            .expect("contacts lock")
            .get(&sender_id)
            .cloned()
    }

    pub fn email_of(&self, sender_id: i64) -> Option<String> {
        self.get(sender_id).and_then(|r| r.contact_email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_name_creates_and_refreshes() {
        let contacts = ContactDirectory::new();
        contacts.upsert_name(7, "Ana");
        assert_eq!(contacts.get(7).unwrap().display_name, "Ana");
        contacts.upsert_name(7, "Ana Silva");
        assert_eq!(contacts.get(7).unwrap().display_name, "Ana Silva");
    }

    #[test]
    fn name_refresh_preserves_email() {
        let contacts = ContactDirectory::new();
        contacts.upsert_name(7, "Ana");
        contacts.set_email(7, "ana@example.com");
        contacts.upsert_name(7, "Ana S.");
        assert_eq!(contacts.email_of(7).as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn email_of_unknown_sender_is_none() {
        let contacts = ContactDirectory::new();
        assert!(contacts.email_of(99).is_none());
        assert!(contacts.get(99).is_none());
    }
}
