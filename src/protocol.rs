//! Protocol token generation.
//!
//! The base token is a local date-time at minute resolution
//! (`YYYYMMDD-HHmm`) — that format is part of the email-subject contract
//! the team replies against. Minute granularity alone is not unique, so
//! the generator keeps a per-minute counter and suffixes the second and
//! later tokens of the same minute with `-NN`. The registry independently
//! rejects duplicate registration.

use std::sync::Mutex;

use chrono::{DateTime, Local};

/// Format string for the base token.
const STAMP_FORMAT: &str = "%Y%m%d-%H%M";

#[derive(Debug, Default)]
struct GenState {
    last_stamp: String,
    issued_in_minute: u32,
}

/// Issues locally-unique protocol tokens.
#[derive(Debug, Default)]
pub struct ProtocolGenerator {
    state: Mutex<GenState>,
}

impl ProtocolGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next token for the current wall clock.
    pub fn generate(&self) -> String {
        self.generate_at(Local::now())
    }

    /// Generate the next token for an explicit instant (testable seam).
    pub fn generate_at(&self, now: DateTime<Local>) -> String {
        let stamp = now.format(STAMP_FORMAT).to_string();
        let mut state = self.state.lock().expect("protocol generator lock");
        if state.last_stamp == stamp {
            state.issued_in_minute += 1;
            format!("{stamp}-{:02}", state.issued_in_minute)
        } else {
            state.last_stamp = stamp.clone();
            state.issued_in_minute = 1;
            stamp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;

    fn instant(minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 8, 24, 14, minute, 0).unwrap()
    }

    #[test]
    fn base_token_matches_documented_format() {
        let generator = ProtocolGenerator::new();
        let token = generator.generate_at(instant(32));
        assert_eq!(token, "20250824-1432");
        let pattern = Regex::new(r"^\d{8}-\d{4}$").unwrap();
        assert!(pattern.is_match(&token));
    }

    #[test]
    fn same_minute_tokens_are_distinct() {
        let generator = ProtocolGenerator::new();
        let first = generator.generate_at(instant(32));
        let second = generator.generate_at(instant(32));
        let third = generator.generate_at(instant(32));
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(second, "20250824-1432-02");
        assert_eq!(third, "20250824-1432-03");
    }

    #[test]
    fn counter_resets_on_new_minute() {
        let generator = ProtocolGenerator::new();
        let _ = generator.generate_at(instant(32));
        let _ = generator.generate_at(instant(32));
        let next_minute = generator.generate_at(instant(33));
        assert_eq!(next_minute, "20250824-1433");
    }

    #[test]
    fn suffixed_token_matches_extraction_pattern() {
        let generator = ProtocolGenerator::new();
        let _ = generator.generate_at(instant(32));
        let suffixed = generator.generate_at(instant(32));
        let pattern = Regex::new(r"^\d{8}-\d{4}(?:-\d{2})?$").unwrap();
        assert!(pattern.is_match(&suffixed));
    }
}
