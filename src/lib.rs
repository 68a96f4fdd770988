//! CAR intake bot — ticket correlation and conversation-state engine.

pub mod catalog;
pub mod channels;
pub mod classify;
pub mod config;
pub mod contacts;
pub mod correlate;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod summarize;
