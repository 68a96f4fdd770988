//! Team notification — outbound SMTP and the inbound reply poller.

pub mod mailer;
pub mod poller;

pub use mailer::{Notifier, SmtpNotifier, notification_body, notification_subject};
pub use poller::spawn_reply_poller;
