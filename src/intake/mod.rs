//! Guided ticket intake — conversation phases and the step machine.

pub mod machine;
pub mod state;


pub use machine::{IntakeDeps, IntakeMachine, INTAKE_TRIGGER};
pub use state::{ConversationState, ConversationStore, PendingTicket, Phase};
