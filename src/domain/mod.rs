//! Domain layer types for the inbox assistant.
//!
//! These are plain values passed between the model, the provider and the
//! orchestrator. None of them are persisted.

mod decision;
mod email;
mod types;

pub use decision::{Action, CategoryDecision, UnknownAction};
pub use email::{make_preview, Email, Sender, PREVIEW_LEN};
pub use types::EmailId;
