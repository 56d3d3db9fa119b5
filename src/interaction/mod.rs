//! Event handling and user interactions for duty-desk.
//!
//! Handlers translate inbound transport events into engine calls and report
//! rejected operations back to the person who attempted them.

pub mod command;
pub mod employee_message;
pub mod topic_message;

use tracing::warn;

use crate::{
    base::{
        error::LifecycleError,
        types::{Notice, Person, Recipient, Void},
    },
    engine::Engine,
};

/// Resolves the sender of an event against the directory.
///
/// Unknown senders are logged and yield `None`.
async fn resolve_sender(engine: &Engine, user_id: &str) -> Option<Person> {
    match engine.db().get_person(user_id).await {
        Ok(Some(person)) => Some(person),
        Ok(None) => {
            warn!("Ignoring message from unknown user `{}`.", user_id);
            None
        }
        Err(err) => {
            warn!("Failed to look up user `{}`: {}", user_id, err);
            None
        }
    }
}

/// Tells the actor why their operation was rejected.
///
/// The notice removes itself after the ephemeral lifetime. Store and transport
/// failures are not reported to the actor; they are returned for the caller to log.
async fn report(engine: &Engine, recipient: Recipient, err: LifecycleError) -> Void {
    match err {
        LifecycleError::Store(err) | LifecycleError::Transport(err) => Err(err),
        err => {
            warn!("Rejected: {}", err);

            engine.notify_ephemeral(recipient, Notice::Rejected { reason: err.to_string() }).await;

            Ok(())
        }
    }
}
