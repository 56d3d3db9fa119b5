//! Typed outcomes of lifecycle operations.
//!
//! Every variant except [`LifecycleError::Store`] and
//! [`LifecycleError::Transport`] is an expected outcome that callers report
//! back to the acting person. `Store` wraps store connectivity failures and
//! `Transport` wraps chat failures that abort an operation; both leave the
//! question untouched.

use std::fmt;

use thiserror::Error;

use super::types::{Actor, Status};

/// Which reopen criterion a closed question failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenIneligibility {
    /// The question was closed longer ago than the reopen window.
    WindowExpired,
    /// The employee already has another open or in-progress question.
    EmployeeHasActiveQuestion,
    /// The requesting duty did not own the question when it closed.
    WrongDuty,
}

impl fmt::Display for ReopenIneligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReopenIneligibility::WindowExpired => "the reopen window has expired",
            ReopenIneligibility::EmployeeHasActiveQuestion => "the employee has another active question",
            ReopenIneligibility::WrongDuty => "the question belonged to another duty",
        };

        f.write_str(text)
    }
}

/// The lifecycle transitions, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Release,
    Close,
    Reopen,
    Cancel,
    Relay,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Transition::Claim => "claim",
            Transition::Release => "release",
            Transition::Close => "close",
            Transition::Reopen => "reopen",
            Transition::Cancel => "cancel",
            Transition::Relay => "relay a message on",
        };

        f.write_str(text)
    }
}

/// Outcome of a rejected lifecycle operation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No question matches the token or topic.
    #[error("no question found for `{0}`")]
    NotFound(String),
    /// The actor may not act on this question.
    #[error("{actor} may not {transition} question `{token}`")]
    Unauthorized { token: String, actor: Actor, transition: Transition },
    /// The question is not in a state that allows the transition.
    #[error("cannot {transition} question `{token}` while it is {status}")]
    InvalidTransition { token: String, status: Status, transition: Transition },
    /// Someone else changed the question first.
    #[error("question `{0}` was changed by someone else first")]
    ConcurrencyConflict(String),
    /// The question is closed but may not be reopened.
    #[error("question `{token}` cannot be reopened: {reason}")]
    ReopenIneligible { token: String, reason: ReopenIneligibility },
    /// The employee already has an open or in-progress question.
    #[error("employee `{0}` already has an active question")]
    AlreadyActive(String),
    /// The store could not be reached.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    /// The chat transport failed where the operation cannot go on without it.
    #[error("chat transport failed: {0}")]
    Transport(anyhow::Error),
}

impl LifecycleError {
    /// Whether this is an expected outcome rather than an infrastructure failure.
    pub fn is_expected(&self) -> bool {
        !matches!(self, LifecycleError::Store(_) | LifecycleError::Transport(_))
    }
}

/// Result of a lifecycle operation.
pub type Outcome<T> = Result<T, LifecycleError>;
