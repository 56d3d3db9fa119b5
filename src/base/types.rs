//! Common types shared across the duty desk.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Questions.

/// Lifecycle status of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Closed,
    Cancelled,
}

impl Status {
    /// Whether the question still counts against the employee's single active slot.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Open | Status::InProgress)
    }

    /// The string used for this status in the store.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Closed => "closed",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A support question bound to exactly one topic thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Primary key, stable across the whole lifecycle.
    pub token: String,
    /// The thread bound to this question.
    pub topic_id: String,
    pub employee_fullname: String,
    pub employee_chat_id: String,
    /// Present iff the status is `InProgress`.
    #[serde(default)]
    pub topic_duty_fullname: Option<String>,
    /// The most recent duty to claim the question; kept through release and close.
    #[serde(default)]
    pub last_duty_fullname: Option<String>,
    pub question_text: String,
    pub status: Status,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    /// Present iff the status is `Closed`.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Question {
    /// Creates a fresh, unclaimed question.
    pub fn new(token: impl Into<String>, topic_id: impl Into<String>, employee: &Person, question_text: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            topic_id: topic_id.into(),
            employee_fullname: employee.fullname.clone(),
            employee_chat_id: employee.chat_id.clone(),
            topic_duty_fullname: None,
            last_duty_fullname: None,
            question_text: question_text.into(),
            status: Status::Open,
            start_time,
            end_time: None,
        }
    }

    /// The compare-and-swap guard matching this question's current state.
    pub fn guard(&self) -> Guard {
        Guard {
            status: self.status,
            topic_duty_fullname: self.topic_duty_fullname.clone(),
        }
    }

    /// Applies a transition locally, mirroring what the store writes.
    pub fn apply(&mut self, update: &QuestionUpdate) {
        self.status = update.status;
        self.topic_duty_fullname = update.topic_duty_fullname.clone();
        self.last_duty_fullname = update.last_duty_fullname.clone();
        self.end_time = update.end_time;
    }
}

/// Expected state for an atomic conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub status: Status,
    pub topic_duty_fullname: Option<String>,
}

/// The mutable fields written by a transition.
///
/// Every transition writes all of them, so the status, owner and end time can
/// never disagree with one another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionUpdate {
    pub status: Status,
    pub topic_duty_fullname: Option<String>,
    pub last_duty_fullname: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
}

impl QuestionUpdate {
    pub fn claimed(duty: &str) -> Self {
        Self {
            status: Status::InProgress,
            topic_duty_fullname: Some(duty.to_string()),
            last_duty_fullname: Some(duty.to_string()),
            end_time: None,
        }
    }

    pub fn released(question: &Question) -> Self {
        Self {
            status: Status::Open,
            topic_duty_fullname: None,
            last_duty_fullname: question.last_duty_fullname.clone(),
            end_time: None,
        }
    }

    pub fn closed(question: &Question, now: DateTime<Utc>) -> Self {
        Self {
            status: Status::Closed,
            topic_duty_fullname: None,
            last_duty_fullname: question.last_duty_fullname.clone(),
            end_time: Some(now),
        }
    }

    pub fn reopened(question: &Question) -> Self {
        Self {
            status: Status::Open,
            topic_duty_fullname: None,
            last_duty_fullname: question.last_duty_fullname.clone(),
            end_time: None,
        }
    }

    pub fn cancelled(question: &Question) -> Self {
        Self {
            status: Status::Cancelled,
            topic_duty_fullname: None,
            last_duty_fullname: question.last_duty_fullname.clone(),
            end_time: None,
        }
    }
}

// People.

/// What a person may do, resolved once when they are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Duty,
    Employee,
}

/// A person known to the desk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Transport user id.
    pub user_id: String,
    pub fullname: String,
    /// Where direct notices to this person are delivered.
    pub chat_id: String,
    pub division: String,
    pub capability: Capability,
    /// Whose presence on the roster the person's questions depend on.
    #[serde(default)]
    pub supervisor: Option<String>,
}

impl Person {
    pub fn is_duty(&self) -> bool {
        self.capability == Capability::Duty
    }
}

/// Who is acting on a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Duty(String),
    Employee(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Duty(name) => write!(f, "duty `{name}`"),
            Actor::Employee(name) => write!(f, "employee `{name}`"),
        }
    }
}

/// Whose questions a statistic counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Party {
    Duty(String),
    Employee(String),
}

/// Question counts shown next to claims and new questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuestionStats {
    pub today: u64,
    pub last_month: u64,
}

// Notifications.

/// Why a question was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Duty(String),
    Employee(String),
    Inactivity,
}

/// Where a notice is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// The topic thread of a question.
    Topic(String),
    /// A person's direct chat.
    Direct(String),
}

/// A structured notice; the transport decides how to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NewQuestion { employee: String, text: String, stats: QuestionStats },
    QuestionAccepted { token: String },
    SupervisorUnavailable { supervisor: String },
    Claimed { duty: String, stats: QuestionStats },
    Released { duty: String },
    Closed { reason: CloseReason },
    Reopened { duty: String, text: String },
    Cancelled,
    InactivityReleased,
    Relay { from: String, text: String },
    Rejected { reason: String },
    Reopenable { questions: Vec<Question> },
}

/// A posted message that can later be removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: String,
    pub ts: String,
}

// Tests.
