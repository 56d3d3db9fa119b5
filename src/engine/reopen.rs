//! Which closed questions may be reopened, and by whom.
//!
//! The same check backs both [`Engine::reopen`](super::Engine::reopen) and the
//! reopenable listing, so both give the same answer for the same store state.

use chrono::{DateTime, Duration, Utc};

use crate::base::{
    error::ReopenIneligibility,
    types::{Question, Status},
};

/// Reopen rules for closed questions.
#[derive(Debug, Clone, Copy)]
pub struct ReopenPolicy {
    window: Duration,
}

impl ReopenPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Checks a closed question against the reopen criteria.
    ///
    /// `active` are the employee's open and in-progress questions. Criteria are
    /// checked in order: the requesting duty, the employee's other questions,
    /// then the window.
    pub fn check(&self, question: &Question, duty: &str, active: &[Question], now: DateTime<Utc>) -> Result<(), ReopenIneligibility> {
        if question.last_duty_fullname.as_deref() != Some(duty) {
            return Err(ReopenIneligibility::WrongDuty);
        }

        if active.iter().any(|q| q.token != question.token && q.status.is_active()) {
            return Err(ReopenIneligibility::EmployeeHasActiveQuestion);
        }

        if !self.within_window(question, now) {
            return Err(ReopenIneligibility::WindowExpired);
        }

        Ok(())
    }

    /// Whether the question closed no longer than the window ago.
    pub fn within_window(&self, question: &Question, now: DateTime<Utc>) -> bool {
        match (question.status, question.end_time) {
            (Status::Closed, Some(end_time)) => now - end_time <= self.window,
            _ => false,
        }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::types::{Capability, Person, QuestionUpdate};

    fn employee() -> Person {
        Person {
            user_id: "U1".to_string(),
            fullname: "Eve Employee".to_string(),
            chat_id: "D1".to_string(),
            division: "support".to_string(),
            capability: Capability::Employee,
            supervisor: None,
        }
    }

    fn closed_by(duty: &str, token: &str, at: DateTime<Utc>) -> Question {
        let mut question = Question::new(token, format!("T-{token}"), &employee(), "help", at - Duration::hours(1));
        question.apply(&QuestionUpdate::claimed(duty));
        question.apply(&QuestionUpdate::closed(&question.clone(), at));
        question
    }

    fn policy() -> ReopenPolicy {
        ReopenPolicy::new(Duration::hours(24))
    }

    #[test]
    fn window_boundary() {
        let closed_at = Utc::now();
        let question = closed_by("Alice", "Q1", closed_at);

        let just_inside = closed_at + Duration::hours(24) - Duration::seconds(1);
        let just_outside = closed_at + Duration::hours(24) + Duration::seconds(1);

        assert_eq!(policy().check(&question, "Alice", &[], just_inside), Ok(()));
        assert_eq!(policy().check(&question, "Alice", &[], just_outside), Err(ReopenIneligibility::WindowExpired));
    }

    #[test]
    fn only_the_last_duty_may_reopen() {
        let closed_at = Utc::now();
        let question = closed_by("Alice", "Q1", closed_at);

        assert_eq!(policy().check(&question, "Bob", &[], closed_at), Err(ReopenIneligibility::WrongDuty));
    }

    #[test]
    fn never_claimed_questions_cannot_be_reopened() {
        let now = Utc::now();
        let mut question = Question::new("Q1", "T1", &employee(), "help", now);
        question.apply(&QuestionUpdate::closed(&question.clone(), now));

        assert_eq!(policy().check(&question, "Alice", &[], now), Err(ReopenIneligibility::WrongDuty));
    }

    #[test]
    fn another_active_question_blocks_reopen() {
        let closed_at = Utc::now();
        let question = closed_by("Alice", "Q1", closed_at);
        let other = Question::new("Q2", "T2", &employee(), "another", closed_at);

        assert_eq!(
            policy().check(&question, "Alice", &[other], closed_at + Duration::hours(1)),
            Err(ReopenIneligibility::EmployeeHasActiveQuestion)
        );
    }

    #[test]
    fn open_questions_are_never_within_window() {
        let question = Question::new("Q1", "T1", &employee(), "help", Utc::now());

        assert!(!policy().within_window(&question, Utc::now()));
    }
}
