pub mod surreal;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::base::types::{Guard, Party, Person, Question, QuestionUpdate, Res, Void};

// Traits.

/// Generic database client trait that clients must implement.
///
/// This trait covers durable question records, the people directory, and the
/// daily duty roster. Implementing this trait allows different database
/// backends to be used with the desk.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    /// Inserts a new question.
    ///
    /// Fails if the token or the topic is already bound to a question.
    async fn insert_question(&self, question: &Question) -> Void;

    /// Gets a question by its token.
    async fn get_question(&self, token: &str) -> Res<Option<Question>>;

    /// Gets the question bound to a topic.
    async fn get_question_by_topic(&self, topic_id: &str) -> Res<Option<Question>>;

    /// Atomically applies `update` if the question still matches `expected`.
    ///
    /// Returns `false` when the guard no longer holds (or the question is gone);
    /// the check and the write happen in a single statement.
    async fn cas_transition(&self, token: &str, expected: &Guard, update: &QuestionUpdate) -> Res<bool>;

    /// Lists closed questions whose end time is at or after `since`, newest first.
    async fn list_closed_since(&self, since: DateTime<Utc>) -> Res<Vec<Question>>;

    /// Lists the employee's open and in-progress questions.
    async fn list_active_by_employee(&self, fullname: &str) -> Res<Vec<Question>>;

    /// Counts questions involving `party` that started at or after `since`.
    async fn count_questions_since(&self, party: &Party, since: DateTime<Utc>) -> Res<u64>;

    /// Creates or replaces a person in the directory.
    async fn upsert_person(&self, person: &Person) -> Void;

    /// Gets a person by transport user id.
    async fn get_person(&self, user_id: &str) -> Res<Option<Person>>;

    /// Replaces the roster of a division for a day.
    async fn set_roster(&self, division: &str, day: NaiveDate, names: &[String]) -> Void;

    /// Gets the roster of a division for a day, if one was published.
    async fn get_roster(&self, division: &str, day: NaiveDate) -> Res<Option<Vec<String>>>;
}

// Structs.

/// Database client for the desk.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<dyn GenericDbClient>,
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }
}
