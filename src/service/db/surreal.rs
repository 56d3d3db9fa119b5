//! SurrealDB implementation of the desk's store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::{
    Surreal,
    engine::any::{self, Any},
    opt::auth::Root,
};
use tracing::{info, instrument};

use crate::base::{
    config::Config,
    types::{Guard, Party, Person, Question, QuestionUpdate, Res, Void},
};

use super::{DbClient, GenericDbClient};

const SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS question SCHEMALESS;
DEFINE INDEX IF NOT EXISTS question_token ON TABLE question FIELDS token UNIQUE;
DEFINE INDEX IF NOT EXISTS question_topic ON TABLE question FIELDS topic_id UNIQUE;
DEFINE INDEX IF NOT EXISTS question_employee ON TABLE question FIELDS employee_fullname;
DEFINE INDEX IF NOT EXISTS question_status ON TABLE question FIELDS status;
DEFINE TABLE IF NOT EXISTS person SCHEMALESS;
DEFINE TABLE IF NOT EXISTS roster SCHEMALESS;
"#;

// Extra methods on `DbClient` applied by the surreal implementation.

impl DbClient {
    /// Connects to the configured SurrealDB endpoint.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let client = SurrealDbClient::connect(&config.db_endpoint, config.db_username.as_deref(), config.db_password.as_deref()).await?;
        Ok(Self { inner: Arc::new(client) })
    }

    /// Creates a client over a fresh in-memory database.
    pub async fn surreal_memory() -> Res<Self> {
        let client = SurrealDbClient::connect("mem://", None, None).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Records.

/// A roster entry: who is on duty in a division on a given day.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RosterRecord {
    division: String,
    day: String,
    names: Vec<String>,
}

/// Row produced by `count()` aggregations.
#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

// Specific implementations.

/// SurrealDB client implementation.
#[derive(Clone)]
pub struct SurrealDbClient {
    db: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connects, signs in when credentials are given, and defines the schema.
    #[instrument(name = "SurrealDbClient::connect", skip(username, password))]
    pub async fn connect(endpoint: &str, username: Option<&str>, password: Option<&str>) -> Res<Self> {
        let db = any::connect(endpoint).await?;

        if let (Some(username), Some(password)) = (username, password) {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns("duty").use_db("desk").await?;

        db.query(SCHEMA).await?.check()?;

        info!("Database initialized successfully.");

        Ok(Self { db })
    }
}

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    #[instrument(skip(self, question), fields(token = %question.token))]
    async fn insert_question(&self, question: &Question) -> Void {
        self.db
            .query("CREATE type::thing('question', $question_token) CONTENT $question")
            .bind(("question_token", question.token.clone()))
            .bind(("question", question.clone()))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_question(&self, token: &str) -> Res<Option<Question>> {
        let mut response = self.db.query("SELECT * FROM question WHERE token = $question_token").bind(("question_token", token.to_string())).await?;
        let questions: Vec<Question> = response.take(0)?;

        Ok(questions.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn get_question_by_topic(&self, topic_id: &str) -> Res<Option<Question>> {
        let mut response = self.db.query("SELECT * FROM question WHERE topic_id = $topic_id").bind(("topic_id", topic_id.to_string())).await?;
        let questions: Vec<Question> = response.take(0)?;

        Ok(questions.into_iter().next())
    }

    #[instrument(skip(self, expected, update))]
    async fn cas_transition(&self, token: &str, expected: &Guard, update: &QuestionUpdate) -> Res<bool> {
        let mut response = self
            .db
            .query(
                "UPDATE question \
                 SET status = $status, topic_duty_fullname = $duty, last_duty_fullname = $last_duty, end_time = $end_time \
                 WHERE token = $question_token AND status = $expected_status AND topic_duty_fullname = $expected_duty \
                 RETURN AFTER",
            )
            .bind(("question_token", token.to_string()))
            .bind(("expected_status", expected.status))
            .bind(("expected_duty", expected.topic_duty_fullname.clone()))
            .bind(("status", update.status))
            .bind(("duty", update.topic_duty_fullname.clone()))
            .bind(("last_duty", update.last_duty_fullname.clone()))
            .bind(("end_time", update.end_time.map(|t| t.timestamp_millis())))
            .await?;

        let updated: Vec<Question> = response.take(0)?;

        Ok(!updated.is_empty())
    }

    #[instrument(skip(self))]
    async fn list_closed_since(&self, since: DateTime<Utc>) -> Res<Vec<Question>> {
        let mut response = self
            .db
            .query("SELECT * FROM question WHERE status = 'closed' AND end_time >= $since ORDER BY end_time DESC")
            .bind(("since", since.timestamp_millis()))
            .await?;

        Ok(response.take(0)?)
    }

    #[instrument(skip(self))]
    async fn list_active_by_employee(&self, fullname: &str) -> Res<Vec<Question>> {
        let mut response = self
            .db
            .query("SELECT * FROM question WHERE employee_fullname = $fullname AND status INSIDE ['open', 'in_progress']")
            .bind(("fullname", fullname.to_string()))
            .await?;

        Ok(response.take(0)?)
    }

    #[instrument(skip(self))]
    async fn count_questions_since(&self, party: &Party, since: DateTime<Utc>) -> Res<u64> {
        let (query, name) = match party {
            Party::Duty(name) => ("SELECT count() AS count FROM question WHERE last_duty_fullname = $name AND start_time >= $since GROUP ALL", name),
            Party::Employee(name) => ("SELECT count() AS count FROM question WHERE employee_fullname = $name AND start_time >= $since GROUP ALL", name),
        };

        let mut response = self.db.query(query).bind(("name", name.clone())).bind(("since", since.timestamp_millis())).await?;
        let rows: Vec<CountRow> = response.take(0)?;

        Ok(rows.first().map(|r| r.count).unwrap_or_default())
    }

    #[instrument(skip(self, person), fields(user_id = %person.user_id))]
    async fn upsert_person(&self, person: &Person) -> Void {
        self.db
            .query("UPSERT type::thing('person', $user_id) CONTENT $person")
            .bind(("user_id", person.user_id.clone()))
            .bind(("person", person.clone()))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_person(&self, user_id: &str) -> Res<Option<Person>> {
        let mut response = self.db.query("SELECT * FROM person WHERE user_id = $user_id").bind(("user_id", user_id.to_string())).await?;
        let people: Vec<Person> = response.take(0)?;

        Ok(people.into_iter().next())
    }

    #[instrument(skip(self, names))]
    async fn set_roster(&self, division: &str, day: NaiveDate, names: &[String]) -> Void {
        let record = RosterRecord {
            division: division.to_string(),
            day: day.to_string(),
            names: names.to_vec(),
        };

        self.db
            .query("UPSERT type::thing('roster', [$division, $day]) CONTENT $roster")
            .bind(("division", record.division.clone()))
            .bind(("day", record.day.clone()))
            .bind(("roster", record))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_roster(&self, division: &str, day: NaiveDate) -> Res<Option<Vec<String>>> {
        let mut response = self
            .db
            .query("SELECT * FROM roster WHERE division = $division AND day = $day")
            .bind(("division", division.to_string()))
            .bind(("day", day.to_string()))
            .await?;
        let rosters: Vec<RosterRecord> = response.take(0)?;

        Ok(rosters.into_iter().next().map(|r| r.names))
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::types::{Capability, Status};

    fn employee() -> Person {
        Person {
            user_id: "U100".to_string(),
            fullname: "Eve Employee".to_string(),
            chat_id: "D100".to_string(),
            division: "support".to_string(),
            capability: Capability::Employee,
            supervisor: Some("Sam Supervisor".to_string()),
        }
    }

    #[tokio::test]
    async fn cas_only_applies_when_guard_matches() {
        let db = DbClient::surreal_memory().await.unwrap();
        let question = Question::new("Q1", "T1", &employee(), "printer is on fire", Utc::now());
        db.insert_question(&question).await.unwrap();

        let claimed = db.cas_transition("Q1", &question.guard(), &QuestionUpdate::claimed("Alice")).await.unwrap();
        let stale = db.cas_transition("Q1", &question.guard(), &QuestionUpdate::claimed("Bob")).await.unwrap();

        assert!(claimed);
        assert!(!stale);

        let stored = db.get_question("Q1").await.unwrap().unwrap();
        assert_eq!(stored.status, Status::InProgress);
        assert_eq!(stored.topic_duty_fullname.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn clearing_the_owner_round_trips() {
        let db = DbClient::surreal_memory().await.unwrap();
        let mut question = Question::new("Q1", "T1", &employee(), "help", Utc::now());
        db.insert_question(&question).await.unwrap();

        let update = QuestionUpdate::claimed("Alice");
        assert!(db.cas_transition("Q1", &question.guard(), &update).await.unwrap());
        question.apply(&update);

        let update = QuestionUpdate::released(&question);
        assert!(db.cas_transition("Q1", &question.guard(), &update).await.unwrap());

        let stored = db.get_question_by_topic("T1").await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Open);
        assert!(stored.topic_duty_fullname.is_none());
        assert_eq!(stored.last_duty_fullname.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn fetches_questions_by_token() {
        let db = DbClient::surreal_memory().await.unwrap();
        let question = Question::new("Q7", "T7", &employee(), "vpn drops every hour", Utc::now());
        db.insert_question(&question).await.unwrap();

        let stored = db.get_question("Q7").await.unwrap().unwrap();
        assert_eq!(stored.token, "Q7");
        assert_eq!(stored.topic_id, "T7");
        assert_eq!(stored.status, Status::Open);
        assert_eq!(stored.question_text, "vpn drops every hour");
        assert_eq!(stored.start_time.timestamp_millis(), question.start_time.timestamp_millis());

        assert!(db.get_question("Q404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn topics_are_unique() {
        let db = DbClient::surreal_memory().await.unwrap();
        db.insert_question(&Question::new("Q1", "T1", &employee(), "one", Utc::now())).await.unwrap();

        let duplicate = db.insert_question(&Question::new("Q2", "T1", &employee(), "two", Utc::now())).await;

        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn lists_closed_and_active_questions() {
        let db = DbClient::surreal_memory().await.unwrap();
        let now = Utc::now();

        let mut old = Question::new("Q1", "T1", &employee(), "old", now - chrono::Duration::hours(30));
        db.insert_question(&old).await.unwrap();
        let update = QuestionUpdate::closed(&old, now - chrono::Duration::hours(25));
        assert!(db.cas_transition("Q1", &old.guard(), &update).await.unwrap());
        old.apply(&update);

        let recent = Question::new("Q2", "T2", &employee(), "recent", now - chrono::Duration::hours(2));
        db.insert_question(&recent).await.unwrap();
        let update = QuestionUpdate::closed(&recent, now - chrono::Duration::hours(1));
        assert!(db.cas_transition("Q2", &recent.guard(), &update).await.unwrap());

        db.insert_question(&Question::new("Q3", "T3", &employee(), "active", now)).await.unwrap();

        let closed = db.list_closed_since(now - chrono::Duration::hours(24)).await.unwrap();
        assert_eq!(closed.iter().map(|q| q.token.as_str()).collect::<Vec<_>>(), vec!["Q2"]);

        let active = db.list_active_by_employee("Eve Employee").await.unwrap();
        assert_eq!(active.iter().map(|q| q.token.as_str()).collect::<Vec<_>>(), vec!["Q3"]);

        let count = db.count_questions_since(&Party::Employee("Eve Employee".to_string()), now - chrono::Duration::hours(3)).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn directory_and_roster() {
        let db = DbClient::surreal_memory().await.unwrap();
        db.upsert_person(&employee()).await.unwrap();

        assert_eq!(db.get_person("U100").await.unwrap().unwrap().fullname, "Eve Employee");
        assert!(db.get_person("U404").await.unwrap().is_none());

        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        db.set_roster("support", day, &["Sam Supervisor".to_string()]).await.unwrap();
        db.set_roster("support", day, &["Alice Duty".to_string()]).await.unwrap();

        assert_eq!(db.get_roster("support", day).await.unwrap(), Some(vec!["Alice Duty".to_string()]));
        assert!(db.get_roster("sales", day).await.unwrap().is_none());
    }
}
