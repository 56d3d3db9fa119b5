//! Question lifecycle engine.
//!
//! All transitions for a token run under that token's lock and commit through
//! a single compare-and-swap against the store. Side effects on the transport
//! (notices, thread state) happen after the commit and never undo it.
//!
//! | Transition | Requires | Result |
//! |---|---|---|
//! | claim | open, unowned | in progress, timer started |
//! | release | in progress, owned by the duty | open, timer stopped |
//! | close | open or in progress, by the owner or the employee | closed, timer stopped |
//! | reopen | closed, eligible | open |
//! | cancel | open, never claimed, by the employee | cancelled, timer stopped |

pub mod clock;
pub mod locks;
pub mod reopen;
pub mod roster;
pub mod timer;

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Weak},
};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    base::{
        config::{Config, InactivityPolicy},
        error::{LifecycleError, Outcome, Transition},
        types::{Actor, CloseReason, MessageRef, Notice, Party, Person, Question, QuestionStats, QuestionUpdate, Recipient, Status},
    },
    service::{chat::ChatClient, db::DbClient},
};

use clock::{Clock, SystemClock};
use locks::KeyedLocks;
use reopen::ReopenPolicy;
use roster::DutyRoster;
use timer::{Expiry, TimerScheduler};

/// Lock key serializing intake and reopen for one employee.
fn employee_key(fullname: &str) -> String {
    format!("employee:{fullname}")
}

/// Shared engine state.
pub struct EngineInner {
    config: Config,
    db: DbClient,
    chat: ChatClient,
    timers: TimerScheduler,
    locks: KeyedLocks,
    roster: DutyRoster,
    reopen: ReopenPolicy,
    clock: Arc<dyn Clock>,
}

/// The lifecycle engine.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Deref for Engine {
    type Target = EngineInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl EngineInner {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &DbClient {
        &self.db
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }

    pub fn timers(&self) -> &TimerScheduler {
        &self.timers
    }

    pub fn roster(&self) -> &DutyRoster {
        &self.roster
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl Engine {
    /// Creates an engine on the system clock.
    ///
    /// Must be called from within a tokio runtime: the escalation loop for
    /// expired timers is spawned here.
    pub fn new(config: Config, db: DbClient, chat: ChatClient) -> Self {
        Self::with_clock(config, db, chat, Arc::new(SystemClock))
    }

    /// Creates an engine on the given clock.
    pub fn with_clock(config: Config, db: DbClient, chat: ChatClient, clock: Arc<dyn Clock>) -> Self {
        let (engine, expiries) = Self::build(config, db, chat, clock);

        tokio::spawn(escalate(Arc::downgrade(&engine.inner), expiries));

        engine
    }

    /// Creates an engine whose expiries are left to the caller.
    fn build(config: Config, db: DbClient, chat: ChatClient, clock: Arc<dyn Clock>) -> (Self, UnboundedReceiver<Expiry>) {
        let (timers, expiries) = TimerScheduler::new();

        let inner = Arc::new(EngineInner {
            reopen: ReopenPolicy::new(config.reopen_window()),
            roster: DutyRoster::new(db.clone()),
            locks: KeyedLocks::new(),
            config,
            db,
            chat,
            timers,
            clock,
        });

        (Self { inner }, expiries)
    }

    // Lookups.

    /// Gets a question by token.
    pub async fn question(&self, token: &str) -> Outcome<Question> {
        self.db.get_question(token).await?.ok_or_else(|| LifecycleError::NotFound(token.to_string()))
    }

    /// Gets the question bound to a topic; `NotFound` marks an orphaned topic.
    pub async fn question_for_topic(&self, topic_id: &str) -> Outcome<Question> {
        self.db.get_question_by_topic(topic_id).await?.ok_or_else(|| LifecycleError::NotFound(topic_id.to_string()))
    }

    /// The employee's open or in-progress question, if any.
    pub async fn active_question(&self, employee: &str) -> Outcome<Option<Question>> {
        Ok(self.db.list_active_by_employee(employee).await?.into_iter().next())
    }

    /// Closed questions the duty may currently reopen.
    #[instrument(skip(self))]
    pub async fn reopenable_for(&self, duty: &str) -> Outcome<Vec<Question>> {
        let now = self.now();
        let closed = self.db.list_closed_since(now - self.reopen.window()).await?;

        let mut active_by_employee: HashMap<String, Vec<Question>> = HashMap::new();
        let mut result = Vec::new();

        for question in closed {
            if question.last_duty_fullname.as_deref() != Some(duty) {
                continue;
            }

            if !active_by_employee.contains_key(&question.employee_fullname) {
                let active = self.db.list_active_by_employee(&question.employee_fullname).await?;
                active_by_employee.insert(question.employee_fullname.clone(), active);
            }

            let active = &active_by_employee[&question.employee_fullname];
            if self.reopen.check(&question, duty, active, now).is_ok() {
                result.push(question);
            }
        }

        Ok(result)
    }

    /// Question counts for today and the last 30 days.
    pub async fn stats(&self, party: Party) -> QuestionStats {
        let now = self.now();
        let today = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let month = now - Duration::days(30);

        let counts = futures::future::try_join(self.db.count_questions_since(&party, today), self.db.count_questions_since(&party, month)).await;

        match counts {
            Ok((today, last_month)) => QuestionStats { today, last_month },
            Err(err) => {
                warn!("Failed to count questions for {:?}: {}", party, err);
                QuestionStats::default()
            }
        }
    }

    // Intake.

    /// Opens a new question for the employee.
    #[instrument(skip(self, employee, text), fields(employee = %employee.fullname))]
    pub async fn open_question(&self, employee: &Person, text: &str) -> Outcome<Question> {
        let _guard = self.locks.lock(&employee_key(&employee.fullname)).await;

        if !self.db.list_active_by_employee(&employee.fullname).await?.is_empty() {
            return Err(LifecycleError::AlreadyActive(employee.fullname.clone()));
        }

        let stats = self.stats(Party::Employee(employee.fullname.clone())).await;

        let topic_id = self.chat.create_thread(&employee.fullname).await.map_err(LifecycleError::Transport)?;
        let question = Question::new(Uuid::new_v4().simple().to_string(), topic_id, employee, text, self.now());

        if let Err(err) = self.db.insert_question(&question).await {
            // Nothing references the thread; do not leave it open.
            self.close_thread(&question.topic_id).await;
            return Err(err.into());
        }

        info!("Question `{}` opened in topic `{}`.", question.token, question.topic_id);

        self.notify(
            Recipient::Topic(question.topic_id.clone()),
            Notice::NewQuestion {
                employee: employee.fullname.clone(),
                text: question.question_text.clone(),
                stats,
            },
        )
        .await;
        self.notify(Recipient::Direct(employee.chat_id.clone()), Notice::QuestionAccepted { token: question.token.clone() }).await;

        if let Some(supervisor) = &employee.supervisor
            && !self.roster.is_working(supervisor, &employee.division, self.now().date_naive()).await
        {
            self.notify(Recipient::Direct(employee.chat_id.clone()), Notice::SupervisorUnavailable { supervisor: supervisor.clone() }).await;
        }

        Ok(question)
    }

    // Transitions.

    /// A duty takes ownership of an open question.
    #[instrument(skip(self))]
    pub async fn claim(&self, token: &str, duty: &str) -> Outcome<Question> {
        let _guard = self.locks.lock(token).await;
        let question = self.question(token).await?;

        self.claim_locked(question, duty).await
    }

    /// The owning duty hands the question back to the pool.
    #[instrument(skip(self))]
    pub async fn release(&self, token: &str, duty: &str) -> Outcome<Question> {
        let _guard = self.locks.lock(token).await;
        let mut question = self.question(token).await?;

        match (question.status, question.topic_duty_fullname.as_deref()) {
            (Status::InProgress, Some(owner)) if owner == duty => {}
            (Status::InProgress, Some(_)) => return Err(unauthorized(&question, Actor::Duty(duty.to_string()), Transition::Release)),
            (status, _) => return Err(invalid(&question, status, Transition::Release)),
        }

        let update = QuestionUpdate::released(&question);
        self.commit(&mut question, update).await?;
        self.timers.stop(token);

        info!("Question `{}` released by `{}`.", token, duty);

        self.notify_both(&question, Notice::Released { duty: duty.to_string() }).await;

        Ok(question)
    }

    /// The owning duty or the employee closes the question.
    #[instrument(skip(self))]
    pub async fn close(&self, token: &str, actor: &Actor) -> Outcome<Question> {
        let _guard = self.locks.lock(token).await;
        let question = self.question(token).await?;

        if !question.status.is_active() {
            return Err(invalid(&question, question.status, Transition::Close));
        }

        let (authorized, reason) = match actor {
            Actor::Duty(name) => (question.topic_duty_fullname.as_deref() == Some(name.as_str()), CloseReason::Duty(name.clone())),
            Actor::Employee(name) => (question.employee_fullname == *name, CloseReason::Employee(name.clone())),
        };

        if !authorized {
            return Err(unauthorized(&question, actor.clone(), Transition::Close));
        }

        self.close_locked(question, reason).await
    }

    /// The last owning duty reopens a recently closed question.
    #[instrument(skip(self))]
    pub async fn reopen(&self, token: &str, duty: &str) -> Outcome<Question> {
        let _guard = self.locks.lock(token).await;
        let mut question = self.question(token).await?;

        if question.status != Status::Closed {
            return Err(invalid(&question, question.status, Transition::Reopen));
        }

        let _employee_guard = self.locks.lock(&employee_key(&question.employee_fullname)).await;
        let active = self.db.list_active_by_employee(&question.employee_fullname).await?;

        self.reopen.check(&question, duty, &active, self.now()).map_err(|reason| LifecycleError::ReopenIneligible {
            token: token.to_string(),
            reason,
        })?;

        let update = QuestionUpdate::reopened(&question);
        self.commit(&mut question, update).await?;

        info!("Question `{}` reopened by `{}`.", token, duty);

        if let Err(err) = self.chat.reopen_thread(&question.topic_id).await {
            warn!("Failed to reopen topic `{}`: {}", question.topic_id, err);
        }

        self.notify_both(
            &question,
            Notice::Reopened {
                duty: duty.to_string(),
                text: question.question_text.clone(),
            },
        )
        .await;

        Ok(question)
    }

    /// The employee withdraws a question nobody has claimed yet.
    #[instrument(skip(self))]
    pub async fn cancel(&self, token: &str, employee: &str) -> Outcome<Question> {
        let _guard = self.locks.lock(token).await;
        let mut question = self.question(token).await?;

        if question.employee_fullname != employee {
            return Err(unauthorized(&question, Actor::Employee(employee.to_string()), Transition::Cancel));
        }

        let never_claimed = question.status == Status::Open && question.topic_duty_fullname.is_none() && question.end_time.is_none() && question.last_duty_fullname.is_none();
        if !never_claimed {
            return Err(invalid(&question, question.status, Transition::Cancel));
        }

        let update = QuestionUpdate::cancelled(&question);
        self.commit(&mut question, update).await?;
        self.timers.stop(token);

        info!("Question `{}` cancelled by `{}`.", token, employee);

        let notice = self.notify(Recipient::Topic(question.topic_id.clone()), Notice::Cancelled).await;
        self.close_thread(&question.topic_id).await;

        if let Some(notice) = notice {
            self.delete_later(notice);
        }

        Ok(question)
    }

    /// Escalates an elapsed inactivity timer.
    ///
    /// Returns `None` when the expiry was superseded by a restart or stop, or
    /// when the question is no longer in progress.
    #[instrument(skip(self, expiry), fields(token = %expiry.token, generation = expiry.generation))]
    pub async fn expire(&self, expiry: &Expiry) -> Outcome<Option<Question>> {
        let _guard = self.locks.lock(&expiry.token).await;

        if !self.timers.settle(expiry) {
            debug!("Expiry superseded; ignoring.");
            return Ok(None);
        }

        let mut question = self.question(&expiry.token).await?;

        if question.status != Status::InProgress {
            debug!("Question is {}; nothing to escalate.", question.status);
            return Ok(None);
        }

        match self.config.inactivity_policy {
            InactivityPolicy::Close => self.close_locked(question, CloseReason::Inactivity).await.map(Some),
            InactivityPolicy::Release => {
                let update = QuestionUpdate::released(&question);
                self.commit(&mut question, update).await?;

                info!("Question `{}` released after inactivity.", question.token);

                self.notify_both(&question, Notice::InactivityReleased).await;

                Ok(Some(question))
            }
        }
    }

    // Message relay.

    /// Handles a duty writing in a topic: claims unowned questions, relays the
    /// owner's messages, and refuses everyone else.
    #[instrument(skip(self, duty, text), fields(duty = %duty.fullname))]
    pub async fn on_duty_message(&self, topic_id: &str, duty: &Person, text: &str) -> Outcome<Question> {
        let token = self.question_for_topic(topic_id).await?.token;

        let _guard = self.locks.lock(&token).await;
        let question = self.question(&token).await?;

        let question = match (question.status, question.topic_duty_fullname.as_deref()) {
            (Status::Open, None) => self.claim_locked(question, &duty.fullname).await?,
            (Status::InProgress, Some(owner)) if owner == duty.fullname => {
                self.restart_timer(&token);
                question
            }
            (Status::InProgress, Some(_)) => return Err(unauthorized(&question, Actor::Duty(duty.fullname.clone()), Transition::Relay)),
            (status, _) => return Err(invalid(&question, status, Transition::Relay)),
        };

        self.notify(
            Recipient::Direct(question.employee_chat_id.clone()),
            Notice::Relay {
                from: duty.fullname.clone(),
                text: text.to_string(),
            },
        )
        .await;

        Ok(question)
    }

    /// Handles an employee writing to the desk: relays into the active
    /// question's topic, or opens a new question when there is none.
    #[instrument(skip(self, employee, text), fields(employee = %employee.fullname))]
    pub async fn on_employee_message(&self, employee: &Person, text: &str) -> Outcome<Question> {
        let current = match self.active_question(&employee.fullname).await? {
            Some(current) => current,
            None => match self.open_question(employee, text).await {
                // A concurrent message opened the question first; relay into it.
                Err(LifecycleError::AlreadyActive(_)) => self.active_question(&employee.fullname).await?.ok_or_else(|| LifecycleError::NotFound(employee.fullname.clone()))?,
                opened => return opened,
            },
        };

        let _guard = self.locks.lock(&current.token).await;
        let question = self.question(&current.token).await?;

        if !question.status.is_active() {
            return Err(invalid(&question, question.status, Transition::Relay));
        }

        if question.status == Status::InProgress {
            self.restart_timer(&question.token);
        }

        self.notify(
            Recipient::Topic(question.topic_id.clone()),
            Notice::Relay {
                from: employee.fullname.clone(),
                text: text.to_string(),
            },
        )
        .await;

        Ok(question)
    }

    // Transport helpers.

    /// Posts a notice that removes itself after the ephemeral lifetime.
    pub async fn notify_ephemeral(&self, recipient: Recipient, notice: Notice) {
        if let Some(message) = self.notify(recipient, notice).await {
            self.delete_later(message);
        }
    }

    /// Closes a topic thread, logging failures.
    pub async fn close_thread(&self, topic_id: &str) {
        if let Err(err) = self.chat.close_thread(topic_id).await {
            warn!("Failed to close topic `{}`: {}", topic_id, err);
        }
    }

    // Internal.

    async fn claim_locked(&self, mut question: Question, duty: &str) -> Outcome<Question> {
        match (question.status, question.topic_duty_fullname.as_deref()) {
            (Status::Open, None) => {}
            (Status::InProgress, Some(owner)) if owner != duty => return Err(LifecycleError::ConcurrencyConflict(question.token.clone())),
            (status, _) => return Err(invalid(&question, status, Transition::Claim)),
        }

        self.commit(&mut question, QuestionUpdate::claimed(duty)).await?;
        self.start_timer(&question.token);

        info!("Question `{}` claimed by `{}`.", question.token, duty);

        let stats = self.stats(Party::Duty(duty.to_string())).await;
        self.notify_both(&question, Notice::Claimed { duty: duty.to_string(), stats }).await;

        Ok(question)
    }

    async fn close_locked(&self, mut question: Question, reason: CloseReason) -> Outcome<Question> {
        let update = QuestionUpdate::closed(&question, self.now());
        self.commit(&mut question, update).await?;
        self.timers.stop(&question.token);

        info!("Question `{}` closed ({:?}).", question.token, reason);

        self.close_thread(&question.topic_id).await;
        self.notify_both(&question, Notice::Closed { reason }).await;

        Ok(question)
    }

    /// Writes `update` if the stored question still matches what was read.
    async fn commit(&self, question: &mut Question, update: QuestionUpdate) -> Outcome<()> {
        if !self.db.cas_transition(&question.token, &question.guard(), &update).await? {
            return Err(LifecycleError::ConcurrencyConflict(question.token.clone()));
        }

        question.apply(&update);

        Ok(())
    }

    fn start_timer(&self, token: &str) {
        if self.config.timeout_feature_enabled {
            self.timers.start(token, self.config.inactivity_timeout());
        }
    }

    fn restart_timer(&self, token: &str) {
        if self.config.timeout_feature_enabled {
            self.timers.restart(token, self.config.inactivity_timeout());
        }
    }

    /// Delivers a notice, logging failures.
    pub async fn notify(&self, recipient: Recipient, notice: Notice) -> Option<MessageRef> {
        match self.chat.notify(&recipient, &notice).await {
            Ok(message) => Some(message),
            Err(err) => {
                warn!("Failed to deliver {:?} to {:?}: {}", notice, recipient, err);
                None
            }
        }
    }

    async fn notify_both(&self, question: &Question, notice: Notice) {
        futures::join!(
            self.notify(Recipient::Topic(question.topic_id.clone()), notice.clone()),
            self.notify(Recipient::Direct(question.employee_chat_id.clone()), notice),
        );
    }

    fn delete_later(&self, message: MessageRef) {
        let chat = self.chat.clone();
        self.timers.schedule_once(self.config.ephemeral_notice(), async move { chat.delete_message(&message).await });
    }
}

fn unauthorized(question: &Question, actor: Actor, transition: Transition) -> LifecycleError {
    LifecycleError::Unauthorized {
        token: question.token.clone(),
        actor,
        transition,
    }
}

fn invalid(question: &Question, status: Status, transition: Transition) -> LifecycleError {
    LifecycleError::InvalidTransition {
        token: question.token.clone(),
        status,
        transition,
    }
}

/// Drains current expiries and escalates each one.
///
/// Ends once the engine is dropped.
async fn escalate(engine: Weak<EngineInner>, mut expiries: UnboundedReceiver<Expiry>) {
    while let Some(expiry) = expiries.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        let engine = Engine { inner };

        tokio::spawn(
            async move {
                match engine.expire(&expiry).await {
                    Ok(_) => {}
                    Err(err) if err.is_expected() => warn!("Inactivity escalation for `{}` rejected: {}", expiry.token, err),
                    Err(err) => error!("Inactivity escalation for `{}` failed: {}", expiry.token, err),
                }
            }
            .in_current_span(),
        );
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{
            config::ConfigInner,
            types::{Capability, Res, Void},
        },
        service::chat::GenericChatClient,
    };
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Chat {}

        #[async_trait]
        impl GenericChatClient for Chat {
            fn bot_user_id(&self) -> &str;
            async fn start(&self, engine: Engine) -> Void;
            async fn create_thread(&self, title: &str) -> Res<String>;
            async fn notify(&self, recipient: &Recipient, notice: &Notice) -> Res<MessageRef>;
            async fn close_thread(&self, topic_id: &str) -> Void;
            async fn reopen_thread(&self, topic_id: &str) -> Void;
            async fn delete_message(&self, message: &MessageRef) -> Void;
        }
    }

    fn get_mock_chat() -> ChatClient {
        let mut mock = MockChat::new();

        mock.expect_create_thread().returning(|_| Ok("T1".to_string()));
        mock.expect_notify().returning(|_, _| {
            Ok(MessageRef {
                channel_id: "C1".to_string(),
                ts: "1.0".to_string(),
            })
        });
        mock.expect_close_thread().returning(|_| Ok(()));
        mock.expect_reopen_thread().returning(|_| Ok(()));
        mock.expect_delete_message().returning(|_| Ok(()));

        ChatClient::new(Arc::new(mock))
    }

    fn person(user_id: &str, fullname: &str, capability: Capability) -> Person {
        Person {
            user_id: user_id.to_string(),
            fullname: fullname.to_string(),
            chat_id: format!("D_{user_id}"),
            division: "support".to_string(),
            capability,
            supervisor: None,
        }
    }

    /// An engine with a one second timeout whose expiries the test receives itself.
    async fn engine_with_expiries() -> (Engine, UnboundedReceiver<Expiry>) {
        let db = DbClient::surreal_memory().await.unwrap();
        let config = Config::new(ConfigInner {
            inactivity_timeout_seconds: 1,
            ..Default::default()
        })
        .unwrap();

        Engine::build(config, db, get_mock_chat(), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn restart_after_dispatch_keeps_question_in_progress() {
        let (engine, mut expiries) = engine_with_expiries().await;
        let employee = person("U1", "Eve Employee", Capability::Employee);
        let duty = person("U2", "Alice Duty", Capability::Duty);

        let question = engine.open_question(&employee, "The screen flickers.").await.unwrap();
        engine.claim(&question.token, &duty.fullname).await.unwrap();

        // The delay elapsed and the expiry is waiting for the lock.
        let expiry = expiries.recv().await.unwrap();
        assert_eq!(expiry.generation, 0);

        // The duty answers first.
        engine.on_duty_message(&question.topic_id, &duty, "Try another cable.").await.unwrap();
        assert_eq!(engine.timers().generation(&question.token), Some(1));

        assert_eq!(engine.expire(&expiry).await.unwrap(), None);

        let stored = engine.question(&question.token).await.unwrap();
        assert_eq!(stored.status, Status::InProgress);
        assert_eq!(stored.topic_duty_fullname.as_deref(), Some("Alice Duty"));
        assert_eq!(stored.end_time, None);
        assert_eq!(engine.timers().generation(&question.token), Some(1));
    }

    #[tokio::test]
    async fn current_expiry_closes_question_once() {
        let (engine, mut expiries) = engine_with_expiries().await;
        let employee = person("U1", "Eve Employee", Capability::Employee);

        let question = engine.open_question(&employee, "The screen flickers.").await.unwrap();
        engine.claim(&question.token, "Alice Duty").await.unwrap();

        let expiry = expiries.recv().await.unwrap();

        let closed = engine.expire(&expiry).await.unwrap().unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert_eq!(closed.topic_duty_fullname, None);
        assert!(closed.end_time.is_some());
        assert!(engine.timers().is_empty());

        // Delivered twice, acted on once.
        assert_eq!(engine.expire(&expiry).await.unwrap(), None);
    }
}
