//! Messages written by duties inside a topic thread.

use tracing::{Instrument, debug, error, instrument, warn};

use crate::{
    base::{
        error::{LifecycleError, Outcome},
        types::{Actor, Person, Question, Recipient, Void},
    },
    engine::Engine,
};

use super::{command::TopicCommand, report, resolve_sender};

/// Handles a message posted in a topic thread.
///
/// This function spawns a new task to handle the event asynchronously.
#[instrument(skip_all)]
pub fn handle_topic_message(engine: Engine, topic_id: String, user_id: String, text: String) {
    tokio::spawn(
        async move {
            // Process the event.
            let result = handle_topic_message_internal(&engine, &topic_id, &user_id, &text).await;

            // Log any errors.
            if let Err(err) = &result {
                error!("Error while handling topic message: {}", err);
            }
        }
        .in_current_span(),
    );
}

/// Internal function to handle a topic message.
#[instrument(skip(engine, text))]
pub async fn handle_topic_message_internal(engine: &Engine, topic_id: &str, user_id: &str, text: &str) -> Void {
    let Some(duty) = resolve_sender(engine, user_id).await else {
        return Ok(());
    };

    if !duty.is_duty() {
        warn!("Ignoring topic message from `{}`, who is not a duty.", duty.fullname);
        return Ok(());
    }

    match dispatch(engine, topic_id, &duty, text).await {
        Ok(question) => {
            debug!("Question `{}` is {}.", question.token, question.status);
            Ok(())
        }
        Err(LifecycleError::NotFound(_)) => {
            error!("Topic `{}` has no question behind it; closing the thread.", topic_id);
            engine.close_thread(topic_id).await;
            Ok(())
        }
        Err(err) => report(engine, Recipient::Topic(topic_id.to_string()), err).await,
    }
}

async fn dispatch(engine: &Engine, topic_id: &str, duty: &Person, text: &str) -> Outcome<Question> {
    let Some(command) = TopicCommand::parse(text) else {
        return engine.on_duty_message(topic_id, duty, text).await;
    };

    let token = engine.question_for_topic(topic_id).await?.token;

    match command {
        TopicCommand::Close => engine.close(&token, &Actor::Duty(duty.fullname.clone())).await,
        TopicCommand::Release => engine.release(&token, &duty.fullname).await,
        TopicCommand::Reopen => engine.reopen(&token, &duty.fullname).await,
    }
}
