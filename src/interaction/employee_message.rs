//! Direct messages from people to the desk.

use tracing::{Instrument, error, instrument};

use crate::{
    base::{
        error::{LifecycleError, Outcome},
        types::{Actor, Notice, Person, Recipient, Void},
    },
    engine::Engine,
};

use super::{command::DirectCommand, report, resolve_sender};

/// Handles a direct message sent to the bot.
///
/// This function spawns a new task to handle the event asynchronously.
#[instrument(skip_all)]
pub fn handle_employee_message(engine: Engine, user_id: String, text: String) {
    tokio::spawn(
        async move {
            // Process the event.
            let result = handle_employee_message_internal(&engine, &user_id, &text).await;

            // Log any errors.
            if let Err(err) = &result {
                error!("Error while handling direct message: {}", err);
            }
        }
        .in_current_span(),
    );
}

/// Internal function to handle a direct message.
#[instrument(skip(engine, text))]
pub async fn handle_employee_message_internal(engine: &Engine, user_id: &str, text: &str) -> Void {
    let Some(person) = resolve_sender(engine, user_id).await else {
        return Ok(());
    };

    match dispatch(engine, &person, text).await {
        Ok(()) => Ok(()),
        Err(err) => report(engine, Recipient::Direct(person.chat_id.clone()), err).await,
    }
}

async fn dispatch(engine: &Engine, person: &Person, text: &str) -> Outcome<()> {
    match DirectCommand::parse(text) {
        None => {
            engine.on_employee_message(person, text).await?;
        }
        Some(DirectCommand::Close) => {
            let token = active_token(engine, person).await?;
            engine.close(&token, &Actor::Employee(person.fullname.clone())).await?;
        }
        Some(DirectCommand::Cancel) => {
            let token = active_token(engine, person).await?;
            engine.cancel(&token, &person.fullname).await?;
        }
        Some(DirectCommand::Reopenable) => {
            let questions = engine.reopenable_for(&person.fullname).await?;
            engine.notify(Recipient::Direct(person.chat_id.clone()), Notice::Reopenable { questions }).await;
        }
    }

    Ok(())
}

async fn active_token(engine: &Engine, person: &Person) -> Outcome<String> {
    let question = engine.active_question(&person.fullname).await?.ok_or_else(|| LifecycleError::NotFound(person.fullname.clone()))?;

    Ok(question.token)
}
