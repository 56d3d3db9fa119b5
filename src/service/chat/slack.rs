//! Slack transport for duty-desk.
//!
//! Topics are threads in the support channel, keyed by the `ts` of their root
//! message. Employees talk to the bot through direct messages. A closed topic
//! carries a lock reaction on its root and a closing marker in the thread.

use crate::{
    base::{
        config::Config,
        notices::{self, CLOSED_REACTION, THREAD_CLOSED, THREAD_REOPENED},
        types::{MessageRef, Notice, Recipient, Res, Void},
    },
    engine::Engine,
    interaction,
};
use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use slack_morphism::{errors::SlackClientError, prelude::*};
use tracing::{debug, info, instrument, warn};

use std::{ops::Deref, sync::Arc};

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client.
    pub async fn slack(config: &Config) -> Res<Self> {
        let client = SlackChatClient::new(config).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    engine: Engine,
    bot_user_id: String,
    support_channel_id: String,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    pub app_token: SlackApiToken,
    pub bot_token: SlackApiToken,
    pub bot_user_id: String,
    pub support_channel_id: String,
    pub client: Arc<FullClient>,
}

impl Deref for SlackChatClient {
    type Target = FullClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        // Initialize tokens.

        let app_token = SlackApiToken::new(SlackApiTokenValue(config.slack_app_token.clone()));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.slack_bot_token.clone()));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Get the bot's user ID.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;
        let bot_user_id = bot_user.user_id.0;

        info!("Slack bot user ID: {}", bot_user_id);

        Ok(Self {
            app_token,
            bot_token,
            bot_user_id,
            support_channel_id: config.support_channel_id.clone(),
            client,
        })
    }

    /// Posts `text` to a channel, optionally inside a thread.
    async fn post(&self, channel_id: &str, thread_ts: Option<&str>, text: String) -> Res<MessageRef> {
        let message = SlackMessageContent::new().with_text(text);

        let mut request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), message)
            .with_as_user(true)
            .with_link_names(true);

        if let Some(thread_ts) = thread_ts {
            request = request.with_thread_ts(SlackTs(thread_ts.to_string()));
        }

        let session = self.client.open_session(&self.bot_token);

        let response = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(MessageRef {
            channel_id: response.channel.0,
            ts: response.ts.0,
        })
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn start(&self, engine: Engine) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState {
            engine,
            bot_user_id: self.bot_user_id.clone(),
            support_channel_id: self.support_channel_id.clone(),
        }));

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment.clone(),
            socket_mode_callbacks,
        ));

        // Register an app token to listen for events,
        socket_mode_listener.listen_for(&self.app_token).await?;

        // Serve until Ctrl-C.
        socket_mode_listener.serve().await;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_thread(&self, title: &str) -> Res<String> {
        let root = self.post(&self.support_channel_id, None, format!(":question: *Question from {title}*")).await?;

        Ok(root.ts)
    }

    #[instrument(skip(self, notice))]
    async fn notify(&self, recipient: &Recipient, notice: &Notice) -> Res<MessageRef> {
        let text = notices::render(notice);

        match recipient {
            Recipient::Topic(topic_id) => self.post(&self.support_channel_id, Some(topic_id), text).await,
            Recipient::Direct(chat_id) => self.post(chat_id, None, text).await,
        }
    }

    #[instrument(skip(self))]
    async fn close_thread(&self, topic_id: &str) -> Void {
        let request = SlackApiReactionsAddRequest {
            channel: SlackChannelId(self.support_channel_id.clone()),
            name: SlackReactionName(CLOSED_REACTION.to_string()),
            timestamp: SlackTs(topic_id.to_string()),
        };

        let session = self.client.open_session(&self.bot_token);

        match session.reactions_add(&request).await {
            Ok(_) => {}
            Err(SlackClientError::ApiError(ae)) if ae.code == "already_reacted" => debug!("Topic `{}` already marked closed.", topic_id),
            Err(e) => return Err(anyhow::anyhow!("Failed to mark topic closed: {}", e)),
        }

        self.post(&self.support_channel_id, Some(topic_id), THREAD_CLOSED.to_string()).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn reopen_thread(&self, topic_id: &str) -> Void {
        let request = SlackApiReactionsRemoveRequest::new(SlackReactionName(CLOSED_REACTION.to_string()))
            .with_channel(SlackChannelId(self.support_channel_id.clone()))
            .with_timestamp(SlackTs(topic_id.to_string()));

        let session = self.client.open_session(&self.bot_token);

        match session.reactions_remove(&request).await {
            Ok(_) => {}
            Err(SlackClientError::ApiError(ae)) if ae.code == "no_reaction" => debug!("Topic `{}` was not marked closed.", topic_id),
            Err(e) => return Err(anyhow::anyhow!("Failed to mark topic open: {}", e)),
        }

        self.post(&self.support_channel_id, Some(topic_id), THREAD_REOPENED.to_string()).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_message(&self, message: &MessageRef) -> Void {
        let request = SlackApiChatDeleteRequest::new(SlackChannelId(message.channel_id.clone()), SlackTs(message.ts.clone()));

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_delete(&request).await.map_err(|e| anyhow::anyhow!("Failed to delete message: {}", e))?;

        Ok(())
    }
}

// Socket mode listener callbacks for Slack.

/// Where an inbound message should be routed.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    /// A reply inside a topic thread of the support channel.
    Topic { topic_id: String },
    /// A direct message to the bot.
    Direct,
    Ignore,
}

/// Decides how to route a message from its origin.
fn route(support_channel_id: &str, channel_id: Option<&str>, channel_type: Option<&str>, thread_ts: Option<&str>) -> Route {
    match (channel_id, channel_type, thread_ts) {
        (Some(channel), _, Some(thread_ts)) if channel == support_channel_id => Route::Topic { topic_id: thread_ts.to_string() },
        (_, Some("im"), _) => Route::Direct,
        _ => Route::Ignore,
    }
}

/// Handles push events from Slack.
#[instrument(skip_all)]
async fn handle_push_event(event_callback: SlackPushEventCallback, _client: Arc<SlackHyperClient>, states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let event = event_callback.event;
    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    let SlackEventCallbackBody::Message(message) = event else {
        debug!("Received unhandled push event.");
        return Ok(());
    };

    // Edits, joins and other subtypes are not conversation.
    if message.subtype.is_some() || message.sender.bot_id.is_some() {
        return Ok(());
    }

    let Some(user_id) = message.sender.user.as_ref().map(|u| u.0.clone()) else {
        return Ok(());
    };

    if user_id == user_state.bot_user_id {
        return Ok(());
    }

    let text = message.content.as_ref().and_then(|c| c.text.clone()).unwrap_or_default();

    let channel_id = message.origin.channel.as_ref().map(|c| c.0.as_str());
    let channel_type = message.origin.channel_type.as_ref().map(|t| t.0.as_str());
    let thread_ts = message.origin.thread_ts.as_ref().map(|t| t.0.as_str());

    match route(&user_state.support_channel_id, channel_id, channel_type, thread_ts) {
        Route::Topic { topic_id } => {
            info!("Received topic message ...");
            interaction::topic_message::handle_topic_message(user_state.engine.clone(), topic_id, user_id, text);
        }
        Route::Direct => {
            info!("Received direct message ...");
            interaction::employee_message::handle_employee_message(user_state.engine.clone(), user_id, text);
        }
        Route::Ignore => {
            warn!("Skipping message outside the support channel threads and direct messages.");
        }
    }

    Ok(())
}

// Tests.
