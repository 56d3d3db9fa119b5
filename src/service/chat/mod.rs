pub mod slack;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::{
    base::types::{MessageRef, Notice, Recipient, Res, Void},
    engine::Engine,
};

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the transport side of the desk: topic threads, direct
/// messages to people, and the inbound event listener. Implementing this trait
/// allows different chat services to be used with the desk.
///
/// The engine treats every outbound call as fire-and-forget: a failure is
/// logged and never rolls back a committed transition.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Get the bot user ID.
    ///
    /// Returns the unique identifier for the bot in the chat platform, which is
    /// used to ignore the bot's own messages.
    fn bot_user_id(&self) -> &str;

    /// Start the chat client listener.
    ///
    /// This sets up event listeners for the chat platform and routes incoming
    /// messages into the engine.
    async fn start(&self, engine: Engine) -> Void;

    /// Open a new topic thread and return its id.
    async fn create_thread(&self, title: &str) -> Res<String>;

    /// Deliver a notice to a topic or a person.
    async fn notify(&self, recipient: &Recipient, notice: &Notice) -> Res<MessageRef>;

    /// Mark a topic thread as closed.
    async fn close_thread(&self, topic_id: &str) -> Void;

    /// Mark a closed topic thread as open again.
    async fn reopen_thread(&self, topic_id: &str) -> Void;

    /// Remove a previously posted message.
    async fn delete_message(&self, message: &MessageRef) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
