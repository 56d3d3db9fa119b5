//! Runtime services and shared state for duty-desk.

use tracing::instrument;

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    engine::Engine,
    service::{chat::ChatClient, db::DbClient},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration, the store, the chat client, and the
/// lifecycle engine built on top of them. It is designed to be trivially
/// cloneable, allowing it to be passed around without the need for `Arc` or
/// `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The database client instance.
    pub db: DbClient,
    /// The chat client instance.
    pub chat: ChatClient,
    /// The lifecycle engine.
    pub engine: Engine,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the database.
        let db = DbClient::surreal(&config).await?;

        // Initialize the slack client.
        let chat = ChatClient::slack(&config).await?;

        Ok(Self::from_parts(config, db, chat))
    }

    /// Assemble a runtime from already constructed services.
    pub fn from_parts(config: Config, db: DbClient, chat: ChatClient) -> Self {
        let engine = Engine::new(config.clone(), db.clone(), chat.clone());

        Self { config, db, chat, engine }
    }

    pub async fn start(&self) -> Void {
        self.chat.start(self.engine.clone()).await
    }
}
