//! Library root for `duty-desk`.
//!
//! Duty-desk routes employee questions to whichever support duty is on shift:
//! - Opens a topic per question and relays messages between the employee and the duty
//! - Tracks each question through open, in progress, closed and cancelled
//! - Escalates questions whose duty has gone quiet
//! - Lets the last duty reopen a recently closed question
//!
//! The desk integrates with Slack for chat and SurrealDB for storage. The
//! architecture is built around extensible traits that allow for different
//! implementations of each service.

pub mod base;
pub mod engine;
pub mod interaction;
pub mod prelude;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::{info, warn};

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the duty-desk runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with database, chat, and engine
/// - Starts the main event loop for processing messages
pub async fn start(config: Config) -> Void {
    info!("Starting duty-desk ...");

    // Start the crypto provider.
    if crypto::ring::default_provider().install_default().is_err() {
        warn!("A crypto provider was already installed.");
    }

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
