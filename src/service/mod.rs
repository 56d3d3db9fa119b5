//! Service integrations for external APIs and clients.
//!
//! This module contains the collaborators used by the duty desk:
//! - Chat services (e.g., Slack)
//! - Database services (e.g., SurrealDB)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod db;
