//! Core components, types, and utilities for the duty desk.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Notice templates rendered by transports.
//! - Common types, lifecycle outcomes, and result handling.

pub mod config;
pub mod error;
pub mod notices;
pub mod types;
