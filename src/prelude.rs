//! Common imports for embedding the desk.

pub use crate::base::{
    config::{Config, ConfigInner, InactivityPolicy},
    error::{LifecycleError, Outcome, ReopenIneligibility},
    types::{Actor, Capability, Err, Person, Question, Res, Status, Void},
};
pub use crate::engine::Engine;
pub use crate::runtime::Runtime;
