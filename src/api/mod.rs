//! API clients for external services
//!
//! - Debrid: magnet submission, polling, file selection, link unrestriction

pub mod debrid;
pub mod error;

pub use debrid::{AccountStatus, DebridClient};
pub use error::DebridError;
