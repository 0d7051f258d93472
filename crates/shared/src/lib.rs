//! Shared foundations for the Annatar addon: configuration, error types and
//! small human-facing formatting helpers used across the workspace.

pub mod config;
pub mod error;
pub mod human;

pub use config::Config;
pub use error::{AppError, AppResult};
