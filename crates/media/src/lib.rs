//! Canonical media metadata lookups.
//!
//! The addon never guesses what a title is called; it asks the Cinemeta
//! catalog and caches the answer for a month.

mod cinemeta;

pub use cinemeta::{CinemetaClient, MediaInfo};

/// Register every metric this crate owns with the given registry.
pub fn register_metrics(registry: &prometheus::Registry) -> anyhow::Result<()> {
    cinemeta::register_metrics(registry)
}
