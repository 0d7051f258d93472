//! Background search pipeline.
//!
//! Stream requests fan out to one worker pool per indexer; every raw hit is
//! republished for the torrent processors, which resolve info-hashes, score
//! releases and persist them into the corpus.

pub mod client;
pub mod processor;
pub mod worker;

pub use client::{JackettClient, SearchResult};
pub use processor::TorrentProcessor;
pub use worker::IndexerWorker;

/// Register every metric this crate owns with the given registry.
pub fn register_metrics(registry: &prometheus::Registry) -> anyhow::Result<()> {
    client::register_metrics(registry)
}
