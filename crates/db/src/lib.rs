//! Redis-backed storage and messaging for the Annatar addon.
//!
//! Everything cross-task lives here: the connection wrapper, the uniform
//! key layout, the scored torrent corpus (ODM), and the best-effort pub/sub
//! bus. The ODM is the system of record; the bus only wakes listeners up.

pub mod events;
pub mod keys;
pub mod odm;
pub mod pubsub;
pub mod redis;

pub use keys::Keys;
pub use self::redis::{CacheTtl, Db, ScoredItem};

/// Register every metric this crate owns with the given registry.
pub fn register_metrics(registry: &prometheus::Registry) -> anyhow::Result<()> {
    redis::register_metrics(registry)?;
    pubsub::register_metrics(registry)?;
    Ok(())
}
