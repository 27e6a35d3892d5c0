//! # Maildrip Store
//!
//! SQLite persistence for the drip engine: the subscription store with its
//! append-only delivery log, plus a subscriber directory implementation for
//! broadcast audiences. Survives restarts, supports shared access from
//! concurrently running jobs.

pub mod directory;
pub mod store;

pub use directory::SqliteDirectory;
pub use store::SubscriptionStore;
