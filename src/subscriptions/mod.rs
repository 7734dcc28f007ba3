//! Live metric feeds.
//!
//! This module turns store change events into fresh results:
//! - Metric snapshots, recomputed after test case and generation writes
//! - Recent executions, reloaded after execution writes
//!
//! Feeds guarantee:
//! - Recomputes of one scope never overlap
//! - A slower, older recompute never replaces a newer result
//! - Nothing is delivered once `dispose` has returned
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(service);
//!
//! let handle = manager.subscribe_metrics(
//!     &Scope::suite("checkout"),
//!     |snapshot| println!("quality score: {}", snapshot.quality_score),
//!     |error| eprintln!("metrics feed error: {}", error),
//! )?;
//!
//! // ...
//! handle.dispose();
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{ErrorCallback, FeedKind, SubscriptionHandle, SubscriptionId, UpdateCallback};
