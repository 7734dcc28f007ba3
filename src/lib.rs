//! # Suite Metrics
//!
//! Aggregated quality metrics over test case records, cached and kept
//! fresh as the records change.
//!
//! ## Core Concepts
//!
//! - **Metrics**: Pure aggregation of test cases, AI generations and automation
//! - **Cache**: Time-bounded, suite-invalidated storage of computed aggregates
//! - **Subscriptions**: Push feeds that recompute after store changes, in order
//! - **Reports**: Summaries built from freshly computed aggregates
//! - **Dashboard**: One scope kept fresh by polling or by push updates
//!
//! ## Example
//!
//! ```ignore
//! use suite_metrics::{
//!     DashboardOptions, EngineConfig, MemoryRecordStore, MetricsDashboard, MetricsService,
//!     NewTestCase, CreationType, Scope, SubscriptionManager,
//! };
//!
//! let store = Arc::new(MemoryRecordStore::new());
//! let service = Arc::new(MetricsService::new(store, EngineConfig::default()));
//! let manager = Arc::new(SubscriptionManager::new(service));
//!
//! let dashboard = MetricsDashboard::open(
//!     manager,
//!     Scope::suite("checkout"),
//!     DashboardOptions { enable_realtime: true, ..Default::default() },
//! )?;
//!
//! dashboard.create_test_case(NewTestCase::new("pay by card", CreationType::Manual))?;
//! println!("{:?}", dashboard.state().snapshot);
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod report;
pub mod service;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use cache::{cache_key, AggregateKind, CacheStats, CachedAggregate, MetricsCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use dashboard::{DashboardOptions, DashboardState, MetricsDashboard};
pub use error::{MetricsError, Outcome, Result};
pub use metrics::{AiMetrics, AutomationMetrics, MetricsSnapshot, TestCaseMetrics};
pub use report::{Report, ReportGenerator, ReportKind, ReportSummary};
pub use service::MetricsService;
pub use store::{Collection, ListenerId, MemoryRecordStore, RecordStore, StoreEvent, StoreListener};
pub use subscriptions::{FeedKind, SubscriptionHandle, SubscriptionId, SubscriptionManager};
pub use types::*;
