//! # tally-core: Domain model for multi-device inventory counts
//!
//! Pure, I/O-free building blocks shared by every participant of a count:
//!
//! ```text
//! ┌──────────────┐   ItemConfirmed   ┌─────────────────────┐
//! │ realtime hub │ ────────────────► │ ReconciliationStore │
//! └──────────────┘   (broadcast)     │  catalog + scanned  │
//!                                    └──────────┬──────────┘
//!                                               │ pure projection
//!                                               ▼
//!                                    ┌─────────────────────┐
//!                                    │ DerivedView         │
//!                                    │ CompletionReport    │
//!                                    └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`ids`]: strongly typed server identifiers
//! - [`catalog`]: categories and items of a zone (read-only master data)
//! - [`store`]: the scanned set, its derived view and completion math
//! - [`outcome`]: server classification of a scan and its user feedback
//! - [`condition`]: physical condition choices attached to a scan

pub mod ids;
pub mod catalog;
pub mod store;
pub mod outcome;
pub mod condition;

pub use ids::{CategoryId, ItemId, OperatingGroupId, SessionId, StateId, ZoneId};
pub use catalog::{CatalogCategory, CatalogItem};
pub use store::{CategoryView, CompletionReport, DerivedView, ItemView, ReconciliationStore};
pub use outcome::{Feedback, FeedbackTone, ScanOutcome, ScanResponse, ScanStatus};
pub use condition::{default_conditions, ItemCondition};
