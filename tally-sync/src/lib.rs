//! # tally-sync: Multi-device scan synchronization
//!
//! Network side of an inventory count. Every device (host or guest) runs
//! one [`SessionManager`] over the same three collaborators:
//!
//! ```text
//!   scan ──► ScanSubmitter ──HTTP──► server ──broadcast──┐
//!                                                       │ ItemConfirmed
//!   SessionManager ── join_group(sessionId) ──► HubClient ◄┘
//!        │                                         │
//!        │ start / join / finish (HTTP)            │ confirmation pump
//!        ▼                                         ▼
//!   InventoryApi                           StoreHandle (scanned set)
//! ```
//!
//! The scanned set changes only through the broadcast, so the device that
//! scanned and every other participant converge on the same count.
//!
//! ## Modules
//!
//! - [`api`]: HTTP collaborators behind the [`InventoryApi`] trait
//! - [`auth`]: access token source
//! - [`config`]: endpoints, timeouts and reconnect policy
//! - [`error`]: error taxonomy
//! - [`hub`]: realtime channel client and its wire protocol
//! - [`scan`]: scan submission
//! - [`session`]: session lifecycle and the confirmation pump
//! - [`store`]: shared handle to the reconciliation store

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod scan;
pub mod session;
pub mod store;

pub use api::{HttpInventoryApi, InventoryApi};
pub use auth::{StaticToken, TokenProvider};
pub use config::{ApiConfig, HubConfig, ReconnectPolicy, SessionConfig, TallyConfig};
pub use error::{
    ApiError, CatalogLoadError, ChannelError, FinishFailure, SessionError, SubmissionError,
};
pub use hub::{ConnectionState, HubClient, Subscription};
pub use scan::{normalize_scan_code, ScanSubmitter};
pub use session::{
    ActiveSession, ItemConfirmed, JoinedSession, SessionManager, SessionRole, SessionState,
    SessionTicket,
};
pub use store::StoreHandle;
