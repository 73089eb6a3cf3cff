//! Session lifecycle: start, join by invitation code, finish.
//!
//! ```text
//!          start_session / join_session
//!   Idle ────────────────────────────────► Active
//!    ▲                                       │
//!    └──────── finish_session / reset ───────┘
//! ```
//!
//! [`SessionManager`] composes the other pieces: it owns the session
//! identity, points the [`StoreHandle`] at the session's zone, joins the
//! session group on the [`HubClient`], and runs the pump that feeds
//! `ItemConfirmed` broadcasts into the store. The pump is the only writer
//! of the scanned set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use tally_core::{
    CompletionReport, ItemId, OperatingGroupId, ScanOutcome, ScanStatus, SessionId, StateId,
    ZoneId,
};

use crate::api::{FinishRequest, InventoryApi, JoinRequest, StartRequest};
use crate::config::SessionConfig;
use crate::error::{ApiError, FinishFailure, SessionError};
use crate::hub::{HubClient, Subscription};
use crate::scan::ScanSubmitter;
use crate::store::StoreHandle;

const INVALID_CODE: &str = "Invalid invitation code.";
const JOIN_FAILED: &str = "The server could not process the join request.";

/// Broadcast sent to the session group when the server accepts a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemConfirmed {
    pub item_id: ItemId,
    #[serde(default, alias = "stateItemId")]
    pub state_id: Option<StateId>,
    #[serde(default, alias = "inventaryId")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub status: Option<ScanStatus>,
}

impl ItemConfirmed {
    /// Whether this event belongs in the scanned set of `active`.
    ///
    /// Events without a session id count only when `trust_untagged` holds,
    /// i.e. the connection cannot still be in an earlier session's group.
    pub fn applies_to(&self, active: SessionId, trust_untagged: bool) -> bool {
        let same_session = match self.session_id {
            Some(id) => id == active,
            None => trust_untagged,
        };
        let accepted = self.status.is_none_or(|s| s == ScanStatus::Correct);
        same_session && accepted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRole {
    /// Created the session; holds the code guests use to join.
    Host { invitation_code: Option<String> },
    Guest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub zone_id: ZoneId,
    pub operating_group_id: Option<OperatingGroupId>,
    pub role: SessionRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Active(ActiveSession),
}

impl SessionState {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionState::Idle => None,
            SessionState::Active(active) => Some(active.session_id),
        }
    }
}

/// Result of [`SessionManager::start_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub session_id: SessionId,
    pub invitation_code: Option<String>,
}

/// Result of [`SessionManager::join_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedSession {
    pub zone_id: ZoneId,
    pub session_id: SessionId,
}

/// Trim and upper-case a typed invitation code.
pub fn normalize_invitation_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

pub struct SessionManager {
    api: Arc<dyn InventoryApi>,
    channel: Arc<HubClient>,
    store: StoreHandle,
    scans: ScanSubmitter,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    /// Held across start, join and finish.
    lifecycle: AsyncMutex<()>,
    /// Set once a session has been left; the server never removes the
    /// connection from that group.
    left_session: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn InventoryApi>,
        channel: Arc<HubClient>,
        store: StoreHandle,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            scans: ScanSubmitter::new(Arc::clone(&api)),
            api,
            channel,
            store,
            config,
            state,
            lifecycle: AsyncMutex::new(()),
            left_session: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn channel(&self) -> &Arc<HubClient> {
        &self.channel
    }

    pub fn has_active_session(&self) -> bool {
        self.state.borrow().session_id().is_some()
    }

    pub fn active_session(&self) -> Option<ActiveSession> {
        match &*self.state.borrow() {
            SessionState::Active(active) => Some(active.clone()),
            SessionState::Idle => None,
        }
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Open a new session as host.
    pub async fn start_session(
        &self,
        zone_id: ZoneId,
        operating_group_id: OperatingGroupId,
    ) -> Result<SessionTicket, SessionError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.ensure_idle()?;
        self.ensure_pump();

        let response = self
            .api
            .start(StartRequest {
                zone_id,
                operating_group_id,
            })
            .await
            .map_err(|e| {
                log::warn!("Could not start inventory for zone {zone_id}: {e}");
                SessionError::SessionCreate(e.server_message().unwrap_or_else(|| e.to_string()))
            })?;
        let session_id = response
            .session_id
            .ok_or_else(|| SessionError::SessionCreate("server returned no session id".into()))?;

        self.activate(ActiveSession {
            session_id,
            zone_id,
            operating_group_id: Some(operating_group_id),
            role: SessionRole::Host {
                invitation_code: response.invitation_code.clone(),
            },
        })?;
        log::info!("Inventory {session_id} started for zone {zone_id}");

        self.enter(session_id, zone_id).await;
        Ok(SessionTicket {
            session_id,
            invitation_code: response.invitation_code,
        })
    }

    /// Join a running session as guest.
    ///
    /// A rejected code leaves the manager untouched.
    pub async fn join_session(&self, invitation_code: &str) -> Result<JoinedSession, SessionError> {
        let code = normalize_invitation_code(invitation_code);
        if code.is_empty() {
            return Err(SessionError::InvalidCode(INVALID_CODE.into()));
        }
        let _lifecycle = self.lifecycle.lock().await;
        self.ensure_idle()?;
        self.ensure_pump();

        let response = self
            .api
            .join(JoinRequest {
                invitation_code: code.clone(),
            })
            .await
            .map_err(|e| {
                log::warn!("Join with code {code} failed: {e}");
                join_error(&e)
            })?;

        self.activate(ActiveSession {
            session_id: response.session_id,
            zone_id: response.zone_id,
            operating_group_id: None,
            role: SessionRole::Guest,
        })?;
        log::info!(
            "Joined inventory {} in zone {}",
            response.session_id,
            response.zone_id
        );

        self.enter(response.session_id, response.zone_id).await;
        Ok(JoinedSession {
            zone_id: response.zone_id,
            session_id: response.session_id,
        })
    }

    /// Close the active session on the server and return to idle.
    pub async fn finish_session(&self, observations: &str) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock().await;
        let session_id = self
            .state
            .borrow()
            .session_id()
            .ok_or(SessionError::NoActiveSession)?;

        self.api
            .finish(FinishRequest {
                session_id,
                observations: observations.trim().to_string(),
            })
            .await
            .map_err(|e| {
                log::warn!("Could not finish inventory {session_id}: {e}");
                finish_error(&e)
            })?;

        self.leave(session_id).await;
        log::info!("Inventory {session_id} finished");
        Ok(())
    }

    /// Drop the local session without telling the server.
    pub async fn reset(&self) {
        let previous = self.state.send_replace(SessionState::Idle);
        self.store.reset().await;
        if let Some(session_id) = previous.session_id() {
            self.left_session.store(true, Ordering::SeqCst);
            self.channel.forget_group(&session_id.to_string()).await;
            log::info!("Inventory {session_id} reset locally");
        }
    }

    /// Submit a scan for the active session.
    ///
    /// The outcome is for feedback only; the scanned set changes when the
    /// confirmation comes back over the realtime channel.
    pub async fn submit_scan(
        &self,
        code: &str,
        state_id: StateId,
    ) -> Result<ScanOutcome, SessionError> {
        let session_id = self
            .state
            .borrow()
            .session_id()
            .ok_or(SessionError::NoActiveSession)?;
        Ok(self.scans.submit_scan(session_id, code, state_id).await?)
    }

    pub async fn completion(&self) -> CompletionReport {
        self.store.completion().await
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.state.borrow().session_id() {
            Some(active) => Err(SessionError::AlreadyActive(active)),
            None => Ok(()),
        }
    }

    /// Idle → Active, atomically.
    fn activate(&self, session: ActiveSession) -> Result<(), SessionError> {
        let mut conflict = None;
        self.state.send_if_modified(|state| match state {
            SessionState::Active(current) => {
                conflict = Some(current.session_id);
                false
            }
            SessionState::Idle => {
                *state = SessionState::Active(session);
                true
            }
        });
        match conflict {
            Some(active) => Err(SessionError::AlreadyActive(active)),
            None => Ok(()),
        }
    }

    /// Point the store at the zone and join the session group.
    ///
    /// Neither failure rolls the session back: it exists server-side.
    async fn enter(&self, session_id: SessionId, zone_id: ZoneId) {
        self.store.clear_scanned().await;
        if let Err(e) = self.store.load_catalog(self.api.as_ref(), zone_id).await {
            log::warn!("Inventory {session_id} has no catalog: {e}");
        }
        if let Err(e) = self.channel.join_group(&session_id.to_string()).await {
            log::warn!("Inventory {session_id} is active without realtime updates: {e}");
        }
    }

    async fn leave(&self, session_id: SessionId) {
        self.state.send_if_modified(|state| {
            if state.session_id() == Some(session_id) {
                *state = SessionState::Idle;
                true
            } else {
                false
            }
        });
        self.left_session.store(true, Ordering::SeqCst);
        self.store.reset().await;
        self.channel.forget_group(&session_id.to_string()).await;
    }

    /// Start the confirmation pump once.
    fn ensure_pump(&self) {
        let mut pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let events = self
            .channel
            .subscribe::<ItemConfirmed>(&self.config.item_confirmed_topic);
        *pump = Some(tokio::spawn(pump_confirmations(
            events,
            self.state.subscribe(),
            Arc::clone(&self.left_session),
            self.store.clone(),
        )));
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn pump_confirmations(
    mut events: Subscription<ItemConfirmed>,
    state: watch::Receiver<SessionState>,
    left_session: Arc<AtomicBool>,
    store: StoreHandle,
) {
    while let Some(event) = events.next().await {
        let active = state.borrow().session_id();
        let trust_untagged = !left_session.load(Ordering::SeqCst);
        match active {
            Some(session_id) if event.applies_to(session_id, trust_untagged) => {
                store.confirm(event.item_id).await;
            }
            Some(session_id) => {
                log::debug!("Ignoring confirmation {event:?} outside inventory {session_id}");
            }
            None => log::debug!("Ignoring confirmation {event:?} with no active inventory"),
        }
    }
    log::debug!("Confirmation stream closed");
}

fn join_error(err: &ApiError) -> SessionError {
    match err {
        ApiError::Transport(reason) => SessionError::Unreachable(reason.clone()),
        ApiError::Status {
            status: 400 | 404 | 409 | 410 | 422,
            ..
        } => SessionError::InvalidCode(err.server_message().unwrap_or_else(|| INVALID_CODE.into())),
        ApiError::Status { status, .. } => SessionError::Server {
            status: *status,
            message: err.server_message().unwrap_or_else(|| JOIN_FAILED.into()),
        },
        ApiError::Decode(_) => SessionError::InvalidCode(INVALID_CODE.into()),
    }
}

fn finish_error(err: &ApiError) -> SessionError {
    let (kind, fallback) = match err.status() {
        Some(400) => (
            FinishFailure::InvalidData,
            "Invalid data. Check the information.",
        ),
        Some(404) => (FinishFailure::NotFound, "Inventory not found."),
        _ => (FinishFailure::Other, "Could not finish the inventory."),
    };
    SessionError::Finish {
        kind,
        message: err.server_message().unwrap_or_else(|| fallback.to_string()),
    }
}
