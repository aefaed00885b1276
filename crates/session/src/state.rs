//! Session state machine and the read-only views derived from it.

use serde::Serialize;

use stockdesk_auth::User;
use stockdesk_core::UserId;

use crate::types::Token;

/// Token and user of a live (or optimistically restored) session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub token: Token,
    pub user: User,
}

/// Lifecycle of the process-wide session.
///
/// ```text
/// Uninitialized -> Initializing -> Authenticated | Anonymous
/// Authenticated -> Refreshing   -> Authenticated | Anonymous
/// Authenticated -> Invalidating -> Anonymous
/// Anonymous     -> Authenticated (login)
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Uninitialized,
    /// Bootstrap in progress; `Some` while a cached session is being revalidated.
    Initializing(Option<ActiveSession>),
    Authenticated(ActiveSession),
    /// Profile re-fetch in flight.
    Refreshing(ActiveSession),
    /// Logout in flight.
    Invalidating(ActiveSession),
    Anonymous,
}

impl SessionState {
    pub fn active(&self) -> Option<&ActiveSession> {
        match self {
            SessionState::Initializing(Some(active))
            | SessionState::Authenticated(active)
            | SessionState::Refreshing(active)
            | SessionState::Invalidating(active) => Some(active),
            _ => None,
        }
    }

    pub(crate) fn active_mut(&mut self) -> Option<&mut ActiveSession> {
        match self {
            SessionState::Initializing(Some(active))
            | SessionState::Authenticated(active)
            | SessionState::Refreshing(active)
            | SessionState::Invalidating(active) => Some(active),
            _ => None,
        }
    }

    pub fn into_active(self) -> Option<ActiveSession> {
        match self {
            SessionState::Initializing(Some(active))
            | SessionState::Authenticated(active)
            | SessionState::Refreshing(active)
            | SessionState::Invalidating(active) => Some(active),
            _ => None,
        }
    }

    /// Waiting on bootstrap or on a gateway round trip.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            SessionState::Uninitialized
                | SessionState::Initializing(_)
                | SessionState::Refreshing(_)
                | SessionState::Invalidating(_)
        )
    }

    /// Resting state to fall back to when the operation driving a
    /// transitional state is dropped before finishing.
    pub(crate) fn settle(self) -> SessionState {
        match self {
            SessionState::Refreshing(active) => SessionState::Authenticated(active),
            SessionState::Initializing(_) | SessionState::Invalidating(_) => SessionState::Anonymous,
            other => other,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Uninitialized => SessionPhase::Uninitialized,
            SessionState::Initializing(_) => SessionPhase::Initializing,
            SessionState::Authenticated(_) => SessionPhase::Authenticated,
            SessionState::Refreshing(_) => SessionPhase::Refreshing,
            SessionState::Invalidating(_) => SessionPhase::Invalidating,
            SessionState::Anonymous => SessionPhase::Anonymous,
        }
    }
}

/// Tag of [`SessionState`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Authenticated,
    Refreshing,
    Invalidating,
    Anonymous,
}

/// What the rest of the application sees. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub authenticated: bool,
    pub loading: bool,
    pub phase: SessionPhase,
}

impl SessionSnapshot {
    /// `authenticated` implies a user (and a token behind it); `loading`
    /// covers the bootstrap window and any in-flight mutating call.
    pub(crate) fn derive(state: &SessionState, in_flight: usize) -> Self {
        let active = state.active();
        Self {
            user: active.map(|a| a.user.clone()),
            authenticated: active.is_some(),
            loading: state.is_transitional() || in_flight > 0,
            phase: state.phase(),
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::derive(&SessionState::Uninitialized, 0)
    }
}

/// Lifecycle notifications, for routers and other listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A login succeeded.
    SignedIn(UserId),
    /// Bootstrap revalidated (or kept) the cached session.
    Restored(UserId),
    /// The user record was re-fetched or updated.
    Refreshed(UserId),
    /// Explicit logout finished.
    SignedOut,
    /// The gateway rejected the session; listeners should navigate to the
    /// anonymous entry point.
    Expired,
}
