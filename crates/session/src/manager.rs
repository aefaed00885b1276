//! Session lifecycle manager.
//!
//! The manager is the only writer of session state. Everything else reads
//! [`SessionSnapshot`]s (or subscribes to them) and asks permission
//! questions through [`SessionManager::check`] and friends.
//!
//! ## Ordering
//!
//! State lives behind a plain mutex that is never held across an `.await`.
//! Every sign-in and every teardown bumps a generation counter; each gateway
//! call remembers the generation it started under and its result is applied
//! only if that generation is still current. A revalidation that completes
//! after a logout is therefore dropped instead of resurrecting the session.
//!
//! Store writes are serialized and fenced by the same generation, so a
//! stale `save_user` can never land after a teardown's `clear` and leave
//! the store half populated.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};

use stockdesk_auth::{AuthzError, PermissionGraph, Role, User, authorize};
use stockdesk_core::{DomainError, UserId};

use crate::config::UnreachablePolicy;
use crate::error::SessionError;
use crate::gateway::{GatewayError, IdentityGateway};
use crate::state::{ActiveSession, SessionEvent, SessionSnapshot, SessionState};
use crate::store::{PersistedSession, SessionStore};
use crate::types::{Credentials, LoginResponse, PasswordChange, ProfileUpdate, Token};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    generation: u64,
    /// Mutating calls waiting on the gateway outside a transitional state.
    in_flight: usize,
}

pub struct SessionManager {
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn SessionStore>,
    graph: Arc<PermissionGraph>,
    unreachable_policy: UnreachablePolicy,
    inner: Mutex<Inner>,
    store_writes: AsyncMutex<()>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionManager")
            .field("phase", &inner.state.phase())
            .field("generation", &inner.generation)
            .field("in_flight", &inner.in_flight)
            .field("unreachable_policy", &self.unreachable_policy)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager with the built-in permission table and the default
    /// unreachable policy. Nothing happens until [`bootstrap`](Self::bootstrap).
    pub fn new(gateway: Arc<dyn IdentityGateway>, store: Arc<dyn SessionStore>) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            gateway,
            store,
            graph: Arc::new(PermissionGraph::inventory_defaults()),
            unreachable_policy: UnreachablePolicy::default(),
            inner: Mutex::new(Inner::default()),
            store_writes: AsyncMutex::new(()),
            snapshots,
            events,
        }
    }

    pub fn with_graph(mut self, graph: Arc<PermissionGraph>) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_unreachable_policy(mut self, policy: UnreachablePolicy) -> Self {
        self.unreachable_policy = policy;
        self
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read side
    // ─────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn permission_graph(&self) -> &PermissionGraph {
        &self.graph
    }

    /// Whether the current user holds `permission`.
    pub fn check(&self, permission: &str) -> bool {
        let snapshot = self.snapshots.borrow();
        let user = snapshot.user.as_ref();
        let granted = authorize::check(user, permission, &self.graph);

        if !granted && tracing::enabled!(tracing::Level::DEBUG) {
            let explanation = authorize::explain(user, permission, &self.graph);
            tracing::debug!(%explanation, "permission check denied");
        }

        granted
    }

    pub fn check_any<P>(&self, permissions: &[P]) -> bool
    where
        P: AsRef<str>,
    {
        authorize::check_any(self.snapshots.borrow().user.as_ref(), permissions, &self.graph)
    }

    pub fn check_role(&self, role: Role) -> bool {
        authorize::check_role(self.snapshots.borrow().user.as_ref(), role)
    }

    /// Guard form of [`check`](Self::check) for route guards.
    pub fn require(&self, permission: &str) -> Result<(), AuthzError> {
        authorize::require(self.snapshots.borrow().user.as_ref(), permission, &self.graph)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Restore the persisted session and revalidate it. Runs once per manager.
    ///
    /// With a cached session the snapshot turns `authenticated` immediately
    /// (still `loading`) so the UI is not blocked on the round trip. `loading`
    /// is false again once this returns, on every path.
    pub async fn bootstrap(&self) -> Result<SessionSnapshot, SessionError> {
        let generation = self.update(|inner| {
            if !matches!(inner.state, SessionState::Uninitialized) {
                return Err(SessionError::AlreadyBootstrapped);
            }
            inner.state = SessionState::Initializing(None);
            Ok(inner.generation)
        })?;
        let _settle = Settle::new(self, generation);

        let (persisted, needs_clear) = match self.store.load().await {
            Ok(persisted) => {
                let partial = persisted.is_partial();
                (persisted, partial)
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not read persisted session; starting anonymous");
                (PersistedSession::default(), true)
            }
        };
        let stored_at = persisted.stored_at;

        let Some((token, user)) = persisted.into_parts() else {
            if needs_clear {
                self.clear_store(generation).await;
            }
            self.update(|inner| {
                if inner.generation == generation {
                    inner.state = SessionState::Anonymous;
                }
            });
            tracing::info!("no persisted session; starting anonymous");
            return Ok(self.snapshot());
        };

        let cached = ActiveSession { token, user };
        let user_id = cached.user.id.clone();
        let token = cached.token.clone();

        let restored = self.update(|inner| {
            if inner.generation != generation {
                return None;
            }
            inner.state = SessionState::Initializing(Some(cached));
            Some(())
        });
        if restored.is_none() {
            tracing::debug!("session changed during bootstrap; skipping revalidation");
            return Ok(self.snapshot());
        }
        tracing::info!(user_id = %user_id, ?stored_at, "restored cached session; revalidating");

        match self.gateway.current_user(&token).await {
            Ok(user) => {
                if let Err(err) = self.apply_user(generation, user, SessionEvent::Restored).await {
                    tracing::debug!(error = %err, "bootstrap revalidation discarded");
                }
            }
            Err(err)
                if err.is_network() && self.unreachable_policy == UnreachablePolicy::KeepCached =>
            {
                tracing::warn!(error = %err, "identity gateway unreachable; keeping cached session");
                let kept = self.update(|inner| {
                    if inner.generation != generation {
                        return false;
                    }
                    inner.state = match std::mem::take(&mut inner.state) {
                        SessionState::Initializing(Some(active)) => {
                            SessionState::Authenticated(active)
                        }
                        other => other,
                    };
                    true
                });
                if kept {
                    self.emit(SessionEvent::Restored(user_id));
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    category = %err.category,
                    "cached session rejected; signing out"
                );
                self.teardown(Some(generation), SessionEvent::Expired).await;
            }
        }

        Ok(self.snapshot())
    }

    /// Sign in. A failure leaves any existing session exactly as it was.
    pub async fn login(&self, credentials: Credentials) -> Result<User, SessionError> {
        credentials.validate()?;
        let _in_flight = InFlight::enter(self);

        let LoginResponse { token, user } = match self.gateway.login(&credentials).await {
            Ok(response) => response,
            Err(err) => {
                tracing::info!(
                    identifier = %credentials.identifier,
                    category = %err.category,
                    "login failed"
                );
                return Err(err.into());
            }
        };

        // Persist first: if the store rejects the write nothing changes.
        let _writes = self.store_writes.lock().await;
        self.store.save(&token, &user).await?;
        self.update(|inner| {
            inner.generation += 1;
            inner.state = SessionState::Authenticated(ActiveSession {
                token,
                user: user.clone(),
            });
        });

        tracing::info!(user_id = %user.id, role = %user.role, "signed in");
        self.emit(SessionEvent::SignedIn(user.id.clone()));
        Ok(user)
    }

    /// Sign out. The gateway is notified best-effort; local state and the
    /// store are cleared no matter what it answers.
    ///
    /// A logout issued while another is still waiting on the gateway ends
    /// the session locally without a second notification. Before
    /// [`bootstrap`](Self::bootstrap) there is no session yet and the call
    /// does nothing, the store included.
    pub async fn logout(&self) {
        if self.teardown(None, SessionEvent::SignedOut).await {
            tracing::info!("signed out");
        }
    }

    /// Re-fetch the user record for the current session.
    pub async fn refresh(&self) -> Result<User, SessionError> {
        let (generation, token) = self.update(|inner| {
            match std::mem::take(&mut inner.state) {
                SessionState::Authenticated(active) => {
                    let token = active.token.clone();
                    inner.state = SessionState::Refreshing(active);
                    Ok((inner.generation, token))
                }
                other => {
                    let busy = other.active().is_some();
                    inner.state = other;
                    Err(if busy {
                        SessionError::Busy
                    } else {
                        SessionError::NotAuthenticated
                    })
                }
            }
        })?;
        let _settle = Settle::new(self, generation);

        match self.gateway.current_user(&token).await {
            Ok(user) => self.apply_user(generation, user, SessionEvent::Refreshed).await,
            Err(err) => Err(self.on_gateway_error(generation, err).await),
        }
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, SessionError> {
        if update.is_empty() {
            return Err(DomainError::validation("profile update has no fields").into());
        }
        let (generation, token) = self.authenticated_token()?;
        let _in_flight = InFlight::enter(self);

        match self.gateway.update_profile(&token, &update).await {
            Ok(user) => self.apply_user(generation, user, SessionEvent::Refreshed).await,
            Err(err) => Err(self.on_gateway_error(generation, err).await),
        }
    }

    pub async fn change_password(&self, change: PasswordChange) -> Result<(), SessionError> {
        change.validate()?;
        let (generation, token) = self.authenticated_token()?;
        let _in_flight = InFlight::enter(self);

        match self.gateway.change_password(&token, &change).await {
            Ok(()) => {
                tracing::info!("password changed");
                Ok(())
            }
            Err(err) => Err(self.on_gateway_error(generation, err).await),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate state and publish the derived snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.lock();
        let result = f(&mut *inner);
        let next = SessionSnapshot::derive(&inner.state, inner.in_flight);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        result
    }

    fn current_generation(&self) -> u64 {
        self.lock().generation
    }

    fn emit(&self, event: SessionEvent) {
        // Err only means nobody is listening.
        let _ = self.events.send(event);
    }

    fn authenticated_token(&self) -> Result<(u64, Token), SessionError> {
        let inner = self.lock();
        match &inner.state {
            SessionState::Authenticated(active)
            | SessionState::Refreshing(active)
            | SessionState::Initializing(Some(active)) => {
                Ok((inner.generation, active.token.clone()))
            }
            _ => Err(SessionError::NotAuthenticated),
        }
    }

    /// Install a fresh user record if `generation` is still current, then
    /// mirror it to the store.
    async fn apply_user(
        &self,
        generation: u64,
        user: User,
        event: fn(UserId) -> SessionEvent,
    ) -> Result<User, SessionError> {
        let _writes = self.store_writes.lock().await;

        let applied = self.update(|inner| {
            if inner.generation != generation {
                return false;
            }
            let Some(active) = inner.state.active_mut() else {
                return false;
            };
            active.user = user.clone();
            inner.state = match std::mem::take(&mut inner.state) {
                SessionState::Refreshing(active) | SessionState::Initializing(Some(active)) => {
                    SessionState::Authenticated(active)
                }
                other => other,
            };
            true
        });

        if !applied {
            tracing::debug!(user_id = %user.id, "discarding user record from a superseded session");
            return Err(SessionError::Superseded);
        }

        if let Err(err) = self.store.save_user(&user).await {
            tracing::warn!(error = %err, "failed to persist user record; cached copy is stale");
        }

        self.emit(event(user.id.clone()));
        Ok(user)
    }

    /// Unauthorized answers on an authenticated call end the session.
    async fn on_gateway_error(&self, generation: u64, err: GatewayError) -> SessionError {
        if err.is_unauthorized() {
            tracing::warn!(error = %err, "gateway rejected the session; signing out");
            self.teardown(Some(generation), SessionEvent::Expired).await;
        }
        err.into()
    }

    async fn clear_store(&self, generation: u64) {
        let _writes = self.store_writes.lock().await;
        if self.current_generation() != generation {
            return;
        }
        if let Err(err) = self.store.clear().await {
            tracing::error!(error = %err, "failed to clear persisted session");
        }
    }

    /// Full teardown. With `expected`, only runs if that generation is still
    /// current (a newer sign-in or teardown wins). Returns whether the
    /// session ended.
    async fn teardown(&self, expected: Option<u64>, event: SessionEvent) -> bool {
        let claim = self.update(|inner| {
            if expected.is_some_and(|g| g != inner.generation) {
                return Claim::Superseded;
            }

            match std::mem::take(&mut inner.state) {
                SessionState::Uninitialized => {
                    inner.state = SessionState::Uninitialized;
                    Claim::NotStarted
                }
                // A teardown is already talking to the gateway; finish the
                // local part now and let it send the notification.
                SessionState::Invalidating(_) => {
                    inner.state = SessionState::Anonymous;
                    Claim::Joined(inner.generation)
                }
                state => {
                    inner.generation += 1;
                    let token = match state.into_active() {
                        Some(active) => {
                            let token = active.token.clone();
                            inner.state = SessionState::Invalidating(active);
                            Some(token)
                        }
                        None => {
                            inner.state = SessionState::Anonymous;
                            None
                        }
                    };
                    Claim::Owned(inner.generation, token)
                }
            }
        });

        let (generation, token) = match claim {
            Claim::Owned(generation, token) => (generation, token),
            Claim::Joined(generation) => {
                self.clear_store(generation).await;
                return true;
            }
            Claim::NotStarted => {
                tracing::debug!("teardown before bootstrap; nothing to do");
                return false;
            }
            Claim::Superseded => {
                tracing::debug!("teardown superseded by a newer session change");
                return false;
            }
        };

        // Local cleanup is guaranteed: `_settle` moves `Invalidating` to
        // `Anonymous` even if this future is dropped mid-call.
        let _settle = Settle::new(self, generation);

        self.clear_store(generation).await;

        if let Some(token) = &token {
            if let Err(err) = self.gateway.logout(token).await {
                tracing::warn!(
                    error = %err,
                    category = %err.category,
                    "gateway logout failed; local session cleared anyway"
                );
            }
        }

        drop(_settle);
        self.emit(event);
        true
    }
}

/// Outcome of trying to start a teardown.
enum Claim {
    /// This call owns the teardown under the new generation.
    Owned(u64, Option<Token>),
    /// Another teardown was in flight.
    Joined(u64),
    /// Bootstrap has not run yet.
    NotStarted,
    Superseded,
}

/// Counts a mutating call as in flight for `loading` until dropped.
struct InFlight<'a>(&'a SessionManager);

impl<'a> InFlight<'a> {
    fn enter(manager: &'a SessionManager) -> Self {
        manager.update(|inner| inner.in_flight += 1);
        Self(manager)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0
            .update(|inner| inner.in_flight = inner.in_flight.saturating_sub(1));
    }
}

/// Resolves a transitional state left behind by an operation that ended
/// early, as long as no newer generation has taken over.
struct Settle<'a> {
    manager: &'a SessionManager,
    generation: u64,
}

impl<'a> Settle<'a> {
    fn new(manager: &'a SessionManager, generation: u64) -> Self {
        Self {
            manager,
            generation,
        }
    }
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.manager.update(|inner| {
            if inner.generation == generation && inner.state.is_transitional() {
                inner.state = std::mem::take(&mut inner.state).settle();
            }
        });
    }
}
