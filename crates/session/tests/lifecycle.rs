mod common;

use std::sync::Arc;

use stockdesk_auth::Role;
use stockdesk_session::{
    Credentials, GatewayError, LoginResponse, MemoryStore, PasswordChange, ProfileUpdate,
    SessionError, SessionEvent, SessionPhase, SessionStore, UnreachablePolicy,
};

use common::{Call, ScriptedGateway, manager, token, user};

fn seeded_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::seeded(token("T1"), user("u1", Role::Employee)))
}

#[tokio::test]
async fn bootstrap_without_token_goes_anonymous_without_network() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&gateway, &store);

    assert!(manager.snapshot().loading, "loading before bootstrap");

    let snapshot = manager.bootstrap().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert!(!snapshot.authenticated);
    assert!(!snapshot.loading);
    assert!(snapshot.user.is_none());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn bootstrap_runs_only_once() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&gateway, &store);

    manager.bootstrap().await.unwrap();
    let err = manager.bootstrap().await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyBootstrapped));
}

#[tokio::test]
async fn bootstrap_restores_cached_session_then_revalidates() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    let mut fresh = user("u1", Role::Employee).with_permissions(["write_products"]);
    fresh.name = Some("Fresh".to_string());
    gateway.on_current_user(Ok(fresh.clone()));
    let release = gateway.gate_current_user();

    let manager = Arc::new(manager(&gateway, &store));
    let mut events = manager.events();
    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.bootstrap().await })
    };

    gateway.wait_for_gated_call().await;
    let optimistic = manager.snapshot();
    assert!(optimistic.authenticated);
    assert!(optimistic.loading);
    assert_eq!(optimistic.phase, SessionPhase::Initializing);
    assert_eq!(optimistic.user_id().unwrap().as_str(), "u1");

    release.send(()).unwrap();
    let snapshot = task.await.unwrap().unwrap();

    assert!(snapshot.authenticated);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user, Some(fresh.clone()));
    assert_eq!(store.contents().user, Some(fresh));
    assert_eq!(store.contents().token, Some(token("T1")));
    assert_eq!(gateway.calls(), vec![Call::CurrentUser("T1".into())]);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Restored("u1".parse().unwrap())
    );
}

#[tokio::test]
async fn rejected_cached_session_is_torn_down() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Err(GatewayError::unauthorized("token expired")));

    let manager = manager(&gateway, &store);
    let mut events = manager.events();
    let snapshot = manager.bootstrap().await.unwrap();

    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert!(!snapshot.authenticated && !snapshot.loading);
    assert!(store.contents().token.is_none());
    assert!(store.contents().user.is_none());
    assert_eq!(
        gateway.calls(),
        vec![Call::CurrentUser("T1".into()), Call::Logout("T1".into())]
    );
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
}

#[tokio::test]
async fn unreachable_gateway_tears_down_by_default() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Err(GatewayError::network("connection refused")));

    let manager = manager(&gateway, &store);
    let snapshot = manager.bootstrap().await.unwrap();

    assert!(!snapshot.authenticated);
    assert!(!snapshot.loading);
    assert!(store.contents().token.is_none());
}

#[tokio::test]
async fn unreachable_gateway_can_keep_cached_session() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Err(GatewayError::network("connection refused")));

    let manager =
        manager(&gateway, &store).with_unreachable_policy(UnreachablePolicy::KeepCached);
    let snapshot = manager.bootstrap().await.unwrap();

    assert!(snapshot.authenticated);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.phase, SessionPhase::Authenticated);
    assert_eq!(snapshot.user_id().unwrap().as_str(), "u1");
    assert_eq!(store.contents().token, Some(token("T1")));
    assert_eq!(gateway.calls(), vec![Call::CurrentUser("T1".into())]);
}

#[tokio::test]
async fn corrupt_half_written_store_is_cleared_on_bootstrap() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    store.save_user(&user("u1", Role::Viewer)).await.unwrap();
    assert!(store.contents().is_partial());

    let manager = manager(&gateway, &store);
    let snapshot = manager.bootstrap().await.unwrap();

    assert!(!snapshot.authenticated);
    assert!(store.contents().user.is_none());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn logout_during_revalidation_is_not_undone() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));
    let release = gateway.gate_current_user();

    let manager = Arc::new(manager(&gateway, &store));
    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.bootstrap().await })
    };

    gateway.wait_for_gated_call().await;
    manager.logout().await;
    assert!(!manager.snapshot().authenticated);

    release.send(()).unwrap();
    let snapshot = task.await.unwrap().unwrap();

    assert!(!snapshot.authenticated);
    assert!(snapshot.user.is_none());
    assert!(!snapshot.loading);
    assert!(store.contents().token.is_none());
    assert!(store.contents().user.is_none());
}

#[tokio::test]
async fn login_persists_and_authenticates() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    gateway.on_login(Ok(LoginResponse {
        token: token("T1"),
        user: user("u1", Role::Viewer),
    }));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();
    let mut events = manager.events();

    let signed_in = manager
        .login(Credentials::new("alice", "hunter2"))
        .await
        .unwrap();
    assert_eq!(signed_in.id.as_str(), "u1");

    let snapshot = manager.snapshot();
    assert!(snapshot.authenticated);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user_id().unwrap().as_str(), "u1");

    let (stored_token, stored_user) = store.contents().into_parts().unwrap();
    assert_eq!(stored_token, token("T1"));
    assert_eq!(stored_user.id.as_str(), "u1");
    assert_eq!(gateway.calls(), vec![Call::Login("alice".into())]);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::SignedIn("u1".parse().unwrap())
    );
}

#[tokio::test]
async fn failed_login_keeps_existing_session() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));
    gateway.on_login(Err(GatewayError::unauthorized("invalid credentials")));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();

    let err = manager
        .login(Credentials::new("mallory", "guess"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "invalid credentials");

    let snapshot = manager.snapshot();
    assert!(snapshot.authenticated);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user_id().unwrap().as_str(), "u1");
    assert_eq!(store.contents().token, Some(token("T1")));
}

#[tokio::test]
async fn blank_credentials_never_reach_the_gateway() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();

    let err = manager.login(Credentials::new("", "x")).await.unwrap_err();
    assert!(matches!(err, SessionError::Invalid(_)));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn logout_clears_everything_even_if_gateway_fails() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));
    gateway.fail_logout(GatewayError::network("offline"));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();
    let mut events = manager.events();

    manager.logout().await;

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert!(!snapshot.authenticated && !snapshot.loading);
    assert!(snapshot.user.is_none());
    assert!(store.contents().token.is_none());
    assert!(store.contents().user.is_none());
    assert!(gateway.calls().contains(&Call::Logout("T1".into())));
    assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedOut);
}

#[tokio::test]
async fn overlapping_logouts_both_leave_the_session_ended() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));

    let manager = Arc::new(manager(&gateway, &store));
    manager.bootstrap().await.unwrap();
    let mut events = manager.events();

    let release = gateway.gate_logout();
    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.logout().await })
    };
    gateway.wait_for_gated_call().await;
    assert_eq!(manager.snapshot().phase, SessionPhase::Invalidating);

    manager.logout().await;
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert!(!snapshot.authenticated && !snapshot.loading);

    release.send(()).unwrap();
    first.await.unwrap();

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert!(!snapshot.authenticated);
    assert!(!snapshot.loading);
    assert!(snapshot.user.is_none());
    assert!(store.contents().token.is_none());
    assert!(store.contents().user.is_none());

    let logouts = gateway
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Logout(_)))
        .count();
    assert_eq!(logouts, 1);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedOut);
}

#[tokio::test]
async fn logout_before_bootstrap_does_nothing() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));

    let manager = manager(&gateway, &store);
    manager.logout().await;

    assert_eq!(manager.snapshot().phase, SessionPhase::Uninitialized);
    assert_eq!(store.contents().token, Some(token("T1")));
    assert!(gateway.calls().is_empty());

    let snapshot = manager.bootstrap().await.unwrap();
    assert!(snapshot.authenticated);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user_id().unwrap().as_str(), "u1");
}

#[tokio::test]
async fn refresh_requires_a_session() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();

    assert!(matches!(
        manager.refresh().await,
        Err(SessionError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn refresh_replaces_user_and_keeps_session_on_server_error() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));
    gateway.on_current_user(Ok(user("u1", Role::Manager)));
    gateway.on_current_user(Err(GatewayError::server("Internal Server Error (500)")));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();

    let refreshed = manager.refresh().await.unwrap();
    assert_eq!(refreshed.role, Role::Manager);
    assert_eq!(store.contents().user.unwrap().role, Role::Manager);

    let err = manager.refresh().await.unwrap_err();
    assert!(!err.is_unauthorized());
    let snapshot = manager.snapshot();
    assert!(snapshot.authenticated);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.phase, SessionPhase::Authenticated);
    assert_eq!(snapshot.user.unwrap().role, Role::Manager);
}

#[tokio::test]
async fn concurrent_refresh_is_busy_and_late_result_is_discarded_after_logout() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));

    let manager = Arc::new(manager(&gateway, &store));
    manager.bootstrap().await.unwrap();

    gateway.on_current_user(Ok(user("u1", Role::Admin)));
    let release = gateway.gate_current_user();
    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.refresh().await })
    };
    gateway.wait_for_gated_call().await;

    assert_eq!(manager.snapshot().phase, SessionPhase::Refreshing);
    assert!(matches!(manager.refresh().await, Err(SessionError::Busy)));

    manager.logout().await;
    release.send(()).unwrap();

    let late = task.await.unwrap();
    assert!(matches!(late, Err(SessionError::Superseded)));
    assert!(!manager.snapshot().authenticated);
    assert!(!manager.check("read_products"));
    assert!(store.contents().user.is_none());
}

#[tokio::test]
async fn update_profile_replaces_and_persists_user() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));
    let mut renamed = user("u1", Role::Employee);
    renamed.name = Some("Ada".to_string());
    gateway.on_update_profile(Ok(renamed.clone()));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();

    let update = ProfileUpdate {
        name: Some("Ada".to_string()),
        email: None,
    };
    assert_eq!(manager.update_profile(update).await.unwrap(), renamed);
    assert_eq!(manager.snapshot().user, Some(renamed.clone()));
    assert_eq!(store.contents().user, Some(renamed));
    assert_eq!(store.contents().token, Some(token("T1")));

    let err = manager
        .update_profile(ProfileUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Invalid(_)));
}

#[tokio::test]
async fn rejected_password_change_expires_session() {
    let gateway = ScriptedGateway::new();
    let store = seeded_store();
    gateway.on_current_user(Ok(user("u1", Role::Employee)));
    gateway.on_change_password(Ok(()));
    gateway.on_change_password(Err(GatewayError::unauthorized("session revoked")));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();
    let mut events = manager.events();

    let same = manager
        .change_password(PasswordChange::new("same", "same"))
        .await
        .unwrap_err();
    assert!(matches!(same, SessionError::Invalid(_)));

    manager
        .change_password(PasswordChange::new("old", "new"))
        .await
        .unwrap();
    assert!(manager.snapshot().authenticated);

    let err = manager
        .change_password(PasswordChange::new("new", "newer"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let snapshot = manager.snapshot();
    assert!(!snapshot.authenticated && !snapshot.loading);
    assert!(store.contents().token.is_none());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);

    let calls = gateway.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, Call::ChangePassword(_)))
            .count(),
        2
    );
}

#[tokio::test]
async fn permission_checks_follow_the_current_user() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    gateway.on_login(Ok(LoginResponse {
        token: token("T1"),
        user: user("u1", Role::Employee).with_permissions(["write_products"]),
    }));
    gateway.on_login(Ok(LoginResponse {
        token: token("T2"),
        user: user("root", Role::Admin),
    }));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();
    assert!(!manager.check("read_products"));
    assert!(manager.require("read_products").is_err());

    manager.login(Credentials::new("u1", "pw")).await.unwrap();
    assert!(manager.check("write_products"));
    assert!(manager.check("read_products"));
    assert!(!manager.check("delete_products"));
    assert!(manager.check_any(&["delete_products", "read_products"]));
    assert!(!manager.check_any::<&str>(&[]));
    assert!(manager.check_role(Role::Employee));
    assert!(!manager.check_role(Role::Admin));

    manager.login(Credentials::new("root", "pw")).await.unwrap();
    assert!(manager.check("delete_products"));
    assert!(manager.check("anything_at_all"));
    assert_eq!(store.contents().token, Some(token("T2")));

    manager.logout().await;
    assert!(!manager.check("read_products"));
}

#[tokio::test]
async fn subscribers_observe_sign_in() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    gateway.on_login(Ok(LoginResponse {
        token: token("T1"),
        user: user("u1", Role::Viewer),
    }));

    let manager = manager(&gateway, &store);
    manager.bootstrap().await.unwrap();
    let mut watcher = manager.subscribe();
    assert!(!watcher.has_changed().unwrap());

    manager.login(Credentials::new("u1", "pw")).await.unwrap();

    assert!(watcher.has_changed().unwrap());
    let seen = watcher.borrow_and_update().clone();
    assert!(seen.authenticated);
    assert!(!seen.loading);
}
