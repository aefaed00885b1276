#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};

use stockdesk_auth::{Role, User};
use stockdesk_core::UserId;
use stockdesk_session::{
    Credentials, GatewayError, IdentityGateway, LoginResponse, MemoryStore, PasswordChange,
    ProfileUpdate, SessionManager, Token,
};

pub fn user(id: &str, role: Role) -> User {
    User::new(UserId::new(id).unwrap(), role)
}

pub fn token(raw: &str) -> Token {
    Token::new(raw).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login(String),
    CurrentUser(String),
    Logout(String),
    UpdateProfile(String),
    ChangePassword(String),
}

type Reply<T> = Result<T, GatewayError>;

#[derive(Default)]
struct Script {
    logins: VecDeque<Reply<LoginResponse>>,
    current_users: VecDeque<Reply<User>>,
    profiles: VecDeque<Reply<User>>,
    passwords: VecDeque<Reply<()>>,
    logout: Option<GatewayError>,
    gate: Option<oneshot::Receiver<()>>,
    logout_gate: Option<oneshot::Receiver<()>>,
}

/// Gateway stub that answers from queued replies and records every call.
///
/// `current_user` and `logout` can be held open with the `gate_*` methods
/// to force interleavings.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    entered: Notify,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_login(&self, reply: Reply<LoginResponse>) {
        self.script.lock().unwrap().logins.push_back(reply);
    }

    pub fn on_current_user(&self, reply: Reply<User>) {
        self.script.lock().unwrap().current_users.push_back(reply);
    }

    pub fn on_update_profile(&self, reply: Reply<User>) {
        self.script.lock().unwrap().profiles.push_back(reply);
    }

    pub fn on_change_password(&self, reply: Reply<()>) {
        self.script.lock().unwrap().passwords.push_back(reply);
    }

    pub fn fail_logout(&self, err: GatewayError) {
        self.script.lock().unwrap().logout = Some(err);
    }

    /// Hold the next `current_user` call until the returned sender fires.
    pub fn gate_current_user(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().gate = Some(rx);
        tx
    }

    /// Hold the next `logout` call until the returned sender fires.
    pub fn gate_logout(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().logout_gate = Some(rx);
        tx
    }

    /// Resolves once a gated call has started waiting.
    pub async fn wait_for_gated_call(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn unscripted<T>(what: &str) -> Reply<T> {
    Err(GatewayError::server(format!("no scripted reply for {what}")))
}

#[async_trait]
impl IdentityGateway for ScriptedGateway {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, GatewayError> {
        self.record(Call::Login(credentials.identifier.clone()));
        let reply = self.script.lock().unwrap().logins.pop_front();
        reply.unwrap_or_else(|| unscripted("login"))
    }

    async fn current_user(&self, token: &Token) -> Result<User, GatewayError> {
        self.record(Call::CurrentUser(token.as_str().to_string()));
        let (gate, reply) = {
            let mut script = self.script.lock().unwrap();
            (script.gate.take(), script.current_users.pop_front())
        };
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _ = gate.await;
        }
        reply.unwrap_or_else(|| unscripted("current_user"))
    }

    async fn logout(&self, token: &Token) -> Result<(), GatewayError> {
        self.record(Call::Logout(token.as_str().to_string()));
        let (gate, failure) = {
            let mut script = self.script.lock().unwrap();
            (script.logout_gate.take(), script.logout.clone())
        };
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _ = gate.await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn update_profile(
        &self,
        token: &Token,
        _update: &ProfileUpdate,
    ) -> Result<User, GatewayError> {
        self.record(Call::UpdateProfile(token.as_str().to_string()));
        let reply = self.script.lock().unwrap().profiles.pop_front();
        reply.unwrap_or_else(|| unscripted("update_profile"))
    }

    async fn change_password(
        &self,
        token: &Token,
        _change: &PasswordChange,
    ) -> Result<(), GatewayError> {
        self.record(Call::ChangePassword(token.as_str().to_string()));
        let reply = self.script.lock().unwrap().passwords.pop_front();
        reply.unwrap_or_else(|| unscripted("change_password"))
    }
}

pub fn manager(gateway: &Arc<ScriptedGateway>, store: &Arc<MemoryStore>) -> SessionManager {
    SessionManager::new(gateway.clone(), store.clone())
}
