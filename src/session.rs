use crate::backend::BackendClient;
use crate::db::TokenStore;
use log::{error, info};
use serde_json::Value;

pub const TOKEN_KEY: &str = "token";
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Landing,
    Login,
    Dashboard,
    Settings,
    Records,
    RecordDetail(u64),
    Analytics,
}

impl View {
    pub fn is_protected(self) -> bool {
        !matches!(self, View::Landing | View::Login)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Redirect(&'static str),
}

/// Presence-only gate: a stored non-empty token counts as logged in. The
/// token is never inspected; the backend checks it on each request.
pub struct SessionGuard {
    store: TokenStore,
}

impl SessionGuard {
    pub fn new(store: TokenStore) -> Self {
        SessionGuard { store }
    }

    pub fn token(&self) -> Option<String> {
        self.store.get(TOKEN_KEY).filter(|token| !token.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn check(&self, view: View) -> Access {
        if !view.is_protected() || self.is_authenticated() {
            Access::Granted
        } else {
            Access::Redirect(LOGIN_PATH)
        }
    }

    pub async fn login(&self, backend: &BackendClient, username: &str, password: &str) -> bool {
        match backend.login(username, password).await {
            Ok(token) => {
                info!("Logged in as {}", username);
                self.store.set(TOKEN_KEY, &token)
            }
            Err(e) => {
                error!("Login failed: {}", e);
                false
            }
        }
    }

    pub async fn register(
        &self,
        backend: &BackendClient,
        username: &str,
        email: &str,
        password: &str,
    ) -> Option<Value> {
        match backend.register(username, email, password).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!("Registration failed: {}", e);
                None
            }
        }
    }

    pub fn logout(&self) {
        self.store.remove(TOKEN_KEY);
        info!("Logged out");
    }
}
