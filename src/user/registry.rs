//! User registry for filo.
//!
//! Process-wide directory of accounts plus the routing table that maps an
//! account to its currently bound live session. Shared across all sessions;
//! every operation takes the single registry lock so that registration,
//! authentication and routing updates are atomic with respect to each other.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::Account;
use crate::{FiloError, Result};

/// Handle to a live session's output stream.
///
/// Cheap to clone; sending never blocks. The session id tags the handle so
/// that a stale session cannot tear down a binding it no longer owns.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    tx: UnboundedSender<String>,
}

impl SessionHandle {
    /// Create a handle from a session id and its outbound line channel.
    pub fn new(session_id: Uuid, tx: UnboundedSender<String>) -> Self {
        Self { session_id, tx }
    }

    /// Get the owning session id.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Push a line to the session's output stream.
    ///
    /// Returns false if the session's writer has already gone away.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }
}

struct Inner {
    /// Accounts indexed by username.
    accounts: HashMap<String, Account>,
    /// Routing table: user id to its bound live session, at most one entry
    /// per account.
    routes: HashMap<i64, SessionHandle>,
    /// Next user id to allocate.
    next_user_id: i64,
}

/// Registry of accounts and live-session routing.
pub struct UserRegistry {
    inner: RwLock<Inner>,
}

impl UserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                accounts: HashMap::new(),
                routes: HashMap::new(),
                next_user_id: 1,
            }),
        }
    }

    /// Register a new account.
    ///
    /// Allocates a fresh user id. The uniqueness check and the insertion
    /// happen under one write lock, so two concurrent registrations of the
    /// same username cannot both succeed. The new account starts online:
    /// registration logs the user in immediately.
    pub async fn register(&self, username: &str, password: &str) -> Result<Account> {
        let mut inner = self.inner.write().await;

        if inner.accounts.contains_key(username) {
            return Err(FiloError::Auth(format!("username '{username}' taken")));
        }

        let id = inner.next_user_id;
        inner.next_user_id += 1;

        let mut account = Account::new(id, username, password);
        account.online = true;
        inner.accounts.insert(username.to_string(), account.clone());

        info!("Registered user {} (id={})", username, id);
        Ok(account)
    }

    /// Authenticate an account by exact credential match.
    ///
    /// On success the online flag is set and a snapshot of the account is
    /// returned.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Account> {
        let mut inner = self.inner.write().await;

        match inner.accounts.get_mut(username) {
            Some(account) if account.password == password => {
                account.online = true;
                Ok(account.clone())
            }
            _ => Err(FiloError::Auth("invalid credentials".to_string())),
        }
    }

    /// Bind an account to a live session.
    ///
    /// A new binding replaces any previous one: a second login by the same
    /// account steals the routing entry, and the prior session simply stops
    /// receiving pushes.
    pub async fn bind(&self, user_id: i64, handle: SessionHandle) {
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.routes.insert(user_id, handle) {
            debug!(
                "Rebound user {} (previous session {})",
                user_id,
                old.session_id()
            );
        }
    }

    /// Unbind an account from a session and clear its online flag.
    ///
    /// Only removes the routing entry if `session_id` still owns it, so a
    /// session that was superseded by a fresh login cannot tear down the
    /// new binding on its way out. Returns true if the binding was removed.
    pub async fn unbind(&self, user_id: i64, session_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;

        let owned = inner
            .routes
            .get(&user_id)
            .is_some_and(|h| h.session_id() == session_id);
        if !owned {
            return false;
        }

        inner.routes.remove(&user_id);
        if let Some(account) = inner
            .accounts
            .values_mut()
            .find(|account| account.id == user_id)
        {
            account.online = false;
        }
        true
    }

    /// Look up the live session bound to an account, if any.
    pub async fn route(&self, user_id: i64) -> Option<SessionHandle> {
        self.inner.read().await.routes.get(&user_id).cloned()
    }

    /// Look up an account by username.
    pub async fn get(&self, username: &str) -> Option<Account> {
        self.inner.read().await.accounts.get(username).cloned()
    }

    /// Check whether an account is currently online.
    pub async fn is_online(&self, username: &str) -> bool {
        self.inner
            .read()
            .await
            .accounts
            .get(username)
            .is_some_and(|account| account.online)
    }

    /// Get the number of registered accounts.
    pub async fn count(&self) -> usize {
        self.inner.read().await.accounts.len()
    }

    /// Insert an account loaded from the persistent store.
    ///
    /// Keeps the id counter ahead of every loaded id. Loaded accounts start
    /// offline regardless of their stored flag: nobody is connected at
    /// startup.
    pub async fn insert_loaded(&self, mut account: Account) {
        let mut inner = self.inner.write().await;
        account.online = false;
        if account.id >= inner.next_user_id {
            inner.next_user_id = account.id + 1;
        }
        inner.accounts.insert(account.username.clone(), account);
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
