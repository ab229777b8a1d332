//! User accounts and the user registry for filo.

mod registry;

pub use registry::{SessionHandle, UserRegistry};

/// A registered account.
///
/// Accounts are created by registration and never deleted in-process.
/// The password is compared verbatim, as the wire protocol mandates.
#[derive(Debug, Clone)]
pub struct Account {
    /// Unique user ID.
    pub id: i64,
    /// Login username (unique, case-sensitive).
    pub username: String,
    /// Password (plain text, exact-match credential).
    pub password: String,
    /// Whether the account is currently logged in.
    pub online: bool,
}

impl Account {
    /// Create a new account.
    pub fn new(id: i64, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            password: password.into(),
            online: false,
        }
    }
}
