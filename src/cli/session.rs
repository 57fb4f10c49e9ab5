use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// An authenticated session. Lives only in memory and only as long as the
/// App keeps it; dropping it is how the client logs out.
#[derive(Clone)]
pub struct Session {
    token: Arc<str>,
    pub username: String,
    pub started_at: DateTime<Local>,
}

impl Session {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
            username: username.into(),
            started_at: Local::now(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("started_at", &self.started_at)
            .finish()
    }
}
