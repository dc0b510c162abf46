//! Per-turn request context, passed explicitly down the agent call chain.

use chrono::{DateTime, Local};

pub const DEFAULT_SESSION: &str = "default";

/// Ambient state of one user turn. Never persisted as such; its fields are
/// copied into every memory row the turn writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// `{pid}_{uuid}`, unique per turn.
    pub request_id: String,
    pub user_name: String,
    pub session: String,
    /// Print per-tool progress lines.
    pub detail: bool,
    pub time: DateTime<Local>,
}

impl RequestContext {
    pub fn new(user_name: impl Into<String>, session: impl Into<String>) -> Self {
        let session = session.into();
        Self {
            request_id: format!("{}_{}", std::process::id(), uuid::Uuid::new_v4().simple()),
            user_name: user_name.into(),
            session: if session.trim().is_empty() {
                DEFAULT_SESSION.to_string()
            } else {
                session
            },
            detail: true,
            time: Local::now(),
        }
    }

    pub fn with_detail(mut self, detail: bool) -> Self {
        self.detail = detail;
        self
    }
}
