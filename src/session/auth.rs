//! Publish/play authorization hook

use std::collections::HashMap;

use tokio::sync::oneshot;

/// What the peer asks to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Publish,
    Play,
}

/// Everything known about a publish/play request when it is checked
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    pub action: AuthAction,
    pub session_id: u64,
    pub app: &'a str,
    /// `/app/name`
    pub path: &'a str,
    /// Query arguments of the stream name
    pub args: &'a HashMap<String, String>,
}

/// Outcome of an authorization check
#[derive(Debug)]
pub enum AuthDecision {
    Allowed,
    /// Rejected; the reason is logged, the peer gets an `Unauthorized` status
    Denied(String),
    /// Decided later; `true` allows. A dropped sender counts as denied.
    Pending(oneshot::Receiver<bool>),
}

/// Policy consulted before every publish and play
pub trait Authorizer {
    fn authorize(&self, request: &AuthRequest<'_>) -> AuthDecision;
}

/// Lets everything through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _request: &AuthRequest<'_>) -> AuthDecision {
        AuthDecision::Allowed
    }
}
