//! Session lifecycle events for the presentation layer

use tokio::sync::broadcast;

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 16;

/// Where to send the user once the session is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    /// Login route, e.g. `/login`
    pub route: String,
    /// Whether the login page should say the session expired
    pub expired: bool,
}

impl LoginRedirect {
    /// Route plus query string, e.g. `/login?expired=true`
    pub fn location(&self) -> String {
        if self.expired {
            let separator = if self.route.contains('?') { '&' } else { '?' };
            format!("{}{separator}expired=true", self.route)
        } else {
            self.route.clone()
        }
    }
}

/// Something that happened to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new token was stored after login, refresh, or a renewed header
    TokenRenewed,
    /// The session could not be recovered; navigate to login
    Expired(LoginRedirect),
    /// The user logged out
    LoggedOut,
}

/// Fan-out of [`SessionEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Emit an event; having no subscribers is not an error
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
