//! Session state: the stored token, the refresh coordinator, and the
//! events the presentation layer reacts to

pub mod coordinator;
pub mod events;
pub mod refresher;
pub mod store;
pub mod token;

pub use coordinator::RefreshCoordinator;
pub use events::{LoginRedirect, SessionEvent, SessionEvents};
pub use refresher::{HttpRefresher, RefreshError, TokenRefresher};
pub use store::{FileTokenStore, MemoryTokenStore, StoreError, TokenStore};
pub use token::BearerToken;
