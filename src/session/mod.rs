//! Relying-party session management.
//!
//! Sessions live behind the [`SessionStore`] trait (in memory or in redb) and
//! are referenced from the browser by an HMAC-signed cookie.

pub mod cleanup;
pub mod cookie;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use cookie::SessionCookie;
pub use store::{MemorySessionStore, RedbSessionStore, SessionStore};
pub use types::{Session, SessionId};
