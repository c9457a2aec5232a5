//! Domain collaborators consumed by the service handler.
//!
//! The handler only sees these traits. Each is injected at construction as an
//! `Arc<dyn _>`, so storage, authorization, and throttling backends can be
//! swapped (or faked in tests) without touching the handler.
//!
//! Every operation either succeeds or fails with a [`LookupError`]: the
//! subject was not found, or some other lower-layer failure occurred.
//!
//! ## Bundled implementations
//!
//! - [`InMemoryUserStore`] - a seeded, read-only user table.
//! - [`StaticPermissions`] - a fixed allow-list of user IDs.
//! - [`FixedWindowRateLimiter`] - per-user call counting over fixed windows.

mod memory;
mod rate_limit;

pub use memory::{InMemoryUserStore, StaticPermissions};
pub use rate_limit::FixedWindowRateLimiter;

use greeter_core::{BoxError, types::User};

/// Failure reported by a domain collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The subject of the lookup does not exist.
    #[error("not found")]
    NotFound,

    /// Any other failure of the backing system.
    #[error("backend failure: {0}")]
    Backend(#[source] BoxError),
}

impl LookupError {
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Backend(err.into())
    }
}

/// Read access to user records.
#[tonic::async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn find_user(&self, id: &str) -> Result<User, LookupError>;
}

/// Answers whether a user holds the capability guarded by `CheckPermission`.
#[tonic::async_trait]
pub trait PermissionOracle: Send + Sync + 'static {
    async fn has_permission(&self, user_id: &str) -> Result<bool, LookupError>;
}

/// Tracks per-user call quotas.
#[tonic::async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Records one call for `user_id` and returns `true` when that call
    /// exceeds the quota.
    async fn check(&self, user_id: &str) -> Result<bool, LookupError>;
}
