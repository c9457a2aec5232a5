use super::{LookupError, PermissionOracle, UserStore};
use greeter_core::types::User;
use std::collections::{HashMap, HashSet};

/// A read-only user table held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: HashMap<String, User>,
}

impl InMemoryUserStore {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.id.clone(), user))
                .collect(),
        }
    }

    /// A store holding a handful of demo users (`1`, `2`, and `3`).
    pub fn seeded() -> Self {
        let user = |id: &str, name: &str, email: &str, created_at: &str| User {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: created_at.to_string(),
        };

        Self::new([
            user("1", "Ada Lovelace", "ada@example.com", "2024-01-15T09:30:00Z"),
            user("2", "Alan Turing", "alan@example.com", "2024-02-01T12:00:00Z"),
            user("3", "Grace Hopper", "grace@example.com", "2024-03-09T17:45:00Z"),
        ])
    }
}

#[tonic::async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_user(&self, id: &str) -> Result<User, LookupError> {
        self.users.get(id).cloned().ok_or(LookupError::NotFound)
    }
}

/// Grants the capability to a fixed set of users and denies everyone else.
///
/// The default (empty) set denies every caller.
#[derive(Debug, Default, Clone)]
pub struct StaticPermissions {
    granted: HashSet<String>,
}

impl StaticPermissions {
    pub fn new(granted: impl IntoIterator<Item = String>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
        }
    }
}

#[tonic::async_trait]
impl PermissionOracle for StaticPermissions {
    async fn has_permission(&self, user_id: &str) -> Result<bool, LookupError> {
        Ok(self.granted.contains(user_id))
    }
}
