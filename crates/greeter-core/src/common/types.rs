//! Domain records owned by the storage collaborator.
//!
//! The core treats these as read-only. They are kept separate from the
//! generated wire messages so storage backends never depend on protobuf
//! details.

use crate::proto;

/// A user record as returned by a storage lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl User {
    /// Returns `true` when the record satisfies the structural invariants
    /// expected for a lookup of `requested_id`: the stored id matches the one
    /// asked for and the record carries an email address.
    pub fn is_well_formed_for(&self, requested_id: &str) -> bool {
        self.id == requested_id && !self.email.is_empty()
    }
}

impl From<User> for proto::user::User {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> User {
        User {
            id: "u-1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn well_formed_requires_matching_id_and_email() {
        let user = ada();
        assert!(user.is_well_formed_for("u-1"));
        assert!(!user.is_well_formed_for("u-2"));

        let no_email = User {
            email: String::new(),
            ..ada()
        };
        assert!(!no_email.is_well_formed_for("u-1"));
    }

    #[test]
    fn wire_user_serializes_with_camel_case_names() {
        let wire = proto::user::User::from(ada());
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["createdAt"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn wire_messages_accept_original_field_names() {
        let req: proto::user::GetUserRequest =
            serde_json::from_str(r#"{"user_id":"u-7"}"#).unwrap();
        assert_eq!(req.user_id, "u-7");

        let user: proto::user::User =
            serde_json::from_str(r#"{"user_id":"u-1","created_at":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(user.user_id, "u-1");
        assert_eq!(user.created_at, "2024-01-01T00:00:00Z");

        // Output keeps the camelCase names.
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn wire_requests_default_missing_fields() {
        let req: proto::user::GetUserRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.user_id, "");
    }
}
