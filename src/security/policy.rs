//! Security Policy Definitions

use serde::{Deserialize, Serialize};

/// User role for access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
        }
    }

    /// Only `ADMIN` (any case) is elevated; everything else is a plain user.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::User
        }
    }

    /// Elevated roles bypass row scoping.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// User context for authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

impl UserContext {
    pub fn new(user_id: i64, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            username: username.into(),
            role,
        }
    }

    pub fn admin(user_id: i64, username: impl Into<String>) -> Self {
        Self::new(user_id, username, Role::Admin)
    }

    pub fn user(user_id: i64, username: impl Into<String>) -> Self {
        Self::new(user_id, username, Role::User)
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_privileged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("ADMIN"), Role::Admin);
        assert_eq!(Role::parse(" admin "), Role::Admin);
        assert_eq!(Role::parse("USER"), Role::User);
        assert_eq!(Role::parse("superuser"), Role::User);
        assert_eq!(Role::parse(""), Role::User);
    }

    #[test]
    fn test_user_context() {
        assert!(UserContext::admin(1, "root").is_admin());
        let alice = UserContext::user(42, "alice");
        assert!(!alice.is_admin());
        assert_eq!(alice.role.as_str(), "USER");
    }
}
