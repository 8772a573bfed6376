use crate::auth::models::UserRole;
use crate::throttle::registry::{ANON_SCOPE, USER_SCOPE};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Who a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User { id: Uuid, role: UserRole },
    Anonymous { ip: IpAddr },
}

impl Principal {
    /// Counter key. Users and IPs live in separate namespaces.
    pub fn key(&self) -> String {
        match self {
            Principal::User { id, .. } => format!("user:{}", id),
            Principal::Anonymous { ip } => format!("ip:{}", ip),
        }
    }

    pub fn role(&self) -> Option<UserRole> {
        match self {
            Principal::User { role, .. } => Some(*role),
            Principal::Anonymous { .. } => None,
        }
    }

    /// Ceiling applied when a route declares no scopes
    pub fn default_scope(&self) -> &'static str {
        match self {
            Principal::User { .. } => USER_SCOPE,
            Principal::Anonymous { .. } => ANON_SCOPE,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_do_not_collide() {
        let id = Uuid::new_v4();
        let user = Principal::User {
            id,
            role: UserRole::User,
        };
        let anon = Principal::Anonymous {
            ip: "10.0.0.1".parse().unwrap(),
        };

        assert_eq!(user.key(), format!("user:{}", id));
        assert_eq!(anon.key(), "ip:10.0.0.1");
        assert_eq!(anon.role(), None);
        assert_eq!(anon.default_scope(), "anon");
        assert_eq!(user.default_scope(), "user");
    }
}
