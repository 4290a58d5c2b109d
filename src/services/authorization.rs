//! Authorization seam: a yes/no capability check consulted before every
//! state-changing operation. A deny aborts with no partial state change.

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    FacilityAdmin,
    GlobalAdmin,
}

impl Role {
    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "staff" => Some(Self::Staff),
            "facility_admin" => Some(Self::FacilityAdmin),
            "global_admin" => Some(Self::GlobalAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::FacilityAdmin => "facility_admin",
            Self::GlobalAdmin => "global_admin",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

/// Operations that require authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SearchTransactions,
    Reconcile,
    Unreconcile,
    CreateStatement,
    CancelStatement,
    CreateJournal,
    CloseJournal,
    SendNotifications,
    ManageRecords,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn may(&self, actor: &Actor, operation: Operation, facility_id: Option<Uuid>) -> bool;
}

/// Role-ladder authorizer: global admins may do anything, facility admins
/// everything except unreconcile, staff may only search.
pub struct RoleAuthorizer;

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn may(&self, actor: &Actor, operation: Operation, _facility_id: Option<Uuid>) -> bool {
        match actor.role {
            Role::GlobalAdmin => true,
            Role::FacilityAdmin => operation != Operation::Unreconcile,
            Role::Staff => operation == Operation::SearchTransactions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[tokio::test]
    async fn staff_may_only_search() {
        let auth = RoleAuthorizer;
        let staff = actor(Role::Staff);
        assert!(auth.may(&staff, Operation::SearchTransactions, None).await);
        assert!(!auth.may(&staff, Operation::Reconcile, None).await);
        assert!(!auth.may(&staff, Operation::CreateJournal, None).await);
    }

    #[tokio::test]
    async fn unreconcile_requires_global_admin() {
        let auth = RoleAuthorizer;
        assert!(
            !auth
                .may(&actor(Role::FacilityAdmin), Operation::Unreconcile, None)
                .await
        );
        assert!(
            auth.may(&actor(Role::GlobalAdmin), Operation::Unreconcile, None)
                .await
        );
    }

    #[test]
    fn role_keys_are_whitelisted() {
        assert_eq!(Role::from_key("global_admin"), Some(Role::GlobalAdmin));
        assert_eq!(Role::from_key("superuser"), None);
    }
}
