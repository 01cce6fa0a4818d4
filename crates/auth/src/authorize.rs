use thiserror::Error;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Check that `principal` holds `required` (or the wildcard).
///
/// - No IO
/// - No panics
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let granted = principal
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);
    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use conduit_core::ActorId;
    use proptest::prelude::*;

    fn principal(roles: &str) -> Principal {
        Principal::from_roles(ActorId::new(), Principal::parse_roles(roles))
    }

    #[test]
    fn admin_gets_everything() {
        let p = principal("admin");
        assert!(authorize(&p, &Permission::POLICY_WRITE).is_ok());
        assert!(authorize(&p, &Permission::new("anything.at.all")).is_ok());
    }

    #[test]
    fn operator_cannot_touch_policy() {
        let p = principal("operator");
        assert!(authorize(&p, &Permission::QUEUE_REDRIVE).is_ok());
        assert_eq!(
            authorize(&p, &Permission::POLICY_WRITE),
            Err(AuthzError::Forbidden("policy.write".to_string()))
        );
    }

    #[test]
    fn roles_combine_and_normalise() {
        let p = principal(" Viewer , approver,,");
        assert_eq!(p.roles, vec![Role::new("viewer"), Role::new("approver")]);
        assert!(authorize(&p, &Permission::DELIVERIES_READ).is_ok());
        assert!(authorize(&p, &Permission::POLICY_APPROVE).is_ok());
        assert!(authorize(&p, &Permission::DELIVERIES_WRITE).is_err());
    }

    proptest! {
        #[test]
        fn unknown_roles_grant_nothing(name in "[a-z]{3,12}") {
            prop_assume!(!["admin", "operator", "viewer", "approver"].contains(&name.as_str()));
            let p = principal(&name);
            prop_assert!(p.permissions.is_empty());
            prop_assert!(authorize(&p, &Permission::DELIVERIES_READ).is_err());
        }
    }
}
