use conduit_core::ActorId;

use crate::{Permission, Role, permissions_for};

/// A caller resolved from gateway-supplied identity headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub actor_id: ActorId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    /// Expand `roles` into their permissions.
    pub fn from_roles(actor_id: ActorId, roles: Vec<Role>) -> Self {
        let mut permissions: Vec<Permission> = roles.iter().flat_map(permissions_for).collect();
        permissions.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        permissions.dedup();
        Self {
            actor_id,
            roles,
            permissions,
        }
    }

    /// Parse a comma-separated role list, ignoring blanks.
    pub fn parse_roles(raw: &str) -> Vec<Role> {
        raw.split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| Role::new(r.to_ascii_lowercase()))
            .collect()
    }
}
