use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permissions granted by a role. Unknown roles grant nothing.
pub fn permissions_for(role: &Role) -> Vec<Permission> {
    match role.as_str() {
        "admin" => vec![Permission::WILDCARD],
        "operator" => vec![
            Permission::DELIVERIES_WRITE,
            Permission::QUEUE_PROCESS,
            Permission::QUEUE_REDRIVE,
            Permission::DELIVERIES_READ,
        ],
        "viewer" => vec![Permission::DELIVERIES_READ],
        "approver" => vec![Permission::POLICY_APPROVE],
        _ => Vec::new(),
    }
}
