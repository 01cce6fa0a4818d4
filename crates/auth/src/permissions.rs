use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "deliveries.read"). The wildcard `"*"`
/// grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub const DELIVERIES_READ: Permission = Permission(Cow::Borrowed("deliveries.read"));
    pub const DELIVERIES_WRITE: Permission = Permission(Cow::Borrowed("deliveries.write"));
    pub const QUEUE_PROCESS: Permission = Permission(Cow::Borrowed("queue.process"));
    pub const QUEUE_REDRIVE: Permission = Permission(Cow::Borrowed("queue.redrive"));
    pub const POLICY_WRITE: Permission = Permission(Cow::Borrowed("policy.write"));
    pub const POLICY_APPROVE: Permission = Permission(Cow::Borrowed("policy.approve"));
    pub const RECOMMENDATIONS_RUN: Permission = Permission(Cow::Borrowed("recommendations.run"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
