use conduit_auth::{Principal, Role};
use conduit_core::ActorId;

/// Caller identity for a request, as forwarded by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(actor_id: ActorId, roles: Vec<Role>) -> Self {
        Self {
            principal: Principal::from_roles(actor_id, roles),
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.principal.actor_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.principal.roles
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}
