//! `conduit-auth`: pure authorization boundary.
//!
//! Identity is established upstream (gateway); this crate only maps roles to
//! permissions and checks them. No HTTP, no storage.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize};
pub use permissions::Permission;
pub use principal::Principal;
pub use roles::{Role, permissions_for};
