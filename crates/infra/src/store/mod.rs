//! Delivery, attempt and policy storage boundary.
//!
//! The traits make no storage assumptions beyond per-call atomicity; the
//! in-memory implementations back tests and single-node deployments.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{InMemoryDeliveryStore, InMemoryPolicyStore};
pub use r#trait::{DeliveryFilter, DeliveryStore, InsertOutcome, PolicyStore, StoreError};
