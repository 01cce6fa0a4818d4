//! `conduit-core`: identifiers and the shared error model.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{ActorId, AttemptId, DeliveryId, DraftId, ProjectId};
