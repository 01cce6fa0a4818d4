//! Infrastructure layer: stores, transports, audit log and the delivery
//! pipeline that drives them.

pub mod audit;
pub mod clock;
pub mod pipeline;
pub mod store;
pub mod transport;
pub mod workers;

#[cfg(test)]
mod test_support;

pub use pipeline::{DeliveryService, ServiceError, ServiceResult};
