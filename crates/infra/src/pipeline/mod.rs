//! Delivery orchestration: queue drains, redrives, recommendations and the
//! service facade tying them to the stores.

pub mod error;
pub mod processor;
pub mod recommend;
pub mod redrive;
pub mod service;

pub use error::{ServiceError, ServiceResult};
pub use processor::{ProcessQueueReport, QueueProcessor};
pub use recommend::{ActionOutcome, ActionResult, RecommendationReport, RecommendationRunner};
pub use redrive::{RedriveBatcher, RedriveReport};
pub use service::{DeliverResult, DeliveryDetail, DeliveryService};
