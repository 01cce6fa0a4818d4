//! Background drivers.

pub mod delivery_worker;

pub use delivery_worker::{
    AtomicTickGuard, DeliveryWorker, DeliveryWorkerConfig, TickGuard, TickReport, WorkerHandle,
    WorkerStats,
};
