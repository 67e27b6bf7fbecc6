pub mod error;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod redis_store;
pub mod store;

pub use error::{Disposition, QueueError};
pub use memory::MemoryStore;
pub use message::{event_name, in_flight_key, preview, IN_FLIGHT_SUFFIX};
pub use metrics::{MetricsSnapshot, QueueMetrics};
pub use queue::{
    Delivery, EventStats, HandlerFuture, MessageHandler, Publisher, Queue, TickReport,
    DEFAULT_INTERVAL,
};
pub use redis_store::RedisStore;
pub use store::ListStore;
