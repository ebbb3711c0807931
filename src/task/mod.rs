//! Task submission and result reconciliation

pub mod engine;
pub mod latch;
pub mod metrics;
pub mod model;

pub use engine::{TaskEngine, TaskHandle};
pub use latch::SettleLatch;
pub use metrics::{MetricValue, Metrics, RenderedMetric};
pub use model::{
    EngineEvent, EngineSnapshot, EngineState, Finish, SettleSource, Task, TaskOutcome, TaskStatus,
    TaskUpdate,
};
