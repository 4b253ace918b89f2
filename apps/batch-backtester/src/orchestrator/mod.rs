//! Batch orchestration: partitioning, slot caches, progress aggregation,
//! run-state sequencing, and the orchestrator engine itself.

mod engine;
mod error;
mod events;
pub mod logging;
mod partition;
mod progress;
mod slots;
mod state;

pub use engine::{BatchOrchestrator, BatchOrchestratorBuilder, RunConfiguration};
pub use error::OrchestratorError;
pub use events::{EventBus, OrchestratorEvent};
pub use partition::{BatchPartitioner, Job, total_batches, truncate_jobs};
pub use progress::{BatchProgress, ProgressWatermark, estimate_total, total_percent};
pub use slots::{CacheFactory, SlotCache, SlotCachePool, SlotCaches};
pub use state::{RunState, StateCell};
