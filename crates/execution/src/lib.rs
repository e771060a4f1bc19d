//! Execution layer - dependency resolution, control flow, instance pooling
//! and offloaded execution.

#![warn(missing_docs)]

pub mod dependency;
pub mod sequence;
pub mod pool;
pub mod offload;
pub mod engine;

pub use dependency::{DependencyResolver, ExecutionPlan, ResolveError, ResolverConfig};
pub use sequence::{ControlFlowSequence, Member, SequenceConfig, SequenceError};
pub use pool::{InstanceCounter, InstanceFactory, InstancePool, Lease, PoolConfig, PoolError, PoolStats};
pub use offload::{AsyncOffloadScheduler, OffloadConfig, OffloadError, OffloadState, OffloadStats, OffloadTask};
pub use engine::{CatalogueInstanceFactory, EngineConfig, EngineError, EngineReport, EventResult, ExecutionEngine};
