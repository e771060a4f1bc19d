//! The event loop driving top-level units.

use crate::dependency::{ExecutionPlan, ResolveError};
use crate::offload::{AsyncOffloadScheduler, OffloadConfig, OffloadError, OffloadTask};
use crate::pool::{InstanceFactory, InstancePool, PoolConfig, PoolError};
use crate::sequence::SequenceError;
use chrono::{DateTime, Utc};
use eventflow_core::{CoreError, EventContext, TypeNameString, Unit, UnitCatalogue, UnitError, UnitRef};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Errors that stop the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Catalogue or lifecycle failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A unit failed while processing an event
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// Plan resolution failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Sequence configuration failed
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// No pooled instance could be made
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The offload scheduler refused work
    #[error(transparent)]
    Offload(#[from] OffloadError),

    /// A configured top-level unit is not in the catalogue
    #[error("unknown top-level unit '{0}'")]
    UnknownUnit(String),
}

/// Configuration for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Events processed in parallel
    pub concurrent_events: usize,
    /// Upper bound on events per run (None = as requested)
    pub max_events: Option<u64>,
    /// `"Type/Name"` tokens of the units run for every event, in order
    pub top_units: Vec<String>,
    /// How long `stop_all` waits for offloaded work, in milliseconds
    pub drain_timeout_ms: u64,
    /// Instance pool settings
    pub pool: PoolConfig,
    /// Offload scheduler settings
    pub offload: OffloadConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrent_events: 1,
            max_events: None,
            top_units: Vec::new(),
            drain_timeout_ms: 30_000,
            pool: PoolConfig::default(),
            offload: OffloadConfig::default(),
        }
    }
}

/// Result of processing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    /// Every inline top-level unit passed its filter
    Accepted,
    /// At least one inline top-level unit failed its filter
    Rejected,
}

/// Summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    /// Events processed
    pub processed: u64,
    /// Events accepted
    pub accepted: u64,
    /// Tasks handed to the offload scheduler
    pub offloaded: u64,
    /// When the run began
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: DateTime<Utc>,
}

impl EngineReport {
    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Fraction of processed events that were accepted.
    pub fn acceptance(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.processed as f64
        }
    }
}

/// Builds pooled instances from the catalogue's factory.
///
/// Instances come back initialized and started.
pub struct CatalogueInstanceFactory {
    catalogue: Arc<UnitCatalogue>,
}

impl CatalogueInstanceFactory {
    /// Create a factory over a catalogue.
    pub fn new(catalogue: Arc<UnitCatalogue>) -> Self {
        Self { catalogue }
    }
}

impl InstanceFactory<Unit> for CatalogueInstanceFactory {
    fn create(&self, name: &str) -> Result<Unit, PoolError> {
        let factory_error = |e: CoreError| PoolError::Factory {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let unit = self.catalogue.instantiate(name).map_err(|e| match e {
            CoreError::UnknownUnit(n) => PoolError::UnknownName(n),
            other => factory_error(other),
        })?;
        unit.initialize().map_err(factory_error)?;
        unit.start().map_err(factory_error)?;
        Ok(unit)
    }
}

/// Drives events through the top-level units.
///
/// Each event gets a fresh [`EventContext`]. A top-level unit runs inline,
/// from the instance pool when it allows more than one instance, or on the
/// offload scheduler when it is asynchronous.
pub struct ExecutionEngine {
    catalogue: Arc<UnitCatalogue>,
    top_units: Vec<UnitRef>,
    pool: InstancePool<Unit>,
    offload: AsyncOffloadScheduler,
    config: EngineConfig,
}

impl ExecutionEngine {
    /// Create an engine running the configured top-level units.
    ///
    /// Entries are `"Type/Name"` tokens; units missing from the catalogue are
    /// created.
    pub fn new(catalogue: Arc<UnitCatalogue>, config: EngineConfig) -> Result<Self, EngineError> {
        let mut top_units = Vec::with_capacity(config.top_units.len());
        for token in &config.top_units {
            let parsed = TypeNameString::parse(token)?;
            let unit = catalogue.find_or_create(&parsed).map_err(|e| match e {
                CoreError::UnknownType(_) | CoreError::UnknownUnit(_) => EngineError::UnknownUnit(token.clone()),
                other => EngineError::Core(other),
            })?;
            top_units.push(unit);
        }
        Ok(Self::with_units(catalogue, top_units, config))
    }

    /// Create an engine running a resolved plan.
    pub fn from_plan(catalogue: Arc<UnitCatalogue>, plan: ExecutionPlan, mut config: EngineConfig) -> Self {
        config.top_units = plan.names().iter().map(|n| n.to_string()).collect();
        Self::with_units(catalogue, plan.into_units(), config)
    }

    fn with_units(catalogue: Arc<UnitCatalogue>, top_units: Vec<UnitRef>, config: EngineConfig) -> Self {
        let factory = Arc::new(CatalogueInstanceFactory::new(Arc::clone(&catalogue)));
        Self {
            pool: InstancePool::new(factory),
            offload: AsyncOffloadScheduler::new(config.offload.clone()),
            catalogue,
            top_units,
            config,
        }
    }

    /// The catalogue.
    pub fn catalogue(&self) -> &Arc<UnitCatalogue> {
        &self.catalogue
    }

    /// Top-level units in execution order.
    pub fn top_units(&self) -> &[UnitRef] {
        &self.top_units
    }

    /// The instance pool.
    pub fn pool(&self) -> &InstancePool<Unit> {
        &self.pool
    }

    /// The offload scheduler.
    pub fn offload(&self) -> &AsyncOffloadScheduler {
        &self.offload
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Initialize every top-level unit and warm the pools.
    pub fn initialize_all(&self) -> Result<(), EngineError> {
        for unit in &self.top_units {
            unit.initialize()?;
        }
        for unit in self.top_units.iter().filter(|u| u.cardinality() > 1) {
            let n = self.config.pool.initial_instances.min(unit.cardinality());
            self.pool.prefill(unit.name(), n)?;
        }
        info!("Initialized {} top-level units", self.top_units.len());
        Ok(())
    }

    /// Start every top-level unit and the offload scheduler.
    pub fn start_all(&self) -> Result<(), EngineError> {
        for unit in &self.top_units {
            unit.start()?;
        }
        if self.top_units.iter().any(|u| u.is_async()) {
            self.offload.start()?;
        }
        Ok(())
    }

    /// Drain offloaded work and stop every top-level unit.
    pub fn stop_all(&self) -> Result<(), EngineError> {
        self.offload.stop()?;
        if !self.offload.wait_idle(Duration::from_millis(self.config.drain_timeout_ms)) {
            warn!(
                "{} offloaded tasks still running after {}ms",
                self.offload.stats().in_flight(),
                self.config.drain_timeout_ms
            );
        }
        for unit in self.top_units.iter().rev() {
            unit.stop()?;
        }
        Ok(())
    }

    /// Finalize every top-level unit and retire pooled instances.
    pub fn finalize_all(&self) -> Result<(), EngineError> {
        for name in self.pool.names() {
            self.pool.drain_with(&name, |instance| {
                if let Err(e) = instance.stop().and_then(|_| instance.finalize()) {
                    warn!("Failed to retire pooled {}: {}", name, e);
                }
            });
        }
        for unit in self.top_units.iter().rev() {
            unit.finalize()?;
        }
        Ok(())
    }

    /// Process one event.
    pub fn run_event(&self, event_number: u64) -> Result<EventResult, EngineError> {
        let mut ctx = EventContext::new(event_number);
        let mut accepted = true;

        for unit in &self.top_units {
            if !unit.is_enabled() {
                trace!("{} is disabled, skipping", unit.name());
                accepted &= ctx.state(unit.id()).filter_passed;
                continue;
            }
            if unit.is_async() {
                self.offload_unit(unit, &ctx)?;
                continue;
            }

            let state = if unit.cardinality() > 1 {
                let instance = self.pool.lease(unit.name())?;
                instance.execute_in(&mut ctx)?
            } else {
                unit.execute_in(&mut ctx)?
            };
            accepted &= state.filter_passed;
        }

        debug!("Event {} {}", event_number, if accepted { "accepted" } else { "rejected" });
        Ok(if accepted {
            EventResult::Accepted
        } else {
            EventResult::Rejected
        })
    }

    /// Process events `0..events` on `concurrent_events` threads.
    ///
    /// The first hard error stops every worker and is returned.
    pub fn run(&self, events: u64) -> Result<EngineReport, EngineError> {
        let total = self.config.max_events.map_or(events, |max| events.min(max));
        let workers = self.config.concurrent_events.clamp(1, total.max(1) as usize);
        let offloaded_before = self.offload.stats().submitted;
        info!("Processing {} events on {} threads", total, workers);

        let started_at = Utc::now();
        let next = AtomicU64::new(0);
        let processed = AtomicU64::new(0);
        let accepted = AtomicU64::new(0);
        let abort = AtomicBool::new(false);
        let failure: Mutex<Option<EngineError>> = Mutex::new(None);

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    while !abort.load(Ordering::Acquire) {
                        let event = next.fetch_add(1, Ordering::AcqRel);
                        if event >= total {
                            break;
                        }
                        match self.run_event(event) {
                            Ok(result) => {
                                processed.fetch_add(1, Ordering::AcqRel);
                                if result == EventResult::Accepted {
                                    accepted.fetch_add(1, Ordering::AcqRel);
                                }
                            }
                            Err(e) => {
                                error!("Event {} failed: {}", event, e);
                                abort.store(true, Ordering::Release);
                                failure.lock().get_or_insert(e);
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = failure.into_inner() {
            return Err(e);
        }

        let report = EngineReport {
            processed: processed.into_inner(),
            accepted: accepted.into_inner(),
            offloaded: self.offload.stats().submitted - offloaded_before,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Processed {} events, {} accepted, in {}ms",
            report.processed,
            report.accepted,
            report.duration().num_milliseconds()
        );
        Ok(report)
    }

    fn offload_unit(&self, unit: &UnitRef, ctx: &EventContext) -> Result<(), EngineError> {
        let mut child = ctx.fork();
        let unit = Arc::clone(unit);
        let name = format!("{}@{}", unit.name(), ctx.event_number());
        self.offload.submit(OffloadTask::new(name, move || {
            unit.execute_in(&mut child)?;
            Ok(())
        }))?;
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.top_units.iter().map(|u| u.name()).collect();
        f.debug_struct("ExecutionEngine")
            .field("top_units", &names)
            .field("config", &self.config)
            .finish()
    }
}
