//! The work-unit contract and the shared handle the scheduler passes around.

use crate::context::{EventContext, ExecState};
use crate::error::{CoreError, Result, UnitError};
use crate::id::UnitId;
use crate::key::DataKey;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Shared handle to a registered unit.
pub type UnitRef = Arc<Unit>;

/// What a unit reports after running for one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    filter_passed: bool,
    branch_passed: bool,
}

impl Outcome {
    /// The event passes this unit's filter.
    pub fn passed() -> Self {
        Self::from_filter(true)
    }

    /// The event fails this unit's filter.
    pub fn failed() -> Self {
        Self::from_filter(false)
    }

    /// Outcome from a filter decision.
    pub fn from_filter(filter_passed: bool) -> Self {
        Self {
            filter_passed,
            branch_passed: false,
        }
    }

    /// Attach a branch decision (sequences only).
    pub fn with_branch(mut self, branch_passed: bool) -> Self {
        self.branch_passed = branch_passed;
        self
    }

    /// Filter decision.
    pub fn filter_passed(&self) -> bool {
        self.filter_passed
    }

    /// Branch decision.
    pub fn branch_passed(&self) -> bool {
        self.branch_passed
    }
}

/// Capability of units that own other units (sequences).
pub trait Composite {
    /// Every unit this one executes, main list first.
    fn children(&self) -> Vec<UnitRef>;

    /// Boolean expression describing the control flow, e.g. `seq(A & ~B)`.
    fn control_flow_expression(&self) -> String;
}

/// A named, independently executable processing step.
///
/// Implementations must not keep per-event mutable state: everything that
/// changes per event goes through the [`EventContext`]. Units that cannot
/// honour this report a `cardinality()` above one and are served from an
/// instance pool instead.
pub trait WorkUnit: Send + Sync {
    /// Constructable type of this unit.
    fn type_name(&self) -> &str;

    /// Data keys this unit reads. Stable only after `initialize`.
    fn inputs(&self) -> Vec<DataKey> {
        Vec::new()
    }

    /// Data keys this unit writes. Stable only after `initialize`.
    fn outputs(&self) -> Vec<DataKey> {
        Vec::new()
    }

    /// One-time setup; may discover additional inputs.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Called when processing is about to begin.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Called when processing has ended.
    fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Final teardown.
    fn finalize(&self) -> Result<()> {
        Ok(())
    }

    /// Run for one context.
    fn execute(&self, ctx: &mut EventContext) -> std::result::Result<Outcome, UnitError>;

    /// Clear state of nested units for a fresh context.
    fn reset_executed(&self, _ctx: &mut EventContext) {}

    /// Number of interchangeable instances this unit may have (1 = shared).
    fn cardinality(&self) -> usize {
        1
    }

    /// Whether this unit runs off the critical path.
    fn is_async(&self) -> bool {
        false
    }

    /// Composite capability, if this unit owns other units.
    fn as_composite(&self) -> Option<&dyn Composite> {
        None
    }
}

impl<T: WorkUnit + ?Sized> WorkUnit for Arc<T> {
    fn type_name(&self) -> &str {
        (**self).type_name()
    }

    fn inputs(&self) -> Vec<DataKey> {
        (**self).inputs()
    }

    fn outputs(&self) -> Vec<DataKey> {
        (**self).outputs()
    }

    fn initialize(&self) -> Result<()> {
        (**self).initialize()
    }

    fn start(&self) -> Result<()> {
        (**self).start()
    }

    fn stop(&self) -> Result<()> {
        (**self).stop()
    }

    fn finalize(&self) -> Result<()> {
        (**self).finalize()
    }

    fn execute(&self, ctx: &mut EventContext) -> std::result::Result<Outcome, UnitError> {
        (**self).execute(ctx)
    }

    fn reset_executed(&self, ctx: &mut EventContext) {
        (**self).reset_executed(ctx)
    }

    fn cardinality(&self) -> usize {
        (**self).cardinality()
    }

    fn is_async(&self) -> bool {
        (**self).is_async()
    }

    fn as_composite(&self) -> Option<&dyn Composite> {
        (**self).as_composite()
    }
}

/// Lifecycle state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet initialized
    Offline,
    /// Initialized, not processing
    Initialized,
    /// Processing
    Running,
    /// Torn down
    Finalized,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Offline => write!(f, "offline"),
            LifecycleState::Initialized => write!(f, "initialized"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Finalized => write!(f, "finalized"),
        }
    }
}

/// A unit instance plus the bookkeeping the scheduler needs around it.
pub struct Unit {
    id: UnitId,
    name: String,
    enabled: AtomicBool,
    lifecycle: Mutex<LifecycleState>,
    inner: Box<dyn WorkUnit>,
}

impl Unit {
    /// Wrap a unit instance.
    pub fn new(id: UnitId, name: impl Into<String>, inner: Box<dyn WorkUnit>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: AtomicBool::new(true),
            lifecycle: Mutex::new(LifecycleState::Offline),
            inner,
        }
    }

    /// Logical unit id (shared by clones).
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Constructable type.
    pub fn type_name(&self) -> &str {
        self.inner.type_name()
    }

    /// The wrapped unit.
    pub fn inner(&self) -> &dyn WorkUnit {
        self.inner.as_ref()
    }

    /// `"Type/Name"`, or just the name when they coincide.
    pub fn type_and_name(&self) -> String {
        if self.type_name() == self.name {
            self.name.clone()
        } else {
            format!("{}/{}", self.type_name(), self.name)
        }
    }

    /// Whether the unit takes part in execution.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable the unit.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Declared inputs, deduplicated and sorted.
    pub fn inputs(&self) -> BTreeSet<DataKey> {
        self.inner.inputs().into_iter().collect()
    }

    /// Declared outputs, deduplicated and sorted.
    pub fn outputs(&self) -> BTreeSet<DataKey> {
        self.inner.outputs().into_iter().collect()
    }

    /// See [`WorkUnit::cardinality`].
    pub fn cardinality(&self) -> usize {
        self.inner.cardinality()
    }

    /// See [`WorkUnit::is_async`].
    pub fn is_async(&self) -> bool {
        self.inner.is_async()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    /// Initialize the unit. No-op if already initialized.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lifecycle.lock();
        match *state {
            LifecycleState::Offline => {
                self.inner.initialize()?;
                *state = LifecycleState::Initialized;
                debug!("Initialized {}", self.type_and_name());
                Ok(())
            }
            LifecycleState::Initialized | LifecycleState::Running => Ok(()),
            LifecycleState::Finalized => Err(self.invalid("initialize", *state)),
        }
    }

    /// Start the unit. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lifecycle.lock();
        match *state {
            LifecycleState::Initialized => {
                self.inner.start()?;
                *state = LifecycleState::Running;
                Ok(())
            }
            LifecycleState::Running => Ok(()),
            LifecycleState::Offline | LifecycleState::Finalized => Err(self.invalid("start", *state)),
        }
    }

    /// Stop the unit. No-op unless running.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lifecycle.lock();
        if *state == LifecycleState::Running {
            self.inner.stop()?;
            *state = LifecycleState::Initialized;
        }
        Ok(())
    }

    /// Finalize the unit. A running unit must be stopped first.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.lifecycle.lock();
        match *state {
            LifecycleState::Initialized => {
                self.inner.finalize()?;
                *state = LifecycleState::Finalized;
                Ok(())
            }
            LifecycleState::Offline => {
                *state = LifecycleState::Finalized;
                Ok(())
            }
            LifecycleState::Finalized => Ok(()),
            LifecycleState::Running => Err(self.invalid("finalize", *state)),
        }
    }

    /// Run the unit for a context unless it is disabled or already ran there.
    ///
    /// Returns the unit's state in the context afterwards; a skipped unit
    /// still reports the filter decision it recorded earlier.
    pub fn execute_in(&self, ctx: &mut EventContext) -> std::result::Result<ExecState, UnitError> {
        if !self.is_enabled() {
            trace!("{} is disabled, skipping", self.name);
            return Ok(ctx.state(self.id));
        }
        if ctx.is_executed(self.id) {
            trace!("{} already executed in context {}", self.name, ctx.id());
            return Ok(ctx.state(self.id));
        }

        let result = self.inner.execute(ctx);
        let state = ctx.state_mut(self.id);
        state.executed = true;
        let outcome = result?;
        state.filter_passed = outcome.filter_passed();
        state.branch_passed = outcome.branch_passed();
        Ok(*state)
    }

    /// Clear this unit's (and any nested unit's) state in a context.
    pub fn reset_executed(&self, ctx: &mut EventContext) {
        ctx.reset(self.id);
        self.inner.reset_executed(ctx);
    }

    fn invalid(&self, action: &'static str, state: LifecycleState) -> CoreError {
        CoreError::InvalidTransition {
            unit: self.name.clone(),
            action,
            state: state.to_string(),
        }
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.type_name())
            .field("enabled", &self.is_enabled())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
