//! Per-event execution context.
//!
//! Everything that changes while an event is processed lives here rather than
//! in the units: the `executed`/`filter_passed` flags of every unit and the
//! event's data. Independent contexts can therefore drive the same shared
//! units from different threads.

use crate::id::{ContextId, UnitId};
use crate::key::DataKey;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Execution state of one unit within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecState {
    /// The unit ran (or was skipped as already run) in this context
    pub executed: bool,
    /// The unit's filter decision
    pub filter_passed: bool,
    /// For sequences: the outcome of the branch list, when it ran
    pub branch_passed: bool,
}

impl Default for ExecState {
    fn default() -> Self {
        Self {
            executed: false,
            filter_passed: true,
            branch_passed: false,
        }
    }
}

/// Concurrent key/value store holding an event's data.
#[derive(Debug, Default)]
pub struct EventStore {
    data: DashMap<DataKey, Value>,
}

impl EventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one.
    pub fn put(&self, key: impl Into<DataKey>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// Get a copy of a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.value().clone())
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<DataKey> {
        let mut keys: Vec<_> = self.data.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// State of one execution context (one event).
#[derive(Debug)]
pub struct EventContext {
    id: ContextId,
    event_number: u64,
    states: Vec<ExecState>,
    store: Arc<EventStore>,
}

impl EventContext {
    /// Create a fresh context for an event.
    pub fn new(event_number: u64) -> Self {
        Self {
            id: ContextId::new(),
            event_number,
            states: Vec::new(),
            store: Arc::new(EventStore::new()),
        }
    }

    /// Context for the same event with fresh unit states and a shared store.
    ///
    /// Used for units that run off the critical path.
    pub fn fork(&self) -> Self {
        Self {
            id: ContextId::new(),
            event_number: self.event_number,
            states: Vec::new(),
            store: Arc::clone(&self.store),
        }
    }

    /// Context identifier.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Event number.
    pub fn event_number(&self) -> u64 {
        self.event_number
    }

    /// State of a unit (default state if it never ran here).
    pub fn state(&self, unit: UnitId) -> ExecState {
        self.states.get(unit.index()).copied().unwrap_or_default()
    }

    /// Mutable state of a unit.
    pub fn state_mut(&mut self, unit: UnitId) -> &mut ExecState {
        let index = unit.index();
        if index >= self.states.len() {
            self.states.resize(index + 1, ExecState::default());
        }
        &mut self.states[index]
    }

    /// Whether a unit has executed in this context.
    pub fn is_executed(&self, unit: UnitId) -> bool {
        self.state(unit).executed
    }

    /// Filter decision of a unit in this context.
    pub fn filter_passed(&self, unit: UnitId) -> bool {
        self.state(unit).filter_passed
    }

    /// Set the executed flag of a unit.
    pub fn set_executed(&mut self, unit: UnitId, executed: bool) {
        self.state_mut(unit).executed = executed;
    }

    /// Set the filter decision of a unit.
    pub fn set_filter_passed(&mut self, unit: UnitId, passed: bool) {
        self.state_mut(unit).filter_passed = passed;
    }

    /// Reset one unit to its default state.
    pub fn reset(&mut self, unit: UnitId) {
        if let Some(state) = self.states.get_mut(unit.index()) {
            *state = ExecState::default();
        }
    }

    /// Reset every unit.
    pub fn reset_all(&mut self) {
        self.states.iter_mut().for_each(|s| *s = ExecState::default());
    }

    /// The event's data.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Shared handle to the event's data.
    pub fn shared_store(&self) -> Arc<EventStore> {
        Arc::clone(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_state() {
        let ctx = EventContext::new(7);
        let state = ctx.state(UnitId::new(3));
        assert!(!state.executed);
        assert!(state.filter_passed);
        assert!(!state.branch_passed);
        assert_eq!(ctx.event_number(), 7);
    }

    #[test]
    fn test_state_mut_grows() {
        let mut ctx = EventContext::new(0);
        ctx.set_executed(UnitId::new(5), true);
        ctx.set_filter_passed(UnitId::new(5), false);
        assert!(ctx.is_executed(UnitId::new(5)));
        assert!(!ctx.filter_passed(UnitId::new(5)));
        assert!(!ctx.is_executed(UnitId::new(2)));

        ctx.reset(UnitId::new(5));
        assert_eq!(ctx.state(UnitId::new(5)), ExecState::default());
    }

    #[test]
    fn test_fork_shares_store() {
        let ctx = EventContext::new(1);
        ctx.store().put("a", json!(1));

        let mut child = ctx.fork();
        child.set_executed(UnitId::new(0), true);
        child.store().put("b", json!(2));

        assert_ne!(ctx.id(), child.id());
        assert!(!ctx.is_executed(UnitId::new(0)));
        assert_eq!(ctx.store().get("b"), Some(json!(2)));
        assert_eq!(child.store().keys(), vec![DataKey::new("a"), DataKey::new("b")]);
    }
}
