//! Sequential control flow with filter-driven branching.
//!
//! A [`ControlFlowSequence`] runs its members in order and adopts each
//! member's filter decision (optionally inverted) as its own. Unless
//! `stop_override` is set, the first failing member stops the list. If the
//! list stopped on the first member of the branch list, the rest of the
//! branch list runs next.

use eventflow_core::{
    Composite, CoreError, DataKey, EventContext, MemberToken, Outcome, UnitCatalogue, UnitError,
    UnitId, UnitRef, WorkUnit,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Errors raised by sequence configuration and execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    /// Token parsing, unit lookup or creation failed
    #[error(transparent)]
    Config(#[from] CoreError),

    /// The unit is already in this list
    #[error("'{member}' is already a member of '{sequence}'")]
    DuplicateMember {
        /// Sequence name
        sequence: String,
        /// Member name
        member: String,
    },

    /// Adding the unit would make the sequence contain itself
    #[error("'{member}' would make sequence '{sequence}' contain itself")]
    SelfMember {
        /// Sequence name
        sequence: String,
        /// Member name
        member: String,
    },

    /// No member with this name
    #[error("'{member}' is not a member of '{sequence}'")]
    NotAMember {
        /// Sequence name
        sequence: String,
        /// Member name
        member: String,
    },

    /// A member's run step failed
    #[error(transparent)]
    Execution(#[from] UnitError),
}

/// Sequence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// `"Type/Name"` or `"Type/Name:invert"` member tokens
    pub members: Vec<String>,
    /// Branch list tokens; the first one is the trigger
    pub branch_members: Vec<String>,
    /// Run every member regardless of filter failures
    pub stop_override: bool,
}

/// One entry of a member list.
#[derive(Debug, Clone)]
pub struct Member {
    unit: UnitRef,
    invert: bool,
}

impl Member {
    /// The member unit.
    pub fn unit(&self) -> &UnitRef {
        &self.unit
    }

    /// Whether the member's filter decision is inverted.
    pub fn invert(&self) -> bool {
        self.invert
    }
}

#[derive(Debug, Clone, Default)]
struct Lists {
    main: Vec<Member>,
    branch: Vec<Member>,
}

#[derive(Clone, Copy)]
enum ListKind {
    Main,
    Branch,
}

/// Where a list run ended.
struct ListRun {
    passed: bool,
    last: Option<UnitId>,
}

/// An ordered list of units with an optional branch list.
pub struct ControlFlowSequence {
    name: String,
    stop_override: AtomicBool,
    initialized: AtomicBool,
    running: AtomicBool,
    lists: RwLock<Arc<Lists>>,
}

impl ControlFlowSequence {
    /// Type name under which sequences are registered.
    pub const TYPE: &'static str = "Sequencer";

    /// Create an empty sequence.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stop_override: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            lists: RwLock::new(Arc::new(Lists::default())),
        }
    }

    /// Create a sequence and decode its member lists.
    pub fn from_config(
        name: impl Into<String>,
        config: &SequenceConfig,
        catalogue: &UnitCatalogue,
    ) -> Result<Self, SequenceError> {
        let seq = Self::new(name);
        seq.set_stop_override(config.stop_override);
        seq.decode_names(&config.members, catalogue)?;
        seq.decode_branch_names(&config.branch_members, catalogue)?;
        Ok(seq)
    }

    /// Sequence name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether filter failures are ignored.
    pub fn stop_override(&self) -> bool {
        self.stop_override.load(Ordering::Acquire)
    }

    /// Set the stop override.
    pub fn set_stop_override(&self, value: bool) {
        self.stop_override.store(value, Ordering::Release);
    }

    /// Main list members.
    pub fn members(&self) -> Vec<Member> {
        self.lists.read().main.clone()
    }

    /// Branch list members (trigger first).
    pub fn branch_members(&self) -> Vec<Member> {
        self.lists.read().branch.clone()
    }

    /// Append a unit to the main list.
    pub fn append(&self, unit: UnitRef, invert: bool) -> Result<(), SequenceError> {
        self.append_to(ListKind::Main, unit, invert)
    }

    /// Append a unit to the branch list.
    pub fn append_to_branch(&self, unit: UnitRef, invert: bool) -> Result<(), SequenceError> {
        self.append_to(ListKind::Branch, unit, invert)
    }

    /// Remove a unit from the main list by name.
    pub fn remove(&self, name: &str) -> Result<UnitRef, SequenceError> {
        self.remove_from(ListKind::Main, name)
    }

    /// Remove a unit from the branch list by name.
    pub fn remove_from_branch(&self, name: &str) -> Result<UnitRef, SequenceError> {
        self.remove_from(ListKind::Branch, name)
    }

    /// Replace the main list with the units named by `tokens`.
    ///
    /// Units are looked up in the catalogue and created when missing. On
    /// error the current list is left as it was.
    pub fn decode_names(&self, tokens: &[String], catalogue: &UnitCatalogue) -> Result<(), SequenceError> {
        self.decode_into(ListKind::Main, tokens, catalogue)
    }

    /// Replace the branch list with the units named by `tokens`.
    pub fn decode_branch_names(&self, tokens: &[String], catalogue: &UnitCatalogue) -> Result<(), SequenceError> {
        self.decode_into(ListKind::Branch, tokens, catalogue)
    }

    /// Run the member lists for one context.
    ///
    /// A hard failure of any member aborts immediately and is returned.
    pub fn run(&self, ctx: &mut EventContext) -> Result<Outcome, UnitError> {
        let lists = Arc::clone(&self.lists.read());
        let stop_override = self.stop_override();

        let main = self.run_list(&lists.main, 0, true, stop_override, ctx)?;
        debug!("{} main list filter passed: {}", self.name, main.passed);

        if main.passed || stop_override {
            return Ok(Outcome::from_filter(main.passed));
        }

        match lists.branch.first() {
            Some(trigger) if main.last == Some(trigger.unit.id()) => {
                debug!("{} stopped at {}, running branch", self.name, trigger.unit.name());
                let branch = self.run_list(&lists.branch, 1, main.passed, stop_override, ctx)?;
                Ok(Outcome::from_filter(branch.passed).with_branch(branch.passed))
            }
            _ => Ok(Outcome::from_filter(main.passed)),
        }
    }

    /// Clear the state of every member, recursively.
    pub fn reset_members(&self, ctx: &mut EventContext) {
        let lists = Arc::clone(&self.lists.read());
        for member in lists.main.iter().chain(lists.branch.iter()) {
            member.unit.reset_executed(ctx);
        }
    }

    fn run_list(
        &self,
        members: &[Member],
        first: usize,
        initial: bool,
        stop_override: bool,
        ctx: &mut EventContext,
    ) -> Result<ListRun, UnitError> {
        let mut run = ListRun {
            passed: initial,
            last: None,
        };

        for member in members.iter().skip(first) {
            run.last = Some(member.unit.id());
            let state = member.unit.execute_in(ctx)?;
            run.passed = state.filter_passed != member.invert;
            trace!(
                "{} returned filter passed {}{}",
                member.unit.name(),
                state.filter_passed,
                if member.invert { " (inverted)" } else { "" }
            );

            if !stop_override && !run.passed {
                break;
            }
        }

        Ok(run)
    }

    fn append_to(&self, kind: ListKind, unit: UnitRef, invert: bool) -> Result<(), SequenceError> {
        self.check_nesting(&unit)?;

        let mut guard = self.lists.write();
        let mut lists = (**guard).clone();
        let list = match kind {
            ListKind::Main => &mut lists.main,
            ListKind::Branch => &mut lists.branch,
        };
        if list.iter().any(|m| m.unit.id() == unit.id()) {
            return Err(SequenceError::DuplicateMember {
                sequence: self.name.clone(),
                member: unit.name().to_string(),
            });
        }

        self.sync_lifecycle(&unit)?;
        list.push(Member { unit, invert });
        *guard = Arc::new(lists);
        Ok(())
    }

    fn remove_from(&self, kind: ListKind, name: &str) -> Result<UnitRef, SequenceError> {
        let mut guard = self.lists.write();
        let mut lists = (**guard).clone();
        let list = match kind {
            ListKind::Main => &mut lists.main,
            ListKind::Branch => &mut lists.branch,
        };
        let index = list
            .iter()
            .position(|m| m.unit.name() == name)
            .ok_or_else(|| SequenceError::NotAMember {
                sequence: self.name.clone(),
                member: name.to_string(),
            })?;

        let removed = list.remove(index);
        *guard = Arc::new(lists);
        Ok(removed.unit)
    }

    fn decode_into(&self, kind: ListKind, tokens: &[String], catalogue: &UnitCatalogue) -> Result<(), SequenceError> {
        let parsed = tokens
            .iter()
            .map(|t| MemberToken::parse(t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut decoded: Vec<Member> = Vec::with_capacity(parsed.len());
        for token in parsed {
            let unit = catalogue.find_or_create(&token.type_name)?;
            self.check_nesting(&unit)?;
            if decoded.iter().any(|m| m.unit.id() == unit.id()) {
                return Err(SequenceError::DuplicateMember {
                    sequence: self.name.clone(),
                    member: unit.name().to_string(),
                });
            }
            decoded.push(Member {
                unit,
                invert: token.invert,
            });
        }

        for member in &decoded {
            self.sync_lifecycle(&member.unit)?;
        }

        if !decoded.is_empty() {
            let listing: Vec<String> = decoded
                .iter()
                .map(|m| {
                    let mut s = m.unit.type_and_name();
                    if m.invert {
                        s.push_str(":invert");
                    }
                    s
                })
                .collect();
            let label = match kind {
                ListKind::Main => "Member list",
                ListKind::Branch => "Branch member list",
            };
            info!("{} {}: {}", self.name, label, listing.join(", "));
        }

        let mut guard = self.lists.write();
        let mut lists = (**guard).clone();
        match kind {
            ListKind::Main => lists.main = decoded,
            ListKind::Branch => lists.branch = decoded,
        }
        *guard = Arc::new(lists);
        Ok(())
    }

    /// Bring a new member up to this sequence's lifecycle state.
    fn sync_lifecycle(&self, unit: &UnitRef) -> Result<(), SequenceError> {
        if self.initialized.load(Ordering::Acquire) {
            unit.initialize()?;
        }
        if self.running.load(Ordering::Acquire) {
            unit.start()?;
        }
        Ok(())
    }

    fn check_nesting(&self, unit: &UnitRef) -> Result<(), SequenceError> {
        if contains_name(unit, &self.name) {
            return Err(SequenceError::SelfMember {
                sequence: self.name.clone(),
                member: unit.name().to_string(),
            });
        }
        Ok(())
    }

    fn all_units(&self) -> Vec<UnitRef> {
        let lists = Arc::clone(&self.lists.read());
        let mut units: Vec<UnitRef> = Vec::new();
        for member in lists.main.iter().chain(lists.branch.iter()) {
            if !units.iter().any(|u| u.id() == member.unit.id()) {
                units.push(Arc::clone(&member.unit));
            }
        }
        units
    }
}

/// Whether `unit` is, or transitively contains, a unit called `name`.
fn contains_name(unit: &UnitRef, name: &str) -> bool {
    if unit.name() == name {
        return true;
    }
    unit.inner()
        .as_composite()
        .map(|c| c.children().iter().any(|child| contains_name(child, name)))
        .unwrap_or(false)
}

impl WorkUnit for ControlFlowSequence {
    fn type_name(&self) -> &str {
        Self::TYPE
    }

    /// Inputs of the members not produced inside the sequence.
    fn inputs(&self) -> Vec<DataKey> {
        let units = self.all_units();
        let produced: BTreeSet<DataKey> = units.iter().flat_map(|u| u.outputs()).collect();
        let needed: BTreeSet<DataKey> = units
            .iter()
            .flat_map(|u| u.inputs())
            .filter(|k| !produced.contains(k))
            .collect();
        needed.into_iter().collect()
    }

    fn outputs(&self) -> Vec<DataKey> {
        let produced: BTreeSet<DataKey> = self.all_units().iter().flat_map(|u| u.outputs()).collect();
        produced.into_iter().collect()
    }

    fn initialize(&self) -> eventflow_core::Result<()> {
        for unit in self.all_units() {
            unit.initialize()?;
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn start(&self) -> eventflow_core::Result<()> {
        for unit in self.all_units() {
            unit.start()?;
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> eventflow_core::Result<()> {
        self.running.store(false, Ordering::Release);
        for unit in self.all_units() {
            unit.stop()?;
        }
        Ok(())
    }

    fn finalize(&self) -> eventflow_core::Result<()> {
        self.initialized.store(false, Ordering::Release);
        for unit in self.all_units() {
            unit.finalize()?;
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut EventContext) -> Result<Outcome, UnitError> {
        self.run(ctx)
    }

    fn reset_executed(&self, ctx: &mut EventContext) {
        self.reset_members(ctx);
    }

    fn as_composite(&self) -> Option<&dyn Composite> {
        Some(self)
    }
}

impl Composite for ControlFlowSequence {
    fn children(&self) -> Vec<UnitRef> {
        self.all_units()
    }

    fn control_flow_expression(&self) -> String {
        let lists = Arc::clone(&self.lists.read());
        if lists.main.is_empty() {
            return "CFTrue".to_string();
        }

        let op = if self.stop_override() { " >> " } else { " & " };
        let parts: Vec<String> = lists
            .main
            .iter()
            .map(|m| {
                let inner = m
                    .unit
                    .inner()
                    .as_composite()
                    .map(|c| c.control_flow_expression())
                    .unwrap_or_else(|| m.unit.name().to_string());
                if m.invert {
                    format!("~{}", inner)
                } else {
                    inner
                }
            })
            .collect();
        format!("seq({})", parts.join(op))
    }
}

impl std::fmt::Debug for ControlFlowSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlFlowSequence")
            .field("name", &self.name)
            .field("stop_override", &self.stop_override())
            .field("expression", &self.control_flow_expression())
            .finish()
    }
}
