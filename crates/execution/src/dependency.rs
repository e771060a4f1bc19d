//! Dependency resolution: from requested data to an ordered execution plan.

use eventflow_core::{CoreError, DataKey, TypeNameString, UnitCatalogue, UnitId, UnitRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors raised while building a resolver or resolving a plan.
///
/// All of them are terminal for the call that raised them; the catalogue
/// is left untouched so a corrected request can be retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Nothing produces this key and no data loader is configured
    #[error(
        "unmet dependency '{key}'{}",
        .consumer.as_ref().map(|c| format!(" required by '{}'", c)).unwrap_or_default()
    )]
    UnmetDependency {
        /// The key nobody produces
        key: DataKey,
        /// The unit that needed it, if any
        consumer: Option<String>,
    },

    /// The producers form a cycle
    #[error("dependency cycle: {}", .path.join(" -> "))]
    CycleDetected {
        /// Unit names along the cycle, first one repeated at the end
        path: Vec<String>,
    },

    /// A unit could not be created or initialized
    #[error("failed to initialize '{unit}': {reason}")]
    InitializationFailed {
        /// Unit token
        unit: String,
        /// What went wrong
        reason: String,
    },

    /// The requested unit is neither registered nor constructable
    #[error("unknown unit: {0}")]
    UnknownUnit(String),
}

/// Resolver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// `"Type/Name"` tokens of the units that may be scheduled to produce data
    pub producers: Vec<String>,
    /// Unit that is made responsible for any key no producer declares
    pub data_loader: Option<String>,
}

/// An ordered, duplicate-free list of units.
///
/// Every unit appears after the producers of its inputs, unless it was
/// named as a stopper. The order is a valid topological order but not the
/// only one: resolving again after the catalogue changed may give a
/// different, equally valid order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    units: Vec<UnitRef>,
}

impl ExecutionPlan {
    /// Units in execution order.
    pub fn units(&self) -> &[UnitRef] {
        &self.units
    }

    /// Iterate in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &UnitRef> {
        self.units.iter()
    }

    /// Unit names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    /// Position of a unit in the plan.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.units.iter().position(|u| u.name() == name)
    }

    /// Whether the plan contains a unit.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Take the units.
    pub fn into_units(self) -> Vec<UnitRef> {
        self.units
    }
}

impl IntoIterator for ExecutionPlan {
    type Item = UnitRef;
    type IntoIter = std::vec::IntoIter<UnitRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_iter()
    }
}

struct ProducerEntry {
    unit: UnitRef,
    requests: AtomicUsize,
}

/// Turns requested data keys into execution plans.
///
/// Every configured producer is created and initialized up front, because a
/// unit may only know its full set of inputs after its own initialization.
/// Without configured producers, every unit already in the catalogue is one.
pub struct DependencyResolver {
    catalogue: Arc<UnitCatalogue>,
    entries: Vec<ProducerEntry>,
    by_unit: HashMap<UnitId, usize>,
    producers: HashMap<DataKey, usize>,
    loader: Option<usize>,
}

impl DependencyResolver {
    /// Create the resolver, instantiating and initializing all producers.
    pub fn new(catalogue: Arc<UnitCatalogue>, config: &ResolverConfig) -> Result<Self, ResolveError> {
        let mut resolver = Self {
            catalogue,
            entries: Vec::new(),
            by_unit: HashMap::new(),
            producers: HashMap::new(),
            loader: None,
        };

        if config.producers.is_empty() {
            for unit in resolver.catalogue.units() {
                initialize(&unit, &unit.type_and_name())?;
                resolver.add_entry(unit);
            }
        }
        for token in &config.producers {
            let unit = resolver.materialize(token)?;
            resolver.add_entry(unit);
        }
        if let Some(token) = &config.data_loader {
            let unit = resolver.materialize(token)?;
            resolver.loader = Some(resolver.add_entry(unit));
        }

        resolver.map_producers();

        let names: Vec<String> = resolver.entries.iter().map(|e| e.unit.type_and_name()).collect();
        info!("Available data producers: {}", names.join(", "));

        Ok(resolver)
    }

    /// Plan the units needed to produce `requested`.
    ///
    /// Units named in `stoppers` are included but their own inputs are not
    /// expanded.
    pub fn resolve(
        &self,
        requested: &BTreeSet<DataKey>,
        stoppers: &HashSet<String>,
    ) -> Result<ExecutionPlan, ResolveError> {
        let mut walk = Walk::new(self, stoppers);
        for key in requested {
            let producer = self.producer_for(key, None)?;
            walk.visit(&producer)?;
        }

        let plan = walk.finish();
        self.record(&plan);
        info!(
            "Requested {} -> {}",
            requested.iter().map(DataKey::as_str).collect::<Vec<_>>().join(", "),
            plan.names().join(", ")
        );
        Ok(plan)
    }

    /// Plan a unit together with everything it needs, the unit itself last.
    ///
    /// `unit` is a `"Type/Name"` token; an unregistered unit is created.
    pub fn resolve_for_unit(
        &self,
        unit: &str,
        stoppers: &HashSet<String>,
    ) -> Result<ExecutionPlan, ResolveError> {
        let target = self.materialize(unit)?;

        let mut walk = Walk::new(self, stoppers);
        walk.visit(&target)?;

        let plan = walk.finish();
        self.record(&plan);
        info!("Requested {} -> {}", target.type_and_name(), plan.names().join(", "));
        Ok(plan)
    }

    /// Name of the unit producing a key, if any.
    pub fn producer_of(&self, key: &DataKey) -> Option<&str> {
        self.producers.get(key).map(|&i| self.entries[i].unit.name())
    }

    /// All producer mappings, sorted by key.
    pub fn producers(&self) -> Vec<(&DataKey, &str)> {
        let mut list: Vec<_> = self
            .producers
            .iter()
            .map(|(key, &i)| (key, self.entries[i].unit.name()))
            .collect();
        list.sort();
        list
    }

    /// How many plans included the named producer.
    pub fn request_count(&self, name: &str) -> usize {
        self.entries
            .iter()
            .find(|e| e.unit.name() == name)
            .map(|e| e.requests.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Producers that never made it into a plan.
    pub fn unused_producers(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.requests.load(Ordering::Relaxed) == 0)
            .map(|e| e.unit.name())
            .collect()
    }

    /// Report producers that were never used.
    pub fn finalize(&self) {
        for name in self.unused_producers() {
            warn!("Unused data producer: {}", name);
        }
    }

    fn materialize(&self, token: &str) -> Result<UnitRef, ResolveError> {
        let type_name = TypeNameString::parse(token).map_err(|e| ResolveError::InitializationFailed {
            unit: token.to_string(),
            reason: e.to_string(),
        })?;

        let unit = self
            .catalogue
            .find_or_create(&type_name)
            .map_err(|e| match e {
                CoreError::UnknownType(_) => ResolveError::UnknownUnit(type_name.to_string()),
                other => ResolveError::InitializationFailed {
                    unit: type_name.to_string(),
                    reason: other.to_string(),
                },
            })?;

        initialize(&unit, &type_name.to_string())?;
        Ok(unit)
    }

    fn add_entry(&mut self, unit: UnitRef) -> usize {
        if let Some(&index) = self.by_unit.get(&unit.id()) {
            return index;
        }
        let index = self.entries.len();
        self.by_unit.insert(unit.id(), index);
        self.entries.push(ProducerEntry {
            unit,
            requests: AtomicUsize::new(0),
        });
        index
    }

    fn map_producers(&mut self) {
        for (index, entry) in self.entries.iter().enumerate() {
            let outputs = entry.unit.outputs();
            if outputs.is_empty() {
                if Some(index) != self.loader {
                    warn!(
                        "{} does not produce any data, ignoring it as a producer",
                        entry.unit.type_and_name()
                    );
                }
                continue;
            }

            for key in outputs {
                if key.has_alternatives() {
                    warn!(
                        "{} declares output '{}': alternatives are not allowed for outputs",
                        entry.unit.type_and_name(),
                        key
                    );
                }
                match self.producers.get(&key) {
                    Some(&first) => warn!(
                        "'{}' is produced by both {} and {}, keeping {}",
                        key,
                        self.entries[first].unit.name(),
                        entry.unit.name(),
                        self.entries[first].unit.name()
                    ),
                    None => {
                        self.producers.insert(key, index);
                    }
                }
            }
        }
    }

    fn producer_for(&self, key: &DataKey, consumer: Option<&str>) -> Result<UnitRef, ResolveError> {
        if let Some(&index) = self.producers.get(key) {
            return Ok(Arc::clone(&self.entries[index].unit));
        }

        if key.has_alternatives() {
            let matched = key
                .alternatives()
                .into_iter()
                .find_map(|alt| self.producers.get(&alt).map(|&i| (alt, i)));
            if let Some((alt, index)) = matched {
                warn!(
                    "Input '{}' lists alternatives, using '{}'; configure the data loader instead",
                    key, alt
                );
                return Ok(Arc::clone(&self.entries[index].unit));
            }
        }

        if let Some(index) = self.loader {
            debug!("Attributing '{}' to data loader {}", key, self.entries[index].unit.name());
            return Ok(Arc::clone(&self.entries[index].unit));
        }

        Err(ResolveError::UnmetDependency {
            key: key.clone(),
            consumer: consumer.map(str::to_string),
        })
    }

    fn record(&self, plan: &ExecutionPlan) {
        for unit in plan.iter() {
            if let Some(&index) = self.by_unit.get(&unit.id()) {
                self.entries[index].requests.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Depth-first post-order traversal state for one resolve call.
struct Walk<'a> {
    resolver: &'a DependencyResolver,
    stoppers: &'a HashSet<String>,
    visited: HashSet<UnitId>,
    visiting: HashSet<UnitId>,
    path: Vec<UnitRef>,
    plan: Vec<UnitRef>,
}

impl<'a> Walk<'a> {
    fn new(resolver: &'a DependencyResolver, stoppers: &'a HashSet<String>) -> Self {
        Self {
            resolver,
            stoppers,
            visited: HashSet::new(),
            visiting: HashSet::new(),
            path: Vec::new(),
            plan: Vec::new(),
        }
    }

    fn visit(&mut self, unit: &UnitRef) -> Result<(), ResolveError> {
        if self.visited.contains(&unit.id()) {
            return Ok(());
        }
        if self.visiting.contains(&unit.id()) {
            return Err(self.cycle_through(unit));
        }

        if self.stoppers.contains(unit.name()) {
            debug!("{} is a stopper, not expanding its inputs", unit.name());
        } else {
            self.visiting.insert(unit.id());
            self.path.push(Arc::clone(unit));

            for key in unit.inputs() {
                let producer = self.resolver.producer_for(&key, Some(unit.name()))?;
                self.visit(&producer)?;
            }

            self.path.pop();
            self.visiting.remove(&unit.id());
        }

        self.visited.insert(unit.id());
        self.plan.push(Arc::clone(unit));
        Ok(())
    }

    fn cycle_through(&self, unit: &UnitRef) -> ResolveError {
        let start = self
            .path
            .iter()
            .position(|u| u.id() == unit.id())
            .unwrap_or(0);
        let mut path: Vec<String> = self.path[start..].iter().map(|u| u.name().to_string()).collect();
        path.push(unit.name().to_string());
        ResolveError::CycleDetected { path }
    }

    fn finish(self) -> ExecutionPlan {
        ExecutionPlan { units: self.plan }
    }
}

fn initialize(unit: &UnitRef, label: &str) -> Result<(), ResolveError> {
    unit.initialize().map_err(|e| ResolveError::InitializationFailed {
        unit: label.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventflow_core::{
        EventContext, FactoryRegistry, Outcome, UnitError, UnitFactory, WorkUnit,
    };
    use parking_lot::RwLock;

    /// Unit with declared keys; may discover one more input on initialize.
    struct Declared {
        inputs: RwLock<Vec<DataKey>>,
        outputs: Vec<DataKey>,
        discovered: Option<DataKey>,
        fail_init: bool,
    }

    impl WorkUnit for Declared {
        fn type_name(&self) -> &str {
            "Declared"
        }

        fn inputs(&self) -> Vec<DataKey> {
            self.inputs.read().clone()
        }

        fn outputs(&self) -> Vec<DataKey> {
            self.outputs.clone()
        }

        fn initialize(&self) -> eventflow_core::Result<()> {
            if self.fail_init {
                return Err(CoreError::Lifecycle {
                    unit: "declared".into(),
                    action: "initialize",
                    reason: "broken".into(),
                });
            }
            if let Some(extra) = &self.discovered {
                self.inputs.write().push(extra.clone());
            }
            Ok(())
        }

        fn execute(&self, _ctx: &mut EventContext) -> Result<Outcome, UnitError> {
            Ok(Outcome::passed())
        }
    }

    #[derive(Clone, Default)]
    struct Spec {
        inputs: Vec<&'static str>,
        outputs: Vec<&'static str>,
        discovered: Option<&'static str>,
        fail_init: bool,
    }

    fn spec(inputs: &[&'static str], outputs: &[&'static str]) -> Spec {
        Spec {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            ..Default::default()
        }
    }

    /// Factory building `Declared` units from a name -> spec table.
    struct TableFactory(HashMap<&'static str, Spec>);

    impl UnitFactory for TableFactory {
        fn create(&self, type_name: &str, name: &str) -> eventflow_core::Result<Box<dyn WorkUnit>> {
            let spec = self
                .0
                .get(name)
                .ok_or_else(|| CoreError::UnknownType(type_name.to_string()))?;
            Ok(Box::new(Declared {
                inputs: RwLock::new(spec.inputs.iter().map(|k| DataKey::new(*k)).collect()),
                outputs: spec.outputs.iter().map(|k| DataKey::new(*k)).collect(),
                discovered: spec.discovered.map(DataKey::new),
                fail_init: spec.fail_init,
            }))
        }

        fn knows(&self, _type_name: &str) -> bool {
            true
        }
    }

    fn resolver(table: Vec<(&'static str, Spec)>, loader: Option<&str>) -> Result<DependencyResolver, ResolveError> {
        let producers = table.iter().map(|(n, _)| format!("Declared/{}", n)).collect();
        let factory = TableFactory(table.into_iter().collect());
        let catalogue = Arc::new(UnitCatalogue::new(Arc::new(factory)));
        DependencyResolver::new(
            catalogue,
            &ResolverConfig {
                producers,
                data_loader: loader.map(|l| format!("Declared/{}", l)),
            },
        )
    }

    fn keys(list: &[&str]) -> BTreeSet<DataKey> {
        list.iter().map(|k| DataKey::new(*k)).collect()
    }

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_linear_plan() {
        let r = resolver(vec![("P", spec(&[], &["k1"])), ("Q", spec(&["k1"], &["k2"]))], None).unwrap();
        let plan = r.resolve(&keys(&["k2"]), &HashSet::new()).unwrap();
        assert_eq!(plan.names(), vec!["P", "Q"]);
    }

    #[test]
    fn test_stopper_is_not_expanded() {
        let r = resolver(
            vec![("P", spec(&["nowhere"], &["k1"])), ("Q", spec(&["k1"], &["k2"]))],
            None,
        )
        .unwrap();

        let plan = r.resolve(&keys(&["k2"]), &names(&["P"])).unwrap();
        assert_eq!(plan.names(), vec!["P", "Q"]);

        let err = r.resolve(&keys(&["k2"]), &HashSet::new()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnmetDependency {
                key: DataKey::new("nowhere"),
                consumer: Some("P".into()),
            }
        );
    }

    #[test]
    fn test_no_duplicates_in_diamond() {
        let r = resolver(
            vec![
                ("Base", spec(&[], &["raw"])),
                ("Left", spec(&["raw"], &["l"])),
                ("Right", spec(&["raw"], &["r"])),
                ("Join", spec(&["l", "r"], &["out"])),
            ],
            None,
        )
        .unwrap();

        let plan = r.resolve(&keys(&["out", "l"]), &HashSet::new()).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.names().iter().filter(|n| **n == "Base").count(), 1);
        assert!(plan.position("Base") < plan.position("Left"));
        assert!(plan.position("Base") < plan.position("Right"));
        assert!(plan.position("Left") < plan.position("Join"));
        assert!(plan.position("Right") < plan.position("Join"));
    }

    #[test]
    fn test_topological_validity() {
        let r = resolver(
            vec![
                ("A", spec(&[], &["a"])),
                ("B", spec(&["a"], &["b"])),
                ("C", spec(&["a", "b"], &["c"])),
                ("D", spec(&["c", "b"], &["d"])),
                ("E", spec(&["d", "a"], &["e"])),
            ],
            None,
        )
        .unwrap();
        let plan = r.resolve(&keys(&["e"]), &HashSet::new()).unwrap();

        for (i, unit) in plan.iter().enumerate() {
            for key in unit.inputs() {
                let producer = r.producer_of(&key).unwrap();
                let at = plan.position(producer).unwrap();
                assert!(at < i, "{} must run before {}", producer, unit.name());
            }
        }
    }

    #[test]
    fn test_cycle_detected() {
        let r = resolver(
            vec![
                ("A", spec(&["c"], &["a"])),
                ("B", spec(&["a"], &["b"])),
                ("C", spec(&["b"], &["c"])),
            ],
            None,
        )
        .unwrap();

        match r.resolve(&keys(&["b"]), &HashSet::new()) {
            Err(ResolveError::CycleDetected { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_stopper_breaks_cycle() {
        let r = resolver(vec![("A", spec(&["b"], &["a"])), ("B", spec(&["a"], &["b"]))], None).unwrap();
        assert!(r.resolve(&keys(&["a"]), &HashSet::new()).is_err());

        let plan = r.resolve(&keys(&["a"]), &names(&["B"])).unwrap();
        assert_eq!(plan.names(), vec!["B", "A"]);
    }

    #[test]
    fn test_self_cycle() {
        let r = resolver(vec![("A", spec(&["a"], &["a"]))], None).unwrap();
        let err = r.resolve(&keys(&["a"]), &HashSet::new()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::CycleDetected {
                path: vec!["A".into(), "A".into()]
            }
        );
    }

    #[test]
    fn test_unknown_requested_key() {
        let r = resolver(vec![("A", spec(&[], &["a"]))], None).unwrap();
        let err = r.resolve(&keys(&["zzz"]), &HashSet::new()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnmetDependency {
                key: DataKey::new("zzz"),
                consumer: None,
            }
        );
    }

    #[test]
    fn test_data_loader_takes_missing_keys() {
        let r = resolver(
            vec![("Loader", spec(&[], &[])), ("Q", spec(&["raw"], &["k"]))],
            Some("Loader"),
        )
        .unwrap();
        let plan = r.resolve(&keys(&["k"]), &HashSet::new()).unwrap();
        assert_eq!(plan.names(), vec!["Loader", "Q"]);
    }

    #[test]
    fn test_inputs_rederived_after_initialize() {
        let mut late = spec(&[], &["k2"]);
        late.discovered = Some("k1");
        let r = resolver(vec![("P", spec(&[], &["k1"])), ("Q", late)], None).unwrap();

        let plan = r.resolve(&keys(&["k2"]), &HashSet::new()).unwrap();
        assert_eq!(plan.names(), vec!["P", "Q"]);
    }

    #[test]
    fn test_initialization_failure() {
        let mut broken = spec(&[], &["k"]);
        broken.fail_init = true;
        let err = resolver(vec![("Broken", broken)], None).err().unwrap();
        assert!(matches!(err, ResolveError::InitializationFailed { .. }));
    }

    #[test]
    fn test_alternatives_pick_existing_producer() {
        let r = resolver(
            vec![("P", spec(&[], &["second"])), ("Q", spec(&["first:second"], &["out"]))],
            None,
        )
        .unwrap();
        let plan = r.resolve(&keys(&["out"]), &HashSet::new()).unwrap();
        assert_eq!(plan.names(), vec!["P", "Q"]);
    }

    #[test]
    fn test_first_producer_wins() {
        let r = resolver(vec![("P1", spec(&[], &["k"])), ("P2", spec(&[], &["k"]))], None).unwrap();
        assert_eq!(r.producer_of(&DataKey::new("k")), Some("P1"));
    }

    #[test]
    fn test_resolve_for_unit() {
        let r = resolver(
            vec![
                ("P", spec(&[], &["k1"])),
                ("Q", spec(&["k1"], &["k2"])),
                ("Sink", spec(&["k2"], &[])),
            ],
            None,
        )
        .unwrap();

        let plan = r.resolve_for_unit("Declared/Sink", &HashSet::new()).unwrap();
        assert_eq!(plan.names(), vec!["P", "Q", "Sink"]);
        assert_eq!(r.request_count("P"), 1);
        assert_eq!(r.unused_producers(), Vec::<&str>::new());
    }

    #[test]
    fn test_resolve_for_unknown_unit() {
        let r = resolver(vec![("P", spec(&[], &["k1"]))], None).unwrap();
        let err = r.resolve_for_unit("Nope", &HashSet::new()).unwrap_err();
        assert_eq!(err, ResolveError::UnknownUnit("Nope".into()));
    }

    #[test]
    fn test_failed_resolve_can_be_retried() {
        let r = resolver(vec![("P", spec(&[], &["k1"])), ("Q", spec(&["k1"], &["k2"]))], None).unwrap();
        assert!(r.resolve(&keys(&["k3"]), &HashSet::new()).is_err());
        let plan = r.resolve(&keys(&["k2"]), &HashSet::new()).unwrap();
        assert_eq!(plan.names(), vec!["P", "Q"]);
        assert_eq!(r.unused_producers(), Vec::<&str>::new());
    }

    #[test]
    fn test_factory_registry_units_are_unused_until_requested() {
        let factory = FactoryRegistry::new().with("Declared", |_| {
            Ok(Box::new(Declared {
                inputs: RwLock::new(Vec::new()),
                outputs: vec![DataKey::new("x")],
                discovered: None,
                fail_init: false,
            }) as Box<dyn WorkUnit>)
        });
        let catalogue = Arc::new(UnitCatalogue::new(Arc::new(factory)));
        let r = DependencyResolver::new(
            catalogue,
            &ResolverConfig {
                producers: vec!["Declared/X".into()],
                data_loader: None,
            },
        )
        .unwrap();
        assert_eq!(r.unused_producers(), vec!["X"]);
        r.resolve(&keys(&["x"]), &HashSet::new()).unwrap();
        assert!(r.unused_producers().is_empty());
    }

    #[test]
    fn test_catalogue_units_produce_without_configured_producers() {
        let table = vec![("P", spec(&[], &["k1"])), ("Q", spec(&["k1"], &["k2"]))];
        let catalogue = Arc::new(UnitCatalogue::new(Arc::new(TableFactory(table.into_iter().collect()))));
        catalogue.create("Declared", "Q").unwrap();
        catalogue.create("Declared", "P").unwrap();

        let r = DependencyResolver::new(Arc::clone(&catalogue), &ResolverConfig::default()).unwrap();
        let plan = r.resolve(&keys(&["k2"]), &HashSet::new()).unwrap();
        assert_eq!(plan.names(), vec!["P", "Q"]);

        let empty = Arc::new(UnitCatalogue::new(Arc::new(TableFactory(HashMap::new()))));
        let r = DependencyResolver::new(empty, &ResolverConfig::default()).unwrap();
        assert!(matches!(
            r.resolve(&keys(&["k2"]), &HashSet::new()),
            Err(ResolveError::UnmetDependency { .. })
        ));
    }
}
