//! Arena-style registry owning every named unit.

use crate::error::{CoreError, Result};
use crate::factory::UnitFactory;
use crate::id::UnitId;
use crate::type_name::TypeNameString;
use crate::unit::{Unit, UnitRef, WorkUnit};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct CatalogueInner {
    units: Vec<UnitRef>,
    by_name: HashMap<String, UnitId>,
}

/// Registry of units, indexed by [`UnitId`] and by name.
///
/// Units are appended during setup and never removed, so a `UnitId` stays
/// valid for the catalogue's lifetime. Lookups are read-mostly; registration
/// is expected to be quiescent while plans are being resolved.
pub struct UnitCatalogue {
    factory: Arc<dyn UnitFactory>,
    inner: RwLock<CatalogueInner>,
}

impl UnitCatalogue {
    /// Create an empty catalogue backed by a factory.
    pub fn new(factory: Arc<dyn UnitFactory>) -> Self {
        Self {
            factory,
            inner: RwLock::new(CatalogueInner::default()),
        }
    }

    /// The factory used to build units.
    pub fn factory(&self) -> &Arc<dyn UnitFactory> {
        &self.factory
    }

    /// Register an already constructed unit under a name.
    pub fn register(&self, name: impl Into<String>, unit: Box<dyn WorkUnit>) -> Result<UnitRef> {
        let name = name.into();
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&name) {
            return Err(CoreError::DuplicateUnit(name));
        }

        let id = UnitId::new(inner.units.len());
        let unit = Arc::new(Unit::new(id, name.clone(), unit));
        inner.units.push(Arc::clone(&unit));
        inner.by_name.insert(name, id);
        debug!("Registered {} as {}", unit.type_and_name(), id);
        Ok(unit)
    }

    /// Construct a unit through the factory and register it.
    pub fn create(&self, type_name: &str, name: &str) -> Result<UnitRef> {
        if self.contains(name) {
            return Err(CoreError::DuplicateUnit(name.to_string()));
        }
        let unit = self.factory.create(type_name, name)?;
        self.register(name, unit)
    }

    /// Find a unit by name, or create it from the token's type.
    ///
    /// A unit found by name must match the token's type when the token
    /// spells one out explicitly.
    pub fn find_or_create(&self, token: &TypeNameString) -> Result<UnitRef> {
        if let Some(unit) = self.find(token.name()) {
            if token.has_explicit_name() && unit.type_name() != token.type_name() {
                return Err(CoreError::TypeMismatch {
                    name: token.name().to_string(),
                    actual: unit.type_name().to_string(),
                    requested: token.type_name().to_string(),
                });
            }
            return Ok(unit);
        }
        self.create(token.type_name(), token.name())
    }

    /// Build a fresh, unregistered instance of a named unit.
    ///
    /// The instance shares the registered unit's id, so per-context state of
    /// all instances of one name lives in the same slot. The instance starts
    /// enabled; the registered unit's flag stays authoritative.
    pub fn instantiate(&self, name: &str) -> Result<Unit> {
        let template = self
            .find(name)
            .ok_or_else(|| CoreError::UnknownUnit(name.to_string()))?;
        let inner = self.factory.create(template.type_name(), name)?;
        Ok(Unit::new(template.id(), name, inner))
    }

    /// Find a unit by name.
    pub fn find(&self, name: &str) -> Option<UnitRef> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.units.get(id.index()))
            .cloned()
    }

    /// Get a unit by id.
    pub fn get(&self, id: UnitId) -> Option<UnitRef> {
        self.inner.read().units.get(id.index()).cloned()
    }

    /// Whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    /// All units in registration order.
    pub fn units(&self) -> Vec<UnitRef> {
        self.inner.read().units.clone()
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.inner.read().units.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for UnitCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.units().iter().map(|u| u.type_and_name()).collect();
        f.debug_struct("UnitCatalogue").field("units", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventContext;
    use crate::error::UnitError;
    use crate::factory::FactoryRegistry;
    use crate::unit::Outcome;

    struct Noop(&'static str);

    impl WorkUnit for Noop {
        fn type_name(&self) -> &str {
            self.0
        }

        fn execute(&self, _ctx: &mut EventContext) -> std::result::Result<Outcome, UnitError> {
            Ok(Outcome::passed())
        }
    }

    fn catalogue() -> UnitCatalogue {
        let factory = FactoryRegistry::new()
            .with("Noop", |_| Ok(Box::new(Noop("Noop")) as Box<dyn WorkUnit>))
            .with("Other", |_| Ok(Box::new(Noop("Other")) as Box<dyn WorkUnit>));
        UnitCatalogue::new(Arc::new(factory))
    }

    #[test]
    fn test_create_and_find() {
        let cat = catalogue();
        let a = cat.create("Noop", "a").unwrap();
        let b = cat.create("Noop", "b").unwrap();
        assert_eq!(a.id(), UnitId::new(0));
        assert_eq!(b.id(), UnitId::new(1));
        assert!(Arc::ptr_eq(&cat.find("b").unwrap(), &b));
        assert!(Arc::ptr_eq(&cat.get(UnitId::new(0)).unwrap(), &a));
        assert_eq!(cat.len(), 2);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let cat = catalogue();
        cat.create("Noop", "a").unwrap();
        assert_eq!(
            cat.create("Noop", "a").unwrap_err(),
            CoreError::DuplicateUnit("a".into())
        );
        assert_eq!(
            cat.create("Missing", "x").unwrap_err(),
            CoreError::UnknownType("Missing".into())
        );
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn test_find_or_create() {
        let cat = catalogue();
        let created = cat.find_or_create(&TypeNameString::parse("Noop/a").unwrap()).unwrap();
        let found = cat.find_or_create(&TypeNameString::parse("a").unwrap()).unwrap();
        assert!(Arc::ptr_eq(&created, &found));

        let err = cat
            .find_or_create(&TypeNameString::parse("Other/a").unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
    }

    #[test]
    fn test_instantiate_shares_id() {
        let cat = catalogue();
        let template = cat.create("Noop", "a").unwrap();
        let clone = cat.instantiate("a").unwrap();
        assert_eq!(clone.id(), template.id());
        assert_eq!(clone.name(), "a");
        assert_eq!(cat.len(), 1);
        assert!(cat.instantiate("zzz").is_err());
    }
}
