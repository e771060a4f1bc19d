//! Construction of units by type name.

use crate::error::{CoreError, Result};
use crate::unit::WorkUnit;
use std::collections::HashMap;

/// Creates unit instances from a type name and an instance name.
pub trait UnitFactory: Send + Sync {
    /// Construct a new, uninitialized instance.
    fn create(&self, type_name: &str, name: &str) -> Result<Box<dyn WorkUnit>>;

    /// Whether this factory can build the given type.
    fn knows(&self, type_name: &str) -> bool;
}

type Constructor = Box<dyn Fn(&str) -> Result<Box<dyn WorkUnit>> + Send + Sync>;

/// Closure-backed factory keyed on type name.
#[derive(Default)]
pub struct FactoryRegistry {
    constructors: HashMap<String, Constructor>,
}

impl FactoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a type. Replaces any previous one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn(&str) -> Result<Box<dyn WorkUnit>> + Send + Sync + 'static,
    {
        self.constructors.insert(type_name.into(), Box::new(constructor));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, type_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn WorkUnit>> + Send + Sync + 'static,
    {
        self.register(type_name, constructor);
        self
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.constructors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl UnitFactory for FactoryRegistry {
    fn create(&self, type_name: &str, name: &str) -> Result<Box<dyn WorkUnit>> {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| CoreError::UnknownType(type_name.to_string()))?;
        constructor(name)
    }

    fn knows(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("types", &self.types())
            .finish()
    }
}
