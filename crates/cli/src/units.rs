//! Built-in unit types available to job options files.

use crate::options::UnitSpec;
use eventflow_core::{CoreError, DataKey, EventContext, FactoryRegistry, Outcome, UnitError, WorkUnit};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Built-in unit kinds, by type name.
pub const BUILTIN_TYPES: [&str; 5] = ["Producer", "Consumer", "Prescaler", "Failing", "Sleeper"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Writes its outputs, always passes
    Producer,
    /// Requires its inputs, writes its outputs
    Consumer,
    /// Passes every Nth event
    Prescaler,
    /// Fails hard on one event
    Failing,
    /// Sleeps off the critical path
    Sleeper,
}

impl Kind {
    fn parse(type_name: &str) -> Option<Self> {
        match type_name {
            "Producer" => Some(Self::Producer),
            "Consumer" => Some(Self::Consumer),
            "Prescaler" => Some(Self::Prescaler),
            "Failing" => Some(Self::Failing),
            "Sleeper" => Some(Self::Sleeper),
            _ => None,
        }
    }
}

/// A unit configured from a [`UnitSpec`].
pub struct Builtin {
    kind: Kind,
    type_name: String,
    name: String,
    spec: UnitSpec,
}

impl Builtin {
    fn keys(keys: &[String]) -> Vec<DataKey> {
        keys.iter().map(|k| DataKey::new(k.as_str())).collect()
    }

    fn write_outputs(&self, ctx: &EventContext) {
        for key in &self.spec.outputs {
            ctx.store().put(key.as_str(), json!({
                "producer": self.name,
                "event": ctx.event_number(),
            }));
        }
    }

    fn check_inputs(&self, ctx: &EventContext) -> Result<(), UnitError> {
        for key in &self.spec.inputs {
            let present = DataKey::new(key.as_str())
                .alternatives()
                .iter()
                .any(|alt| ctx.store().contains(alt.as_str()));
            if !present {
                return Err(UnitError::MissingInput {
                    unit: self.name.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }
}

impl WorkUnit for Builtin {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn inputs(&self) -> Vec<DataKey> {
        Self::keys(&self.spec.inputs)
    }

    fn outputs(&self) -> Vec<DataKey> {
        Self::keys(&self.spec.outputs)
    }

    fn execute(&self, ctx: &mut EventContext) -> Result<Outcome, UnitError> {
        let event = ctx.event_number();
        let passed = match self.kind {
            Kind::Producer => true,
            Kind::Consumer => {
                self.check_inputs(ctx)?;
                true
            }
            Kind::Prescaler => event % self.spec.accept_every.unwrap_or(1).max(1) == 0,
            Kind::Failing => {
                if self.spec.fail_on_event == Some(event) {
                    return Err(UnitError::failed(&self.name, format!("configured to fail on event {}", event)));
                }
                true
            }
            Kind::Sleeper => {
                std::thread::sleep(Duration::from_millis(self.spec.sleep_ms));
                true
            }
        };

        if passed {
            self.write_outputs(ctx);
        }
        trace!("{} event {} passed: {}", self.name, event, passed);
        Ok(Outcome::from_filter(passed))
    }

    fn cardinality(&self) -> usize {
        self.spec.cardinality.max(1)
    }

    fn is_async(&self) -> bool {
        self.kind == Kind::Sleeper || self.spec.is_async
    }
}

/// Factory registry serving every built-in type from a unit table.
///
/// A name missing from the table gets an empty spec of the requested type.
pub fn registry(units: BTreeMap<String, UnitSpec>) -> FactoryRegistry {
    let units = Arc::new(units);
    let mut registry = FactoryRegistry::new();

    for type_name in BUILTIN_TYPES {
        let units = Arc::clone(&units);
        registry.register(type_name, move |name: &str| {
            let spec = match units.get(name) {
                Some(spec) if spec.kind != type_name => {
                    return Err(CoreError::TypeMismatch {
                        name: name.to_string(),
                        actual: spec.kind.clone(),
                        requested: type_name.to_string(),
                    });
                }
                Some(spec) => spec.clone(),
                None => UnitSpec::of(type_name),
            };
            let kind = Kind::parse(type_name).ok_or_else(|| CoreError::UnknownType(type_name.to_string()))?;
            Ok(Box::new(Builtin {
                kind,
                type_name: type_name.to_string(),
                name: name.to_string(),
                spec,
            }) as Box<dyn WorkUnit>)
        });
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventflow_core::UnitFactory;

    fn table(entries: &[(&str, UnitSpec)]) -> BTreeMap<String, UnitSpec> {
        entries.iter().map(|(n, s)| (n.to_string(), s.clone())).collect()
    }

    #[test]
    fn test_prescaler_passes_every_nth() {
        let mut spec = UnitSpec::of("Prescaler");
        spec.accept_every = Some(3);
        let factory = registry(table(&[("Pre", spec)]));
        let unit = factory.create("Prescaler", "Pre").unwrap();

        let passed: Vec<bool> = (0..6)
            .map(|n| unit.execute(&mut EventContext::new(n)).unwrap().filter_passed())
            .collect();
        assert_eq!(passed, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn test_failing_unit() {
        let mut spec = UnitSpec::of("Failing");
        spec.fail_on_event = Some(2);
        let factory = registry(table(&[("Bad", spec)]));
        let unit = factory.create("Failing", "Bad").unwrap();

        assert!(unit.execute(&mut EventContext::new(1)).is_ok());
        assert!(matches!(
            unit.execute(&mut EventContext::new(2)),
            Err(UnitError::Failed { .. })
        ));
    }

    #[test]
    fn test_consumer_needs_inputs() {
        let mut producer = UnitSpec::of("Producer");
        producer.outputs = vec!["raw".into()];
        let mut consumer = UnitSpec::of("Consumer");
        consumer.inputs = vec!["calibrated:raw".into()];
        let factory = registry(table(&[("P", producer), ("C", consumer)]));
        let p = factory.create("Producer", "P").unwrap();
        let c = factory.create("Consumer", "C").unwrap();

        let mut ctx = EventContext::new(0);
        assert!(matches!(c.execute(&mut ctx), Err(UnitError::MissingInput { .. })));
        p.execute(&mut ctx).unwrap();
        assert!(c.execute(&mut ctx).unwrap().filter_passed());
        assert_eq!(ctx.store().get("raw").unwrap()["producer"], "P");
    }

    #[test]
    fn test_type_mismatch_and_defaults() {
        let factory = registry(table(&[("P", UnitSpec::of("Producer"))]));
        assert!(matches!(
            factory.create("Consumer", "P"),
            Err(CoreError::TypeMismatch { .. })
        ));

        let sleeper = factory.create("Sleeper", "Unlisted").unwrap();
        assert!(sleeper.is_async());
        assert_eq!(sleeper.cardinality(), 1);
        assert!(factory.create("Mystery", "X").is_err());
    }
}
