//! Job options files.
//!
//! A job options file is JSON:
//!
//! ```json
//! {
//!   "units": { "Raw": { "type": "Producer", "outputs": ["raw"] } },
//!   "sequences": [
//!     { "name": "Main", "members": ["Producer/Raw"], "stop_override": false }
//!   ],
//!   "resolver": { "producers": ["Producer/Raw"] },
//!   "engine": { "concurrent_events": 4, "top_units": ["Main"] }
//! }
//! ```

use crate::units;
use anyhow::{Context, Result};
use eventflow_core::UnitCatalogue;
use eventflow_execution::{ControlFlowSequence, EngineConfig, ResolverConfig, SequenceConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Settings for one entry of the unit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Built-in type name
    #[serde(rename = "type")]
    pub kind: String,
    /// Data keys read
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Data keys written
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Prescaler: pass every Nth event
    #[serde(default)]
    pub accept_every: Option<u64>,
    /// Failing: event number to fail on
    #[serde(default)]
    pub fail_on_event: Option<u64>,
    /// Sleeper: time spent per event
    #[serde(default)]
    pub sleep_ms: u64,
    /// Run on the offload scheduler
    #[serde(default, rename = "async")]
    pub is_async: bool,
    /// Interchangeable instances allowed
    #[serde(default = "default_cardinality")]
    pub cardinality: usize,
}

fn default_cardinality() -> usize {
    1
}

impl UnitSpec {
    /// An empty spec of the given type.
    pub fn of(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            accept_every: None,
            fail_on_event: None,
            sleep_ms: 0,
            is_async: false,
            cardinality: default_cardinality(),
        }
    }
}

/// A named sequence declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSpec {
    /// Sequence name
    pub name: String,
    /// Member lists and stop override
    #[serde(flatten)]
    pub config: SequenceConfig,
}

/// A catalogue built from options, with typed handles on its sequences.
pub struct Job {
    /// Every unit of the job
    pub catalogue: Arc<UnitCatalogue>,
    /// Declared sequences, in declaration order
    pub sequences: Vec<Arc<ControlFlowSequence>>,
}

/// A whole job options file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Unit table, by name
    pub units: BTreeMap<String, UnitSpec>,
    /// Sequences, declared before any sequence that nests them
    pub sequences: Vec<SequenceSpec>,
    /// Producers for plan resolution
    pub resolver: ResolverConfig,
    /// Engine settings
    pub engine: EngineConfig,
}

impl JobOptions {
    /// Read and parse an options file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read options file {}", path.display()))?;
        let options: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid options file {}", path.display()))?;
        debug!(
            "Loaded {} units and {} sequences from {}",
            options.units.len(),
            options.sequences.len(),
            path.display()
        );
        Ok(options)
    }

    /// Build a catalogue holding the declared sequences.
    ///
    /// Plain units are created on demand, when a sequence or the resolver
    /// first names them.
    pub fn build(&self) -> Result<Job> {
        let factory = units::registry(self.units.clone());
        let catalogue = Arc::new(UnitCatalogue::new(Arc::new(factory)));

        let mut sequences = Vec::with_capacity(self.sequences.len());
        for spec in &self.sequences {
            let sequence = ControlFlowSequence::from_config(&spec.name, &spec.config, &catalogue)
                .with_context(|| format!("invalid sequence {}", spec.name))?;
            let sequence = Arc::new(sequence);
            catalogue.register(&spec.name, Box::new(Arc::clone(&sequence)))?;
            sequences.push(sequence);
        }
        Ok(Job { catalogue, sequences })
    }

    /// Top-level units for a run: configured ones, or the last sequence.
    pub fn top_units(&self) -> Vec<String> {
        if !self.engine.top_units.is_empty() {
            return self.engine.top_units.clone();
        }
        self.sequences.last().map(|s| vec![s.name.clone()]).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventflow_core::EventContext;
    use std::io::Write;

    const JOB: &str = r#"{
        "units": {
            "Raw": { "type": "Producer", "outputs": ["raw"] },
            "Pre": { "type": "Prescaler", "accept_every": 2 },
            "Reco": { "type": "Consumer", "inputs": ["raw"], "outputs": ["tracks"] },
            "Recover": { "type": "Producer", "outputs": ["recovered"] }
        },
        "sequences": [
            {
                "name": "Main",
                "members": ["Producer/Raw", "Prescaler/Pre", "Consumer/Reco"],
                "branch_members": ["Pre", "Producer/Recover"]
            }
        ],
        "engine": { "concurrent_events": 2 }
    }"#;

    fn write_job(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_and_build() {
        let file = write_job(JOB);
        let options = JobOptions::load(file.path()).unwrap();
        assert_eq!(options.units.len(), 4);
        assert_eq!(options.units["Reco"].inputs, vec!["raw"]);
        assert_eq!(options.engine.concurrent_events, 2);
        assert_eq!(options.top_units(), vec!["Main"]);

        let job = options.build().unwrap();
        let main = job.catalogue.find("Main").unwrap();
        assert_eq!(main.type_name(), ControlFlowSequence::TYPE);
        let expr = main.inner().as_composite().unwrap().control_flow_expression();
        assert_eq!(expr, "seq(Raw & Pre & Reco)");

        assert_eq!(job.sequences.len(), 1);
        let branch: Vec<String> = job.sequences[0]
            .branch_members()
            .iter()
            .map(|m| m.unit().name().to_string())
            .collect();
        assert_eq!(branch, vec!["Pre", "Recover"]);
    }

    #[test]
    fn test_branch_taken_on_prescaled_events() {
        let options: JobOptions = serde_json::from_str(JOB).unwrap();
        let job = options.build().unwrap();
        let main = job.catalogue.find("Main").unwrap();

        let mut even = EventContext::new(0);
        assert!(main.execute_in(&mut even).unwrap().filter_passed);
        assert!(even.store().contains("tracks"));

        let mut odd = EventContext::new(1);
        let state = main.execute_in(&mut odd).unwrap();
        assert!(state.branch_passed);
        assert!(odd.store().contains("recovered"));
        assert!(!odd.store().contains("tracks"));
    }

    #[test]
    fn test_missing_file() {
        let err = JobOptions::load(Path::new("/nonexistent/job.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read options file"));
    }

    #[test]
    fn test_invalid_sequence_member() {
        let file = write_job(
            r#"{ "sequences": [ { "name": "Bad", "members": ["Producer/A:flip"] } ] }"#,
        );
        let options = JobOptions::load(file.path()).unwrap();
        let err = options.build().err().unwrap();
        assert!(err.to_string().contains("invalid sequence Bad"));
    }

    #[test]
    fn test_defaults() {
        let options: JobOptions = serde_json::from_str("{}").unwrap();
        assert!(options.units.is_empty());
        assert!(options.top_units().is_empty());
        assert_eq!(options.engine.concurrent_events, 1);

        let spec: UnitSpec = serde_json::from_str(r#"{ "type": "Sleeper", "async": true }"#).unwrap();
        assert!(spec.is_async);
        assert_eq!(spec.cardinality, 1);
    }
}
