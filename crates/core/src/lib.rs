//! eventflow core data model.
//!
//! This crate defines the units of work the scheduler drives, the per-event
//! context they run in, and the collaborator contracts (factory, catalogue)
//! the scheduling components are built on.

#![warn(missing_docs)]

// Identities
mod id;
mod key;
mod type_name;

// Units and their execution state
mod unit;
mod context;

// Collaborators
mod factory;
mod catalogue;

mod error;

// Re-exports
pub use id::{ContextId, UnitId};
pub use key::DataKey;
pub use type_name::{MemberToken, TypeNameString};

pub use unit::{Composite, LifecycleState, Outcome, Unit, UnitRef, WorkUnit};
pub use context::{EventContext, EventStore, ExecState};

pub use factory::{FactoryRegistry, UnitFactory};
pub use catalogue::UnitCatalogue;

pub use error::{CoreError, Result, UnitError};
