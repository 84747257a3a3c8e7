// SPDX-License-Identifier: MIT OR Apache-2.0
//! Standard node library for `FlowSolo`.
//!
//! Every node here is built on the public node extension API of
//! `flowsolo_graph`; none of them is known to the engine. The library covers:
//! - Flow control (start, finish, sequence)
//! - Debug logging
//! - Facts (set, check) and wait/continue conditions
//! - Cinematic playback and actor spawning
//! - Entity property bindings
//! - Workspots
//!
//! [`register_defaults`] wires all of them against a set of [`HostServices`].

pub mod cinematic;
pub mod fact;
pub mod flow;
pub mod log;
pub mod property;
pub mod services;
pub mod wait;
pub mod workspot;

pub use cinematic::{PlayCinematic, SpawnActor, CINEMATIC_FINISHED};
pub use fact::{FactCheck, FactSet, FactStore, FactTable, FACT_CHANGED};
pub use flow::{Finish, Sequence, Start};
pub use log::UniversalLog;
pub use property::{BindProperty, EntityBinding, EntityId, PropertyStore, PropertyTable};
pub use services::{
    ActorRoster, ActorSpawner, CinematicLibrary, CinematicPlayer, HostServices, ServiceError,
    SpawnedActor, WorkspotBoard, WorkspotManager,
};
pub use wait::{Condition, FactCondition, TimeCondition, WaitContinue};
pub use workspot::{AssignWorkspot, WORKSPOT_FINISHED};

use flowsolo_graph::BehaviorRegistry;

/// Register every standard node type
pub fn register_defaults(registry: &mut BehaviorRegistry, services: &HostServices) {
    registry.register(Start);
    registry.register(Finish);
    registry.register(Sequence);
    registry.register(UniversalLog);
    registry.register(FactSet::new(services.facts.clone()));
    registry.register(FactCheck::new(services.facts.clone()));
    registry.register(WaitContinue::new(services.facts.clone()));
    registry.register(PlayCinematic::new(services.cinematics.clone()));
    registry.register(SpawnActor::new(services.spawner.clone()));
    registry.register(BindProperty::new(services.properties.clone()));
    registry.register(AssignWorkspot::new(services.workspots.clone()));
    tracing::debug!(count = registry.len(), "standard nodes registered");
}

/// Registry holding only the standard nodes
pub fn default_registry(services: &HostServices) -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    register_defaults(&mut registry, services);
    registry
}
