// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flow graph runtime for `FlowSolo`.
//!
//! This crate provides the execution model behind scripted flows:
//! - Typed pins and validated connections
//! - Node lifecycles (`Inactive` → `Activating` → `Active` → `Deactivating`)
//! - Breadth-first signal propagation grouped into trigger epochs
//! - Cycle detection and epoch cancellation
//! - Save/restore of runtime state
//!
//! ## Architecture
//!
//! A [`Graph`] is plain data: nodes, pins and connections, loadable from RON.
//! Node semantics live in [`NodeBehavior`] implementations registered in a
//! [`BehaviorRegistry`] by type ID. The [`Engine`] pairs the two; it holds no
//! per-graph state, so one engine drives any number of graph instances.

pub mod behavior;
pub mod connection;
pub mod engine;
pub mod epoch;
pub mod graph;
pub mod node;
pub mod pin;
pub mod snapshot;

pub use behavior::{
    Activation, BehaviorRegistry, FlowEvent, FnBehavior, NodeBehavior, NodeContext, Signal,
};
pub use connection::{Connection, ConnectionId};
pub use engine::{
    Engine, EngineConfig, EngineError, EpochHandle, PropagationReport, RuntimeIssue,
    SignalRecord, TriggerTarget,
};
pub use epoch::{EpochId, EpochStatus};
pub use graph::{Graph, GraphError, GraphKind};
pub use node::{
    ExecutionError, Node, NodeCategory, NodeDescriptor, NodeId, NodeState, PropertyMap,
};
pub use pin::{Pin, PinDirection, PinId, PinType, PinValue};
pub use snapshot::{RestoreReport, RuntimeSnapshot, SnapshotError, SnapshotMismatch};
