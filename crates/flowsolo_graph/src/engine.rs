// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph execution engine.
//!
//! The [`Engine`] activates nodes in response to triggers and propagates their
//! signals breadth-first along connections. It owns no graph state: every call
//! borrows the graph instance for its duration, so one engine can drive many
//! instances from many threads.
//!
//! A node that returns [`Activation::Stay`] suspends its branch. The host
//! resumes it later through [`Engine::notify`], [`Engine::broadcast`] or
//! [`Engine::tick`]; propagation then continues inside the node's epoch.

use crate::behavior::{Activation, BehaviorRegistry, FlowEvent, NodeBehavior, NodeContext, Signal};
use crate::epoch::{EpochId, EpochStatus};
use crate::graph::Graph;
use crate::node::{ExecutionError, NodeId, NodeRuntime, NodeState, TransitionError};
use crate::pin::{PinId, PinValue};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Times a node may appear on one signal path before the branch is cut
    pub max_depth: u32,
    /// Signals delivered in one epoch before propagation stops
    pub max_signals_per_epoch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_signals_per_epoch: 10_000,
        }
    }
}

/// Where an external trigger enters the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTarget {
    /// Activate a node directly (root/trigger nodes)
    Node(NodeId),
    /// Deliver a signal on a named input pin
    Pin {
        /// Target node
        node: NodeId,
        /// Input pin name
        pin: String,
    },
}

/// Signal delivered along a connection
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    /// Epoch that carried the signal
    pub epoch: EpochId,
    /// Emitting node
    pub from_node: NodeId,
    /// Output pin name
    pub from_pin: String,
    /// Receiving node
    pub to_node: NodeId,
    /// Input pin name
    pub to_pin: String,
    /// Carried value
    pub value: Option<PinValue>,
}

/// Non-fatal problem found while running
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeIssue {
    /// A node failed and was finished
    Execution {
        /// Failing node
        node: NodeId,
        /// Failure
        error: ExecutionError,
    },
    /// A node was re-entered too often within one epoch
    CycleDetected {
        /// Epoch
        epoch: EpochId,
        /// Node whose activation was refused
        node: NodeId,
        /// Activation count that exceeded the limit
        depth: u32,
    },
    /// The epoch delivered too many signals
    SignalBudgetExceeded {
        /// Epoch
        epoch: EpochId,
        /// Configured limit
        limit: usize,
    },
}

/// Outcome of one engine call
#[derive(Debug, Clone, Default)]
pub struct PropagationReport {
    /// Epochs that made progress
    pub epochs: Vec<EpochId>,
    /// Nodes whose behavior ran, in activation order
    pub activated: Vec<NodeId>,
    /// Signals delivered, in delivery order
    pub signals: Vec<SignalRecord>,
    /// Recorded runtime issues
    pub issues: Vec<RuntimeIssue>,
}

impl PropagationReport {
    /// Number of cycle reports
    pub fn cycle_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, RuntimeIssue::CycleDetected { .. }))
            .count()
    }

    /// Execution errors by node
    pub fn errors(&self) -> impl Iterator<Item = (NodeId, &ExecutionError)> {
        self.issues.iter().filter_map(|i| match i {
            RuntimeIssue::Execution { node, error } => Some((*node, error)),
            _ => None,
        })
    }

    /// Whether nothing went wrong
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Signals emitted from a node's output pin
    pub fn signals_from<'a>(
        &'a self,
        node: NodeId,
        pin: &'a str,
    ) -> impl Iterator<Item = &'a SignalRecord> {
        self.signals
            .iter()
            .filter(move |s| s.from_node == node && s.from_pin == pin)
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: PropagationReport) {
        for epoch in other.epochs {
            if !self.epochs.contains(&epoch) {
                self.epochs.push(epoch);
            }
        }
        self.activated.extend(other.activated);
        self.signals.extend(other.signals);
        self.issues.extend(other.issues);
    }

    fn touch(&mut self, epoch: EpochId) {
        if !self.epochs.contains(&epoch) {
            self.epochs.push(epoch);
        }
    }
}

/// Handle returned by [`Engine::trigger`]
#[derive(Debug, Clone)]
pub struct EpochHandle {
    /// Epoch opened by the trigger
    pub id: EpochId,
    /// Synchronous part of the propagation
    pub report: PropagationReport,
}

/// Error in a host call to the engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Input pin not found
    #[error("Input pin `{pin}` not found on node {node}")]
    PinNotFound {
        /// Node
        node: NodeId,
        /// Requested pin
        pin: String,
    },

    /// Epoch not found
    #[error("Epoch not found: {0}")]
    EpochNotFound(EpochId),

    /// Node is not waiting for an event
    #[error("Node {0} is not active")]
    NodeNotActive(NodeId),
}

#[derive(Debug)]
struct Pending {
    node: NodeId,
    pin: Option<String>,
    value: Option<PinValue>,
    /// Nodes the signal passed through in this epoch, oldest first
    trail: Vec<NodeId>,
}

enum Call<'e> {
    Activate,
    Event(&'e FlowEvent),
    Tick(Duration),
}

/// Drives node activation for graph instances
pub struct Engine {
    registry: Arc<BehaviorRegistry>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine over a behavior registry
    pub fn new(registry: Arc<BehaviorRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Registered behaviors
    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    /// Engine limits
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a new epoch at a node or input pin and propagate until idle
    pub fn trigger(
        &self,
        graph: &mut Graph,
        target: TriggerTarget,
    ) -> Result<EpochHandle, EngineError> {
        let pending = match target {
            TriggerTarget::Node(node) => {
                graph.node(node).ok_or(EngineError::NodeNotFound(node))?;
                Pending {
                    node,
                    pin: None,
                    value: None,
                    trail: Vec::new(),
                }
            }
            TriggerTarget::Pin { node, pin } => {
                let target = graph.node(node).ok_or(EngineError::NodeNotFound(node))?;
                if target.input(&pin).is_none() {
                    return Err(EngineError::PinNotFound { node, pin });
                }
                Pending {
                    node,
                    pin: Some(pin),
                    value: None,
                    trail: Vec::new(),
                }
            }
        };

        let epoch = graph.epochs_mut().open();
        tracing::info!(graph = %graph.name, %epoch, node = %pending.node, "trigger");

        let mut report = PropagationReport::default();
        report.touch(epoch);
        self.run(graph, epoch, VecDeque::from([pending]), &mut report);
        Ok(EpochHandle { id: epoch, report })
    }

    /// Deliver an external event to one active node
    pub fn notify(
        &self,
        graph: &mut Graph,
        node: NodeId,
        event: &FlowEvent,
    ) -> Result<PropagationReport, EngineError> {
        let state = graph.node_state(node).ok_or(EngineError::NodeNotFound(node))?;
        if state != NodeState::Active {
            return Err(EngineError::NodeNotActive(node));
        }
        let mut report = PropagationReport::default();
        self.resume(graph, node, Call::Event(event), &mut report);
        Ok(report)
    }

    /// Deliver an external event to every active node, in node order
    pub fn broadcast(&self, graph: &mut Graph, event: &FlowEvent) -> PropagationReport {
        tracing::debug!(graph = %graph.name, event = %event.name, "broadcast");
        let mut report = PropagationReport::default();
        for node in Self::active_nodes(graph) {
            // An earlier delivery may have already moved this node on.
            if graph.node_state(node) == Some(NodeState::Active) {
                self.resume(graph, node, Call::Event(event), &mut report);
            }
        }
        report
    }

    /// Advance time for every active node
    pub fn tick(&self, graph: &mut Graph, delta: Duration) -> PropagationReport {
        let mut report = PropagationReport::default();
        for node in Self::active_nodes(graph) {
            if graph.node_state(node) == Some(NodeState::Active) {
                self.resume(graph, node, Call::Tick(delta), &mut report);
            }
        }
        report
    }

    /// Cancel an epoch: its activating/active nodes go straight to `Inactive`
    /// without emitting anything. Returns the nodes that were reset.
    pub fn cancel(&self, graph: &mut Graph, epoch: EpochId) -> Result<Vec<NodeId>, EngineError> {
        let status = graph
            .epochs()
            .get(epoch)
            .map(|e| e.status)
            .ok_or(EngineError::EpochNotFound(epoch))?;
        if !status.is_open() {
            return Ok(Vec::new());
        }

        let kind = graph.kind;
        let mut reset = Vec::new();
        for node in graph.nodes_mut() {
            if node.runtime.epoch != Some(epoch)
                || !matches!(node.state(), NodeState::Activating | NodeState::Active)
            {
                continue;
            }
            if let Some(behavior) = self.registry.get(&node.node_type) {
                let mut ctx = NodeContext::new(node, kind, Some(epoch), None, None);
                behavior.cleanup(&mut ctx);
            }
            if let Err(err) = node.runtime.transition(NodeState::Inactive) {
                tracing::warn!(node = %node.id, %err, "cancel left node in place");
                continue;
            }
            node.runtime.epoch = None;
            reset.push(node.id);
        }

        if let Some(state) = graph.epochs_mut().get_mut(epoch) {
            state.status = EpochStatus::Cancelled;
        }
        tracing::info!(graph = %graph.name, %epoch, nodes = reset.len(), "epoch cancelled");
        Ok(reset)
    }

    fn active_nodes(graph: &Graph) -> Vec<NodeId> {
        graph
            .nodes()
            .filter(|n| n.state() == NodeState::Active)
            .map(|n| n.id)
            .collect()
    }

    /// Re-enter a suspended node through an event or tick
    fn resume(&self, graph: &mut Graph, node_id: NodeId, call: Call<'_>, report: &mut PropagationReport) {
        let epoch = match graph.node(node_id).and_then(|n| n.runtime.epoch) {
            Some(epoch) => epoch,
            None => {
                let epoch = graph.epochs_mut().open();
                if let Some(node) = graph.node_mut(node_id) {
                    node.runtime.epoch = Some(epoch);
                }
                epoch
            }
        };
        if graph.epochs().get(epoch).is_none() {
            graph.epochs_mut().adopt(epoch, EpochStatus::Suspended);
        }

        let mut queue = VecDeque::new();
        let outcome = self.call(graph, node_id, epoch, None, None, call);
        match outcome {
            Ok(None) => return,
            Ok(Some(activation)) => {
                report.touch(epoch);
                if let Some(state) = graph.epochs_mut().get_mut(epoch) {
                    state.status = EpochStatus::Running;
                }
                self.apply(graph, node_id, epoch, activation, &[], &mut queue, report);
            }
            Err(error) => {
                report.touch(epoch);
                self.fail(graph, node_id, error, report);
            }
        }
        self.run(graph, epoch, queue, report);
    }

    fn run(
        &self,
        graph: &mut Graph,
        epoch: EpochId,
        mut queue: VecDeque<Pending>,
        report: &mut PropagationReport,
    ) {
        while let Some(pending) = queue.pop_front() {
            self.activate(graph, epoch, pending, &mut queue, report);
        }
        self.settle(graph, epoch);
    }

    fn activate(
        &self,
        graph: &mut Graph,
        epoch: EpochId,
        pending: Pending,
        queue: &mut VecDeque<Pending>,
        report: &mut PropagationReport,
    ) {
        let node_id = pending.node;
        let Some(state) = graph.node_state(node_id) else {
            return;
        };
        if state == NodeState::Finished {
            tracing::debug!(node = %node_id, "signal to finished node ignored");
            return;
        }

        if let Some(state) = graph.epochs_mut().get_mut(epoch) {
            state.visit(node_id);
        }
        // Re-entry depth: how often this node already lies on the signal's path.
        let depth = pending.trail.iter().filter(|n| **n == node_id).count() as u32 + 1;
        if depth > self.config.max_depth {
            tracing::warn!(%epoch, node = %node_id, depth, "cycle detected, branch terminated");
            report.issues.push(RuntimeIssue::CycleDetected {
                epoch,
                node: node_id,
                depth,
            });
            return;
        }

        report.activated.push(node_id);
        let previous = graph.node(node_id).and_then(|n| n.runtime.epoch);
        let outcome = self.call(
            graph,
            node_id,
            epoch,
            pending.pin.as_deref(),
            pending.value.as_ref(),
            Call::Activate,
        );
        match outcome {
            Ok(Some(activation)) => {
                self.apply(graph, node_id, epoch, activation, &pending.trail, queue, report);
            }
            Ok(None) => {}
            Err(error) => self.fail(graph, node_id, error, report),
        }
        // A suspended node taken over by a newer epoch releases the old one.
        if let Some(previous) = previous.filter(|p| *p != epoch) {
            self.settle(graph, previous);
        }
    }

    /// Run one behavior entry point against a node
    fn call(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        epoch: EpochId,
        input: Option<&str>,
        value: Option<&PinValue>,
        call: Call<'_>,
    ) -> Result<Option<Activation>, ExecutionError> {
        let kind = graph.kind;
        let node = graph
            .node_mut(node_id)
            .ok_or_else(|| ExecutionError::failed("node vanished during propagation"))?;

        let behavior: &Arc<dyn NodeBehavior> = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| ExecutionError::UnknownBehavior(node.node_type.clone()))?;
        if let Some(descriptor) = self.registry.descriptor(&node.node_type) {
            if !descriptor.allows(kind) {
                return Err(ExecutionError::KindNotAllowed {
                    node_type: node.node_type.clone(),
                    kind,
                });
            }
        }

        if matches!(call, Call::Activate) {
            if node.runtime.state == NodeState::Inactive {
                node.runtime.transition(NodeState::Activating)?;
            }
            node.runtime.epoch = Some(epoch);
            node.runtime.error = None;
        }

        let mut ctx = NodeContext::new(node, kind, Some(epoch), input, value);
        match call {
            Call::Activate => behavior.activate(&mut ctx).map(Some),
            Call::Event(event) => behavior.on_event(&mut ctx, event),
            Call::Tick(delta) => behavior.tick(&mut ctx, delta),
        }
    }

    /// Apply a behavior's decision: lifecycle moves plus emission
    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        epoch: EpochId,
        activation: Activation,
        trail: &[NodeId],
        queue: &mut VecDeque<Pending>,
        report: &mut PropagationReport,
    ) {
        let outputs = match self.resolve_outputs(graph, node_id, activation.signals()) {
            Ok(outputs) => outputs,
            Err(error) => return self.fail(graph, node_id, error, report),
        };

        let Some(node) = graph.node_mut(node_id) else {
            return;
        };
        let leaving = matches!(activation, Activation::Leave(_));
        if let Err(error) = enter_emission(&mut node.runtime, leaving) {
            return self.fail(graph, node_id, error.into(), report);
        }

        self.emit(graph, node_id, epoch, outputs, trail, queue, report);

        let activation = match activation {
            Activation::Fail(_, error) => return self.fail(graph, node_id, error, report),
            other => other,
        };
        let Some(node) = graph.node_mut(node_id) else {
            return;
        };
        let finished = match activation {
            Activation::Leave(_) => node.runtime.transition(NodeState::Inactive),
            Activation::Finish(_) => node.runtime.transition(NodeState::Finished),
            Activation::Stay(_) | Activation::Fail(..) => return,
        };
        node.runtime.epoch = None;
        if let Err(error) = finished {
            self.fail(graph, node_id, error.into(), report);
        }
    }

    fn resolve_outputs(
        &self,
        graph: &Graph,
        node_id: NodeId,
        signals: &[Signal],
    ) -> Result<Vec<(PinId, Signal)>, ExecutionError> {
        let node = graph
            .node(node_id)
            .ok_or_else(|| ExecutionError::failed("node vanished during propagation"))?;
        signals
            .iter()
            .map(|signal| {
                node.output(&signal.pin)
                    .map(|pin| (pin.id, signal.clone()))
                    .ok_or_else(|| ExecutionError::UnknownOutput(signal.pin.clone()))
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        epoch: EpochId,
        outputs: Vec<(PinId, Signal)>,
        trail: &[NodeId],
        queue: &mut VecDeque<Pending>,
        report: &mut PropagationReport,
    ) {
        let mut path = trail.to_vec();
        path.push(node_id);
        for (pin_id, signal) in outputs {
            let targets: Vec<(NodeId, String)> = graph
                .connections_from(pin_id)
                .filter_map(|c| {
                    let target = graph.node(c.to_node)?;
                    Some((c.to_node, target.pin(c.to_pin)?.name.clone()))
                })
                .collect();

            for (to_node, to_pin) in targets {
                let delivered = graph
                    .epochs_mut()
                    .get_mut(epoch)
                    .map_or(0, |e| e.count_signal());
                if delivered > self.config.max_signals_per_epoch {
                    tracing::warn!(%epoch, limit = self.config.max_signals_per_epoch, "signal budget exceeded");
                    report.issues.push(RuntimeIssue::SignalBudgetExceeded {
                        epoch,
                        limit: self.config.max_signals_per_epoch,
                    });
                    queue.clear();
                    return;
                }

                tracing::debug!(%epoch, from = %node_id, pin = %signal.pin, to = %to_node, "signal");
                report.signals.push(SignalRecord {
                    epoch,
                    from_node: node_id,
                    from_pin: signal.pin.clone(),
                    to_node,
                    to_pin: to_pin.clone(),
                    value: signal.value.clone(),
                });
                queue.push_back(Pending {
                    node: to_node,
                    pin: Some(to_pin),
                    value: signal.value.clone(),
                    trail: path.clone(),
                });
            }
        }
    }

    /// Finish a failing node, recording the error; siblings keep running
    fn fail(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        error: ExecutionError,
        report: &mut PropagationReport,
    ) {
        tracing::warn!(node = %node_id, %error, "node execution failed");
        if let Some(node) = graph.node_mut(node_id) {
            node.runtime.state = NodeState::Finished;
            node.runtime.epoch = None;
            node.runtime.error = Some(error.clone());
        }
        report.issues.push(RuntimeIssue::Execution {
            node: node_id,
            error,
        });
    }

    /// Mark the epoch suspended or completed once its queue is drained
    fn settle(&self, graph: &mut Graph, epoch: EpochId) {
        let waiting = graph
            .nodes()
            .any(|n| n.runtime.epoch == Some(epoch) && n.state() == NodeState::Active);
        if let Some(state) = graph.epochs_mut().get_mut(epoch) {
            if state.status == EpochStatus::Cancelled {
                return;
            }
            state.status = if waiting {
                EpochStatus::Suspended
            } else {
                EpochStatus::Completed
            };
            tracing::debug!(%epoch, status = ?state.status, "epoch settled");
        }
    }
}

/// Move a node into the state it emits from
fn enter_emission(runtime: &mut NodeRuntime, leaving: bool) -> Result<(), TransitionError> {
    if runtime.state == NodeState::Activating {
        runtime.transition(NodeState::Active)?;
    }
    if leaving {
        runtime.transition(NodeState::Deactivating)?;
    }
    Ok(())
}
