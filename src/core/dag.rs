//! Step dependency DAG for dispatch ordering.
//!
//! This module provides the StepDag structure built from a task's planned
//! steps. It validates acyclicity at plan acceptance and answers the
//! scheduling questions: which steps are ready, and which steps are
//! transitively downstream of a failed one.

use crate::core::step::{Step, StepId};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// The step dependency graph of one task plan.
///
/// Nodes are step ids; an edge from A to B means B depends on A. Built
/// once from the accepted plan and never mutated afterwards; step statuses
/// live on the task, not here.
pub struct StepDag {
    /// The underlying directed graph.
    graph: DiGraph<StepId, ()>,
    /// Index mapping from StepId to NodeIndex for fast lookups.
    index: HashMap<StepId, NodeIndex>,
}

impl StepDag {
    /// Build the dependency graph from a plan's steps.
    ///
    /// # Errors
    /// Returns `Error::Planning` if a step references an unknown
    /// dependency or the dependencies form a cycle.
    pub fn build(steps: &[Step]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for step in steps {
            let node = graph.add_node(step.id);
            if index.insert(step.id, node).is_some() {
                return Err(Error::Planning(format!(
                    "duplicate step id {}",
                    step.id.short()
                )));
            }
        }

        for step in steps {
            let to = index[&step.id];
            for dep in &step.depends_on {
                let from = *index.get(dep).ok_or_else(|| {
                    Error::Planning(format!(
                        "step {} depends on unknown step {}",
                        step.id.short(),
                        dep.short()
                    ))
                })?;
                graph.add_edge(from, to, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(Error::Planning(
                "step dependencies form a cycle".to_string(),
            ));
        }

        Ok(Self { graph, index })
    }

    /// Get the number of steps in the DAG.
    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependency edges in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the DAG contains a step.
    pub fn contains(&self, id: &StepId) -> bool {
        self.index.contains_key(id)
    }

    /// Get the direct dependencies of a step.
    pub fn dependencies_of(&self, id: &StepId) -> Vec<StepId> {
        if let Some(&node) = self.index.get(id) {
            self.graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .filter_map(|n| self.graph.node_weight(n).copied())
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all steps that are ready given the settled set.
    ///
    /// A step is ready when every dependency is settled (succeeded or
    /// skipped). Steps already in the settled set are excluded; the caller
    /// filters out steps that are running or failed.
    pub fn ready_steps(&self, settled: &HashSet<StepId>) -> Vec<StepId> {
        self.graph
            .node_indices()
            .filter_map(|node| {
                let id = self.graph.node_weight(node)?;
                if settled.contains(id) {
                    return None;
                }
                let deps_settled = self
                    .graph
                    .neighbors_directed(node, petgraph::Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|dep_id| settled.contains(dep_id))
                            .unwrap_or(false)
                    });
                if deps_settled {
                    Some(*id)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Get all steps transitively downstream of the given step.
    ///
    /// Used by the skip_dependents failure policy: when a step fails,
    /// everything that depends on it (directly or indirectly) is skipped.
    pub fn transitive_dependents(&self, id: &StepId) -> Vec<StepId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut stack = vec![start];
        let mut result = Vec::new();

        while let Some(node) = stack.pop() {
            for next in self
                .graph
                .neighbors_directed(node, petgraph::Direction::Outgoing)
            {
                if visited.insert(next) {
                    if let Some(step_id) = self.graph.node_weight(next) {
                        result.push(*step_id);
                    }
                    stack.push(next);
                }
            }
        }

        result
    }

    /// Get step ids in topological order (dependencies first).
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle (should never happen
    /// since `build` validates against cycles).
    pub fn topological_order(&self) -> Result<Vec<StepId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let id = self
                .graph
                .node_weight(cycle.node_id())
                .map(|s| s.short())
                .unwrap_or_else(|| "unknown".to_string());
            Error::Planning(format!("cycle detected at step {}", id))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|node| self.graph.node_weight(node).copied())
            .collect())
    }
}

impl std::fmt::Debug for StepDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDag")
            .field("steps", &self.step_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
