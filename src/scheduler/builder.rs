//! Task graph construction for a deliberation session.
//!
//! Each task is a (phase, role) pair. An edge `a → b` means `b` reads `a`'s
//! recorded output. The standard panel graph is:
//!
//! - Independent: every analyst, reading nothing
//! - CrossReview: every analyst, reading every *other* analyst's Independent output
//! - Synthesis: the synthesizer, reading every analyst output of both phases
//!
//! Graphs are validated on build: no task may read its own role in the same
//! or an earlier phase, nothing may read a later (or the same) phase, and the
//! graph must be acyclic.

use crate::errors::GraphError;
use crate::tracker::TaskKey;
use std::collections::HashMap;
use tribunal_common::{Phase, WorkerRole};

/// Index into the task list.
pub type TaskIndex = usize;

/// A task and the upstream tasks whose outputs it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub key: TaskKey,
    /// Upstream tasks, in the order their outputs appear in the context.
    pub reads: Vec<TaskKey>,
}

impl TaskNode {
    pub fn new(phase: Phase, role: WorkerRole, reads: Vec<TaskKey>) -> Self {
        Self {
            key: TaskKey::new(phase, role),
            reads,
        }
    }
}

/// A validated directed acyclic graph of tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<TaskNode>,
    index_map: HashMap<TaskKey, TaskIndex>,
    /// index -> tasks that read it
    forward_edges: Vec<Vec<TaskIndex>>,
    /// index -> tasks it reads
    reverse_edges: Vec<Vec<TaskIndex>>,
    panel: Vec<WorkerRole>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get_task(&self, index: TaskIndex) -> Option<&TaskNode> {
        self.tasks.get(index)
    }

    pub fn get_index(&self, key: TaskKey) -> Option<TaskIndex> {
        self.index_map.get(&key).copied()
    }

    pub fn tasks(&self) -> &[TaskNode] {
        &self.tasks
    }

    /// The analyst roles on the panel, in declaration order.
    pub fn panel(&self) -> &[WorkerRole] {
        &self.panel
    }

    /// Tasks that read the given task.
    pub fn dependents(&self, index: TaskIndex) -> &[TaskIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Tasks the given task reads.
    pub fn dependencies(&self, index: TaskIndex) -> &[TaskIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Tasks of one phase, in execution order.
    pub fn tasks_in_phase(&self, phase: Phase) -> Vec<TaskKey> {
        self.tasks
            .iter()
            .filter(|t| t.key.phase == phase)
            .map(|t| t.key)
            .collect()
    }

    /// Roles scheduled for one phase, in execution order.
    pub fn roles_in_phase(&self, phase: Phase) -> Vec<WorkerRole> {
        self.tasks_in_phase(phase).into_iter().map(|k| k.role).collect()
    }

    /// The upstream tasks a task reads, or an empty slice for unknown keys.
    pub fn context_keys(&self, key: TaskKey) -> &[TaskKey] {
        self.get_index(key)
            .and_then(|i| self.tasks.get(i))
            .map_or(&[], |t| t.reads.as_slice())
    }
}

/// Builder for the three-phase panel graph.
pub struct TaskGraphBuilder {
    panel: Vec<WorkerRole>,
}

impl TaskGraphBuilder {
    pub fn new(panel: impl IntoIterator<Item = WorkerRole>) -> Self {
        Self {
            panel: panel.into_iter().collect(),
        }
    }

    /// Build the standard graph for the panel.
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        if self.panel.is_empty() {
            return Err(GraphError::EmptyPanel);
        }
        if self.panel.contains(&WorkerRole::Synthesizer) {
            return Err(GraphError::SynthesizerInPanel);
        }

        let mut panel = self.panel;
        panel.sort();
        if let Some(pair) = panel.windows(2).find(|w| w[0] == w[1]) {
            return Err(GraphError::DuplicateTask {
                phase: Phase::Independent,
                role: pair[0],
            });
        }

        let mut nodes = Vec::with_capacity(panel.len() * 2 + 1);
        for role in &panel {
            nodes.push(TaskNode::new(Phase::Independent, *role, Vec::new()));
        }
        for role in &panel {
            let reads = panel
                .iter()
                .filter(|other| *other != role)
                .map(|other| TaskKey::new(Phase::Independent, *other))
                .collect();
            nodes.push(TaskNode::new(Phase::CrossReview, *role, reads));
        }
        let everything = [Phase::Independent, Phase::CrossReview]
            .iter()
            .flat_map(|phase| panel.iter().map(|role| TaskKey::new(*phase, *role)))
            .collect();
        nodes.push(TaskNode::new(
            Phase::Synthesis,
            WorkerRole::Synthesizer,
            everything,
        ));

        build_graph(nodes, panel)
    }
}

/// Validate arbitrary task nodes into a graph.
pub fn build_graph(nodes: Vec<TaskNode>, panel: Vec<WorkerRole>) -> Result<TaskGraph, GraphError> {
    let mut index_map = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if index_map.insert(node.key, i).is_some() {
            return Err(GraphError::DuplicateTask {
                phase: node.key.phase,
                role: node.key.role,
            });
        }
    }

    let mut forward_edges: Vec<Vec<TaskIndex>> = vec![Vec::new(); nodes.len()];
    let mut reverse_edges: Vec<Vec<TaskIndex>> = vec![Vec::new(); nodes.len()];

    for (to_idx, node) in nodes.iter().enumerate() {
        for dep in &node.reads {
            if dep.role == node.key.role && dep.phase <= node.key.phase {
                return Err(GraphError::SelfReference {
                    phase: node.key.phase,
                    role: node.key.role,
                });
            }
            if dep.phase >= node.key.phase {
                return Err(GraphError::ForwardReference {
                    phase: node.key.phase,
                    role: node.key.role,
                    dep_phase: dep.phase,
                    dep_role: dep.role,
                });
            }
            let from_idx = *index_map
                .get(dep)
                .ok_or(GraphError::UnknownDependency {
                    phase: node.key.phase,
                    role: node.key.role,
                    dep_phase: dep.phase,
                    dep_role: dep.role,
                })?;
            forward_edges[from_idx].push(to_idx);
            reverse_edges[to_idx].push(from_idx);
        }
    }

    let graph = TaskGraph {
        tasks: nodes,
        index_map,
        forward_edges,
        reverse_edges,
        panel,
    };
    validate_no_cycles(&graph)?;
    Ok(graph)
}

/// Validate that the graph has no cycles using Kahn's algorithm.
fn validate_no_cycles(graph: &TaskGraph) -> Result<(), GraphError> {
    let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(|deps| deps.len()).collect();

    let mut queue: Vec<TaskIndex> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, deg)| *deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut processed = 0;
    while let Some(node) = queue.pop() {
        processed += 1;
        for &dependent in graph.dependents(node) {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push(dependent);
            }
        }
    }

    if processed != graph.len() {
        let tasks = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg > 0)
            .filter_map(|(i, _)| graph.get_task(i).map(|t| t.key.to_string()))
            .collect();
        return Err(GraphError::Cycle { tasks });
    }

    Ok(())
}
