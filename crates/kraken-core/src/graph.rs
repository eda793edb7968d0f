//! The task graph: construction from a target set, pruning, readiness and
//! completion queries, and the status store.
//!
//! Edges point from the task that runs first to the task that runs later.
//! An edge is `strict` when the later task genuinely depends on the earlier
//! one; a non-strict edge only orders the two tasks and keeps them from
//! running concurrently. An edge is `implicit` when it was inferred from
//! property lineage instead of an explicit relationship.

use crate::context::SharedContext;
use crate::error::{ProjectError, ProjectResult};
use crate::identifier::TaskId;
use crate::task::{TaskHandle, TaskStatus, TaskStatusType};
use itertools::Itertools;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::prelude::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

/// Classification of an edge between two tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeInfo {
    pub strict: bool,
    pub implicit: bool,
}

/// The task graph contains a cycle. Carries one witness cycle.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cycle detected between tasks {}", cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
pub struct CycleError {
    pub cycle: Vec<TaskId>,
}

/// An acyclic graph over a set of tasks, together with their statuses.
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskId, EdgeInfo>,
    indices: HashMap<TaskId, NodeIndex>,
    tasks: HashMap<TaskId, TaskHandle>,
    targets: Vec<TaskId>,
    statuses: HashMap<TaskId, TaskStatus>,
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Build a graph by expanding the relationships of the target set until
    /// the node set is closed. Rejects cyclic graphs; non-strict edges count
    /// for cycle detection too.
    pub fn build(context: &SharedContext, targets: &[TaskHandle]) -> ProjectResult<TaskGraph> {
        let mut tasks: HashMap<TaskId, TaskHandle> = HashMap::new();
        let mut edges: HashMap<(TaskId, TaskId), EdgeInfo> = HashMap::new();
        let mut queue: VecDeque<TaskHandle> = targets.iter().cloned().collect();

        while let Some(handle) = queue.pop_front() {
            let id = handle.id().clone();
            if tasks.contains_key(&id) {
                continue;
            }
            tasks.insert(id.clone(), handle.clone());
            for relationship in handle.with(|t| t.relationships(context))? {
                let other = context.find_task(&relationship.other)?;
                let (from, to) = if relationship.inverse {
                    (id.clone(), relationship.other.clone())
                } else {
                    (relationship.other.clone(), id.clone())
                };
                if from == to {
                    return Err(CycleError { cycle: vec![from] }.into());
                }
                edges
                    .entry((from, to))
                    .and_modify(|info| {
                        // merge conservatively
                        info.strict |= relationship.strict;
                        info.implicit &= relationship.implicit;
                    })
                    .or_insert(EdgeInfo {
                        strict: relationship.strict,
                        implicit: relationship.implicit,
                    });
                queue.push_back(other);
            }
        }

        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for id in tasks.keys().sorted() {
            let index = graph.add_node(id.clone());
            indices.insert(id.clone(), index);
        }
        for ((from, to), info) in edges {
            graph.add_edge(indices[&from], indices[&to], info);
        }

        if let Some(component) = tarjan_scc(&graph).into_iter().find(|scc| scc.len() > 1) {
            let cycle = component
                .into_iter()
                .map(|index| graph[index].clone())
                .collect();
            return Err(CycleError { cycle }.into());
        }

        let order = topological_order(&graph);
        let mut target_ids: Vec<TaskId> = vec![];
        for target in targets {
            if !target_ids.contains(target.id()) {
                target_ids.push(target.id().clone());
            }
        }
        debug!(
            "built task graph with {} task(s) from {} target(s)",
            tasks.len(),
            target_ids.len()
        );
        Ok(TaskGraph {
            graph,
            indices,
            tasks,
            targets: target_ids,
            statuses: HashMap::new(),
            order,
        })
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<TaskHandle> {
        self.tasks.get(id).cloned()
    }

    /// Every task in the graph, in execution order.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    /// The explicitly requested tasks.
    pub fn target_tasks(&self) -> Vec<TaskHandle> {
        self.targets
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    pub fn get_edge(&self, from: &TaskId, to: &TaskId) -> Option<EdgeInfo> {
        let from = *self.indices.get(from)?;
        let to = *self.indices.get(to)?;
        self.graph.find_edge(from, to).map(|edge| self.graph[edge])
    }

    /// The direct predecessors of a task, strict and non-strict.
    pub fn predecessors(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// The direct successors of a task, strict and non-strict.
    pub fn successors(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        match self.indices.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .map(|neighbor| self.graph[neighbor].clone())
                .sorted()
                .collect(),
            None => vec![],
        }
    }

    fn status_type(&self, id: &TaskId) -> TaskStatusType {
        self.statuses
            .get(id)
            .map(|status| status.ty())
            .unwrap_or(TaskStatusType::Pending)
    }

    pub fn get_status(&self, id: &TaskId) -> Option<&TaskStatus> {
        self.statuses.get(id)
    }

    /// Record a status. The single mutation point of the graph; validates
    /// the transition table.
    pub fn set_status(&mut self, id: &TaskId, status: TaskStatus) -> ProjectResult<()> {
        if !self.tasks.contains_key(id) {
            return Err(ProjectError::UnknownTask(id.clone()));
        }
        let current = self.status_type(id);
        if !current.can_transition_to(status.ty()) {
            return Err(ProjectError::InvalidStatusTransition {
                task: id.clone(),
                from: current,
                to: status.ty(),
            });
        }
        trace!("task {} status {} -> {}", id, current, status);
        self.statuses.insert(id.clone(), status);
        Ok(())
    }

    /// Forget all recorded statuses, returning the graph to its pristine
    /// state.
    pub fn restart(&mut self) {
        self.statuses.clear();
    }

    /// The tasks whose strict ancestors failed and that will therefore
    /// never run.
    fn dormant_tasks(&self) -> HashSet<TaskId> {
        let mut dormant: HashSet<TaskId> = HashSet::new();
        // the topological order guarantees predecessors are classified first
        for id in &self.order {
            if self.status_type(id) != TaskStatusType::Pending {
                continue;
            }
            let index = self.indices[id];
            let blocked = self
                .graph
                .edges_directed(index, Direction::Incoming)
                .filter(|edge| edge.weight().strict)
                .any(|edge| {
                    let predecessor = &self.graph[edge.source()];
                    self.status_type(predecessor) == TaskStatusType::Failed
                        || dormant.contains(predecessor)
                });
            if blocked {
                dormant.insert(id.clone());
            }
        }
        dormant
    }

    /// Every pending task whose strict predecessors are all satisfied, in
    /// execution order. Non-strict predecessors do not gate readiness.
    pub fn ready(&self) -> Vec<TaskId> {
        let dormant = self.dormant_tasks();
        self.order
            .iter()
            .filter(|id| {
                if self.status_type(id) != TaskStatusType::Pending || dormant.contains(*id) {
                    return false;
                }
                let index = self.indices[*id];
                self.graph
                    .edges_directed(index, Direction::Incoming)
                    .filter(|edge| edge.weight().strict)
                    .all(|edge| self.status_type(&self.graph[edge.source()]).is_satisfied())
            })
            .cloned()
            .collect()
    }

    /// Whether every task reached a terminal status. Dormant tasks never
    /// will, so a build with failures completes with `is_complete() ==
    /// false`; the executor stops via its no-progress rule instead.
    pub fn is_complete(&self) -> bool {
        self.order.iter().all(|id| self.status_type(id).is_terminal())
    }

    /// The stable topological order of the tasks that have not reached a
    /// terminal status yet. Ties are broken lexicographically by task path.
    pub fn execution_order(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| !self.status_type(id).is_terminal())
            .cloned()
            .collect()
    }

    /// The paths of all tasks recorded as failed.
    pub fn failed_tasks(&self) -> BTreeSet<TaskId> {
        self.statuses
            .iter()
            .filter(|(_, status)| status.is_failure())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop every task that is not reverse-reachable from `keep`. Both
    /// strict and non-strict edges are traversed, so the requested tasks
    /// and all of their ancestors survive.
    pub fn trim(&self, keep: &[TaskId]) -> TaskGraph {
        let mut kept: HashSet<TaskId> = HashSet::new();
        let mut queue: VecDeque<TaskId> = keep
            .iter()
            .filter(|id| self.tasks.contains_key(*id))
            .cloned()
            .collect();
        while let Some(id) = queue.pop_front() {
            if !kept.insert(id.clone()) {
                continue;
            }
            let index = self.indices[&id];
            for edge in self.graph.edges_directed(index, Direction::Incoming) {
                queue.push_back(self.graph[edge.source()].clone());
            }
        }
        let targets = keep
            .iter()
            .filter(|id| kept.contains(*id))
            .cloned()
            .collect::<Vec<_>>();
        self.subgraph(&kept, targets, None)
    }

    /// Transitive reduction. With `keep_explicit`, user-declared edges are
    /// preserved even when redundant. Idempotent.
    pub fn reduce(&self, keep_explicit: bool) -> TaskGraph {
        // transitive closure of the original graph; reduction against it is
        // the unique minimal graph for a DAG
        let mut closure: HashMap<NodeIndex, HashSet<NodeIndex>> = HashMap::new();
        for start in self.graph.node_indices() {
            let mut reachable = HashSet::new();
            let mut stack: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(start, Direction::Outgoing)
                .collect();
            while let Some(node) = stack.pop() {
                if reachable.insert(node) {
                    stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
                }
            }
            closure.insert(start, reachable);
        }

        let mut redundant_edges: HashSet<(TaskId, TaskId)> = HashSet::new();
        for edge in self.graph.edge_references() {
            let (from, to) = (edge.source(), edge.target());
            let redundant = self
                .graph
                .neighbors_directed(from, Direction::Outgoing)
                .any(|middle| middle != to && closure[&middle].contains(&to));
            if redundant && !(keep_explicit && !edge.weight().implicit) {
                redundant_edges.insert((self.graph[from].clone(), self.graph[to].clone()));
            }
        }

        let kept: HashSet<TaskId> = self.tasks.keys().cloned().collect();
        self.subgraph(&kept, self.targets.clone(), Some(&redundant_edges))
    }

    fn subgraph(
        &self,
        kept: &HashSet<TaskId>,
        targets: Vec<TaskId>,
        dropped_edges: Option<&HashSet<(TaskId, TaskId)>>,
    ) -> TaskGraph {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for id in self.order.iter().filter(|id| kept.contains(*id)) {
            let index = graph.add_node(id.clone());
            indices.insert(id.clone(), index);
        }
        for edge in self.graph.edge_references() {
            let from = &self.graph[edge.source()];
            let to = &self.graph[edge.target()];
            if !kept.contains(from) || !kept.contains(to) {
                continue;
            }
            if let Some(dropped) = dropped_edges {
                if dropped.contains(&(from.clone(), to.clone())) {
                    continue;
                }
            }
            graph.add_edge(indices[from], indices[to], *edge.weight());
        }
        TaskGraph {
            graph,
            indices,
            tasks: self
                .tasks
                .iter()
                .filter(|(id, _)| kept.contains(*id))
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect(),
            targets,
            statuses: self
                .statuses
                .iter()
                .filter(|(id, _)| kept.contains(*id))
                .map(|(id, status)| (id.clone(), status.clone()))
                .collect(),
            order: self
                .order
                .iter()
                .filter(|id| kept.contains(*id))
                .cloned()
                .collect(),
        }
    }
}

/// Kahn's algorithm with a lexicographic tie-break on task path.
fn topological_order(graph: &DiGraph<TaskId, EdgeInfo>) -> Vec<TaskId> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|index| {
            (
                index,
                graph.edges_directed(index, Direction::Incoming).count(),
            )
        })
        .collect();
    let mut heap: BinaryHeap<Reverse<(TaskId, NodeIndex)>> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&index, _)| Reverse((graph[index].clone(), index)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((id, index))) = heap.pop() {
        order.push(id);
        for edge in graph.edges_directed(index, Direction::Outgoing) {
            let target = edge.target();
            if let Some(degree) = in_degree.get_mut(&target) {
                *degree -= 1;
                if *degree == 0 {
                    heap.push(Reverse((graph[target].clone(), target)));
                }
            }
        }
    }
    order
}
