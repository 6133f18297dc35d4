//! Task list with dependency-graph validation and scheduling queries.
//!
//! The `TaskList` owns the full task set. Construction validates ids,
//! dependency references, and acyclicity; afterwards the dependency graph
//! is held in a petgraph `DiGraph` for frontier and ordering queries.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

use crate::core::task::{Task, TaskStatus};
use crate::error::{Error, Result};

/// The validated task set and its dependency graph.
///
/// Nodes carry task ids; an edge `A -> B` means B depends on A. Tasks
/// themselves stay in list order in `tasks`, which keeps validation
/// reporting and wave summaries deterministic.
pub struct TaskList {
    tasks: Vec<Task>,
    graph: DiGraph<String, ()>,
    node_index: HashMap<String, NodeIndex>,
}

impl TaskList {
    /// Build a task list, validating the whole set.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on: an invalid task field, a duplicate
    /// id, a dependency naming an unknown task, or a dependency cycle.
    /// Cycle reporting cites the first task in list order whose
    /// depth-first walk revisits a task on the current path.
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        for task in &tasks {
            task.validate()?;
        }

        let mut ids = HashSet::new();
        for task in &tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }

        for task in &tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::Validation(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }

        Self::check_cycles(&tasks)?;

        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();
        for task in &tasks {
            let idx = graph.add_node(task.id.clone());
            node_index.insert(task.id.clone(), idx);
        }
        for task in &tasks {
            let to = node_index[&task.id];
            for dep in &task.dependencies {
                let from = node_index[dep];
                graph.add_edge(from, to, ());
            }
        }

        Ok(Self {
            tasks,
            graph,
            node_index,
        })
    }

    /// Depth-first cycle check with an explicit recursion stack.
    ///
    /// Walks tasks in list order so the reported id is stable for a given
    /// input file.
    fn check_cycles(tasks: &[Task]) -> Result<()> {
        let dep_map: HashMap<&str, &[String]> = tasks
            .iter()
            .map(|t| (t.id.as_str(), t.dependencies.as_slice()))
            .collect();

        fn has_cycle<'a>(
            id: &'a str,
            dep_map: &HashMap<&'a str, &'a [String]>,
            visited: &mut HashSet<&'a str>,
            rec_stack: &mut HashSet<&'a str>,
        ) -> bool {
            visited.insert(id);
            rec_stack.insert(id);

            if let Some(deps) = dep_map.get(id) {
                for dep in deps.iter() {
                    if !visited.contains(dep.as_str()) {
                        if has_cycle(dep, dep_map, visited, rec_stack) {
                            return true;
                        }
                    } else if rec_stack.contains(dep.as_str()) {
                        return true;
                    }
                }
            }

            rec_stack.remove(id);
            false
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for task in tasks {
            if !visited.contains(task.id.as_str())
                && has_cycle(task.id.as_str(), &dep_map, &mut visited, &mut rec_stack)
            {
                return Err(Error::Validation(format!(
                    "circular dependency detected involving task {}",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// Get a task by id.
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Get a mutable task by id.
    pub fn get_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// All tasks in list order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pending tasks whose dependencies are all completed.
    pub fn get_runnable_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && task.dependencies.iter().all(|dep| {
                        self.get_task(dep)
                            .map(|d| d.status == TaskStatus::Completed)
                            .unwrap_or(false)
                    })
            })
            .collect()
    }

    /// All pending tasks, runnable or not.
    pub fn get_pending_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect()
    }

    /// Count tasks in the given status.
    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Whether every task is in a terminal state.
    pub fn all_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }

    /// Tasks that directly depend on `id`.
    pub fn get_dependents(&self, id: &str) -> Vec<&Task> {
        let Some(&idx) = self.node_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .filter_map(|n| self.get_task(self.graph[n].as_str()))
            .collect()
    }

    /// Tasks that `id` directly depends on.
    pub fn get_dependencies(&self, id: &str) -> Vec<&Task> {
        let Some(&idx) = self.node_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .filter_map(|n| self.get_task(self.graph[n].as_str()))
            .collect()
    }

    /// Tasks in dependency order.
    ///
    /// Cannot fail after construction-time validation, but toposort still
    /// reports a cycle error defensively if the graph were mutated.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            Error::Validation(format!(
                "circular dependency detected involving task {}",
                self.graph[cycle.node_id()]
            ))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|idx| self.get_task(self.graph[idx].as_str()))
            .collect())
    }
}

impl std::fmt::Debug for TaskList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskList")
            .field("tasks", &self.tasks.len())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}
