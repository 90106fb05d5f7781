//! Workflow dependency graph
//!
//! Models `requires` edges between workflow job references as a directed
//! graph. Topological sort detects cycles before any execution begins, and
//! a deterministic ordering (FIFO by topological discovery, ties broken by
//! reference name) makes admission reproducible across runs.

use std::collections::{HashSet, VecDeque};

use gantry_core::domain::pipeline::WorkflowJobRef;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::error::{DefinitionError, Result};

/// Validated dependency graph for one workflow
///
/// Edges point from dependency to dependent.
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
}

impl<'a> DependencyGraph<'a> {
    /// Build and validate the graph for a workflow's job references.
    ///
    /// Fails on duplicate reference names, `requires` edges naming a
    /// reference absent from the workflow, and dependency cycles.
    pub fn build(workflow: &str, refs: &'a [WorkflowJobRef]) -> Result<Self> {
        let mut graph = DiGraphMap::new();
        let mut seen = HashSet::new();

        for job_ref in refs {
            let name = job_ref.ref_name();
            if !seen.insert(name) {
                return Err(DefinitionError::DuplicateReference {
                    workflow: workflow.to_string(),
                    reference: name.to_string(),
                });
            }
            graph.add_node(name);
        }

        for job_ref in refs {
            let name = job_ref.ref_name();
            for requires in &job_ref.requires {
                if !seen.contains(requires.as_str()) {
                    return Err(DefinitionError::DanglingRequire {
                        workflow: workflow.to_string(),
                        reference: name.to_string(),
                        requires: requires.clone(),
                    });
                }
                graph.add_edge(requires.as_str(), name, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| DefinitionError::CyclicDependency {
            workflow: workflow.to_string(),
            node: cycle.node_id().to_string(),
        })?;

        Ok(Self { graph })
    }

    /// Deterministic topological order: references are discovered FIFO as
    /// their dependencies complete, with simultaneous discoveries ordered by
    /// name.
    pub fn ordered(&self) -> Vec<&'a str> {
        let mut indegree: std::collections::HashMap<&str, usize> = self
            .graph
            .nodes()
            .map(|n| {
                (
                    n,
                    self.graph.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut roots: Vec<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        roots.sort_unstable();

        let mut queue: VecDeque<&str> = roots.into();
        let mut order = Vec::with_capacity(indegree.len());

        while let Some(name) = queue.pop_front() {
            order.push(name);

            let mut newly_ready: Vec<&str> = Vec::new();
            for dependent in self.graph.neighbors_directed(name, Direction::Outgoing) {
                let degree = indegree
                    .get_mut(dependent)
                    .expect("dependent registered at build time");
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(dependent);
                }
            }
            newly_ready.sort_unstable();
            queue.extend(newly_ready);
        }

        order
    }

    /// Transitive closure of everything `name` depends on
    pub fn dependencies_of(&self, name: &str) -> HashSet<&'a str> {
        self.closure(name, Direction::Incoming)
    }

    /// Transitive closure of everything depending on `name`
    pub fn dependents_of(&self, name: &str) -> HashSet<&'a str> {
        self.closure(name, Direction::Outgoing)
    }

    fn closure(&self, name: &str, direction: Direction) -> HashSet<&'a str> {
        let mut visited = HashSet::new();
        let Some(start) = self.graph.nodes().find(|n| *n == name) else {
            return visited;
        };

        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for neighbor in self.graph.neighbors_directed(current, direction) {
                if visited.insert(neighbor) {
                    stack.push(neighbor);
                }
            }
        }
        visited
    }
}
