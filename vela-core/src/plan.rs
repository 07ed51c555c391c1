//! Plan compilation - topological ordering of a dependency graph
//!
//! A Plan is the apply order over a descriptor set: every dependency
//! precedes its dependents. Compilation is deterministic for a fixed input
//! ordering; ties between ready nodes are broken by insertion order.

use std::collections::BTreeSet;
use std::fmt;

use crate::descriptor::ResourceDescriptor;
use crate::graph::{DependencyGraph, GraphError};

/// Topologically valid apply order over a set of descriptors.
#[derive(Debug, Clone)]
pub struct Plan {
    steps: Vec<ResourceDescriptor>,
}

impl Plan {
    /// Compile a graph into apply order using Kahn's algorithm, always
    /// removing the zero-indegree node that was inserted earliest.
    ///
    /// The graph already rejected cycles at build time; the re-check here
    /// covers graphs constructed through other means.
    pub fn compile(graph: &DependencyGraph) -> Result<Self, GraphError> {
        let nodes = graph.nodes();
        let n = nodes.len();

        let index: std::collections::HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, d)| (d.logical_name.as_str(), i))
            .collect();

        let mut indegree: Vec<usize> = nodes.iter().map(|d| d.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.depends_on {
                if let Some(&j) = index.get(dep.as_str()) {
                    dependents[j].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> =
            (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &j in &dependents[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.insert(j);
                }
            }
        }

        if order.len() != n {
            // A node never reached indegree zero.
            let stuck = (0..n)
                .find(|i| !order.contains(i))
                .map(|i| nodes[i].logical_name.clone())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(Self {
            steps: order.into_iter().map(|i| nodes[i].clone()).collect(),
        })
    }

    /// Steps in apply order.
    pub fn steps(&self) -> &[ResourceDescriptor] {
        &self.steps
    }

    /// Steps in teardown order: the exact reverse of apply order, so every
    /// dependent is destroyed before the resources it depends on.
    pub fn teardown_steps(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.steps.iter().rev()
    }

    pub fn position(&self, logical_name: &str) -> Option<usize> {
        self.steps.iter().position(|d| d.logical_name == logical_name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{} ({})", step.logical_name, step.kind)?;
        }
        Ok(())
    }
}
