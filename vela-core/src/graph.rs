//! Dependency graph over resource descriptors
//!
//! Construction validates every `depends_on` edge and rejects cycles, so a
//! graph that exists is always safe to compile into a plan. Building the
//! graph is pure; no provider call happens before validation passes.

use std::collections::HashMap;

use thiserror::Error;

use crate::descriptor::ResourceDescriptor;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate logical name: {0}")]
    DuplicateName(String),

    #[error("dependency cycle involving {0}")]
    Cycle(String),

    #[error("{dependent} depends on {missing}, which is not in the descriptor set")]
    DanglingReference { dependent: String, missing: String },
}

/// Immutable DAG of descriptors, keyed by logical name.
///
/// Nodes keep their insertion order; the plan compiler uses that order to
/// break ties deterministically.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceDescriptor>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Validate a descriptor set and assemble it into a graph.
    pub fn build(descriptors: Vec<ResourceDescriptor>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            if index.insert(descriptor.logical_name.clone(), i).is_some() {
                return Err(GraphError::DuplicateName(descriptor.logical_name.clone()));
            }
        }

        let graph = Self {
            nodes: descriptors,
            index,
        };
        graph.check_references()?;
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, logical_name: &str) -> bool {
        self.index.contains_key(logical_name)
    }

    pub fn get(&self, logical_name: &str) -> Option<&ResourceDescriptor> {
        self.index.get(logical_name).map(|&i| &self.nodes[i])
    }

    /// Descriptors in insertion order.
    pub fn nodes(&self) -> &[ResourceDescriptor] {
        &self.nodes
    }

    /// Logical names that directly depend on `logical_name`.
    pub fn dependents_of(&self, logical_name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.depends_on.contains(logical_name))
            .map(|n| n.logical_name.as_str())
            .collect()
    }

    fn check_references(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for dep in &node.depends_on {
                if !self.index.contains_key(dep) {
                    return Err(GraphError::DanglingReference {
                        dependent: node.logical_name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut marks = vec![Mark::White; self.nodes.len()];
        for i in 0..self.nodes.len() {
            if marks[i] == Mark::White {
                self.visit(i, &mut marks)?;
            }
        }
        Ok(())
    }

    fn visit(&self, i: usize, marks: &mut [Mark]) -> Result<(), GraphError> {
        marks[i] = Mark::Gray;
        for dep in &self.nodes[i].depends_on {
            // References were validated before this runs.
            let j = self.index[dep.as_str()];
            match marks[j] {
                Mark::Gray => return Err(GraphError::Cycle(dep.clone())),
                Mark::White => self.visit(j, marks)?,
                Mark::Black => {}
            }
        }
        marks[i] = Mark::Black;
        Ok(())
    }
}

/// Three-color marker for the cycle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ResourceKind;

    fn vpc() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Vpc, "vpc")
    }

    fn subnet(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Subnet, name).with_dependency("vpc")
    }

    #[test]
    fn builds_valid_graph() {
        let graph =
            DependencyGraph::build(vec![vpc(), subnet("public-1"), subnet("public-2")]).unwrap();

        assert_eq!(graph.len(), 3);
        assert!(graph.contains("public-1"));
        assert_eq!(graph.dependents_of("vpc"), vec!["public-1", "public-2"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = DependencyGraph::build(vec![vpc(), vpc()]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateName("vpc".to_string()));
    }

    #[test]
    fn rejects_dangling_reference() {
        let err = DependencyGraph::build(vec![subnet("public-1")]).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingReference {
                dependent: "public-1".to_string(),
                missing: "vpc".to_string(),
            }
        );
    }

    #[test]
    fn rejects_direct_cycle() {
        let a = ResourceDescriptor::new(ResourceKind::Route, "a").with_dependency("b");
        let b = ResourceDescriptor::new(ResourceKind::Route, "b").with_dependency("a");

        let err = DependencyGraph::build(vec![a, b]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn rejects_transitive_cycle() {
        let a = ResourceDescriptor::new(ResourceKind::Route, "a").with_dependency("c");
        let b = ResourceDescriptor::new(ResourceKind::Route, "b").with_dependency("a");
        let c = ResourceDescriptor::new(ResourceKind::Route, "c").with_dependency("b");

        let err = DependencyGraph::build(vec![a, b, c]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let a = ResourceDescriptor::new(ResourceKind::Route, "a").with_dependency("a");
        let err = DependencyGraph::build(vec![a]).unwrap_err();
        assert_eq!(err, GraphError::Cycle("a".to_string()));
    }
}
