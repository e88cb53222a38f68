//! Dependency graph between daemons started in one scope.
//!
//! Nodes start in topological order (dependencies first, ties broken by
//! insertion order). Registration follows start order, so registry teardown
//! runs dependents before their dependencies.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::GraphError;
use crate::spec::DaemonSpec;

/// One daemon in a [`DaemonGraph`].
#[derive(Debug, Clone)]
pub struct GraphNode {
    name: String,
    spec: DaemonSpec,
    depends_on: Vec<String>,
}

impl GraphNode {
    /// Logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What to start.
    #[must_use]
    pub const fn spec(&self) -> &DaemonSpec {
        &self.spec
    }

    /// Names of the nodes this one links to.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

/// Directed acyclic graph of daemons.
#[derive(Debug, Clone, Default)]
pub struct DaemonGraph {
    nodes: Vec<GraphNode>,
}

impl DaemonGraph {
    /// Empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Dependencies may name nodes added later.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] when `name` is already present.
    pub fn add<I, S>(
        &mut self,
        name: impl Into<String>,
        spec: DaemonSpec,
        depends_on: I,
    ) -> Result<&mut Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if self.node(&name).is_some() {
            return Err(GraphError::DuplicateNode { name });
        }
        self.nodes.push(GraphNode {
            name,
            spec,
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        });
        Ok(self)
    }

    /// Node called `name`.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deterministic start order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownDependency`] for a dangling edge and
    /// [`GraphError::Cycle`] listing the nodes that could not be ordered.
    pub fn start_order(&self) -> Result<Vec<&GraphNode>, GraphError> {
        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for node in &self.nodes {
            let mut deps = BTreeSet::new();
            for dependency in &node.depends_on {
                if self.node(dependency).is_none() {
                    return Err(GraphError::UnknownDependency {
                        node: node.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                deps.insert(dependency.as_str());
            }
            pending.insert(node.name.as_str(), deps);
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        while order.len() < self.nodes.len() {
            let next = self.nodes.iter().find(|node| {
                pending
                    .get(node.name.as_str())
                    .is_some_and(BTreeSet::is_empty)
            });
            let Some(next) = next else {
                return Err(GraphError::Cycle {
                    nodes: self
                        .nodes
                        .iter()
                        .filter(|node| pending.contains_key(node.name.as_str()))
                        .map(|node| node.name.clone())
                        .collect(),
                });
            };
            pending.remove(next.name.as_str());
            for deps in pending.values_mut() {
                deps.remove(next.name.as_str());
            }
            order.push(next);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::role::Role;

    fn graph(edges: &[(&str, &[&str])]) -> DaemonGraph {
        let mut graph = DaemonGraph::new();
        for (name, deps) in edges {
            graph
                .add(*name, DaemonSpec::new(Role::Agent), deps.iter().copied())
                .expect("add node");
        }
        graph
    }

    fn names(graph: &DaemonGraph) -> Result<Vec<String>, GraphError> {
        graph
            .start_order()
            .map(|order| order.iter().map(|node| node.name().to_owned()).collect())
    }

    #[rstest]
    #[case::independent(&[("a", &[] as &[&str]), ("b", &[])], &["a", "b"])]
    #[case::chain(&[("agent", &["control"] as &[&str]), ("control", &[])], &["control", "agent"])]
    #[case::diamond(
        &[("d", &["b", "c"] as &[&str]), ("c", &["a"]), ("b", &["a"]), ("a", &[])],
        &["a", "c", "b", "d"]
    )]
    fn orders_dependencies_first(#[case] edges: &[(&str, &[&str])], #[case] expected: &[&str]) {
        assert_eq!(names(&graph(edges)).expect("order"), expected);
    }

    #[test]
    fn rejects_cycles() {
        let cyclic = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        assert_eq!(
            names(&cyclic),
            Err(GraphError::Cycle {
                nodes: vec!["a".to_owned(), "b".to_owned()],
            })
        );
    }

    #[test]
    fn rejects_unknown_dependencies() {
        let dangling = graph(&[("agent", &["control"])]);
        assert_eq!(
            names(&dangling),
            Err(GraphError::UnknownDependency {
                node: "agent".to_owned(),
                dependency: "control".to_owned(),
            })
        );
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut graph = graph(&[("a", &[])]);
        let error = graph
            .add("a", DaemonSpec::new(Role::Control), Vec::<String>::new())
            .expect_err("duplicate");
        assert_eq!(error, GraphError::DuplicateNode { name: "a".to_owned() });
    }
}
