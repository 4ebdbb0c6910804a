//! Validated, topologically ordered set of resource specs

use crate::error::{CloudError, Result};
use crate::spec::ResourceSpec;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Immutable deployment plan.
///
/// Specs are stored in topological order (dependencies first); ties between
/// independent specs keep their declaration order, so the order is fully
/// determined by the input.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Specs in topological order
    specs: Vec<ResourceSpec>,
    /// Edge dependency -> dependent, node weights are positions in `specs`
    graph: DiGraph<usize, ()>,
    /// Spec id -> position in `specs`
    index: HashMap<String, usize>,
}

impl Plan {
    /// Validate and order a set of specs.
    ///
    /// Fails on duplicate ids, dependencies on unknown ids, references to
    /// outputs of specs that are not dependencies, and cycles.
    pub fn new(specs: Vec<ResourceSpec>) -> Result<Self> {
        let mut declared: HashMap<&str, usize> = HashMap::new();
        for (position, spec) in specs.iter().enumerate() {
            if spec.id.trim().is_empty() {
                return Err(CloudError::InvalidPlan(format!(
                    "resource #{} has an empty id",
                    position + 1
                )));
            }
            if declared.insert(spec.id.as_str(), position).is_some() {
                return Err(CloudError::InvalidPlan(format!(
                    "duplicate resource id '{}'",
                    spec.id
                )));
            }
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(specs.len(), 0);
        let nodes: Vec<NodeIndex> = (0..specs.len()).map(|i| graph.add_node(i)).collect();

        for (position, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                let Some(&dep_position) = declared.get(dep.as_str()) else {
                    return Err(CloudError::InvalidPlan(format!(
                        "'{}' depends on unknown resource '{}'",
                        spec.id, dep
                    )));
                };
                if dep_position == position {
                    return Err(CloudError::InvalidPlan(format!(
                        "'{}' depends on itself",
                        spec.id
                    )));
                }
                graph.add_edge(nodes[dep_position], nodes[position], ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let at = graph[cycle.node_id()];
            return Err(CloudError::InvalidPlan(format!(
                "dependency cycle involving '{}'",
                specs[at].id
            )));
        }

        // Kahn's algorithm, always taking the earliest declared ready spec
        let mut remaining: Vec<usize> = nodes
            .iter()
            .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(specs.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for dependent in graph.neighbors_directed(nodes[next], Direction::Outgoing) {
                let d = graph[dependent];
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }

        let mut slots: Vec<Option<ResourceSpec>> = specs.into_iter().map(Some).collect();
        let sorted: Vec<ResourceSpec> = order
            .iter()
            .filter_map(|&declared_at| slots[declared_at].take())
            .collect();

        let plan = Self::from_sorted(sorted);
        plan.validate_references()?;
        tracing::debug!("Plan ordered: {}", plan.ids().join(" -> "));
        Ok(plan)
    }

    /// Build the graph for specs already in topological order
    fn from_sorted(specs: Vec<ResourceSpec>) -> Self {
        let index: HashMap<String, usize> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(specs.len(), 0);
        for i in 0..specs.len() {
            graph.add_node(i);
        }
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                if let Some(&d) = index.get(dep) {
                    graph.add_edge(NodeIndex::new(d), NodeIndex::new(i), ());
                }
            }
        }
        Self {
            specs,
            graph,
            index,
        }
    }

    /// Output references may only point at (transitive) dependencies
    fn validate_references(&self) -> Result<()> {
        for spec in &self.specs {
            let referenced = spec.referenced_specs();
            if referenced.is_empty() {
                continue;
            }
            let ancestors = self.transitive_dependencies(&spec.id);
            for target in referenced {
                if !ancestors.contains(&target) {
                    return Err(CloudError::InvalidPlan(format!(
                        "'{}' references outputs of '{}' which is not one of its dependencies",
                        spec.id, target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Specs in topological order
    pub fn specs(&self) -> &[ResourceSpec] {
        &self.specs
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.specs.iter()
    }

    /// Spec ids in topological order
    pub fn ids(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceSpec> {
        self.index.get(id).map(|&i| &self.specs[i])
    }

    /// Position of a spec in topological order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Positions of the direct dependencies of the spec at `position`
    pub(crate) fn dependency_positions(&self, position: usize) -> Vec<usize> {
        self.neighbors(position, Direction::Incoming)
    }

    /// Positions of the direct dependents of the spec at `position`
    pub(crate) fn dependent_positions(&self, position: usize) -> Vec<usize> {
        self.neighbors(position, Direction::Outgoing)
    }

    fn neighbors(&self, position: usize, direction: Direction) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(position), direction)
            .map(|n| self.graph[n])
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Ids of direct dependents
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.position(id)
            .map(|p| {
                self.dependent_positions(p)
                    .into_iter()
                    .map(|d| self.specs[d].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of every spec that depends on `id`, directly or not
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        self.walk(id, Direction::Outgoing)
    }

    /// Ids of every spec `id` depends on, directly or not
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
        self.walk(id, Direction::Incoming)
    }

    fn walk(&self, id: &str, direction: Direction) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let Some(start) = self.position(id) else {
            return found;
        };
        let mut seen = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for next in self.neighbors(current, direction) {
                if seen.insert(next) {
                    found.insert(self.specs[next].id.clone());
                    stack.push(next);
                }
            }
        }
        found
    }

    /// Plan restricted to `targets` and everything they depend on
    pub fn subset(&self, targets: &[String]) -> Result<Self> {
        let mut keep: BTreeSet<String> = BTreeSet::new();
        for target in targets {
            if self.get(target).is_none() {
                return Err(CloudError::InvalidPlan(format!(
                    "unknown resource '{}'",
                    target
                )));
            }
            keep.insert(target.clone());
            keep.extend(self.transitive_dependencies(target));
        }
        let specs = self
            .specs
            .iter()
            .filter(|s| keep.contains(&s.id))
            .cloned()
            .collect();
        Ok(Self::from_sorted(specs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ResourceKind;
    use serde_json::json;

    fn spec(id: &str, kind: ResourceKind, deps: &[&str]) -> ResourceSpec {
        deps.iter()
            .fold(ResourceSpec::new(id, kind), |s, d| s.with_dependency(*d))
    }

    fn search_stack() -> Vec<ResourceSpec> {
        vec![
            spec("i1", ResourceKind::Network, &["r1", "r2"]),
            spec("r2", ResourceKind::Release, &["n1"]),
            spec("r1", ResourceKind::Release, &["n1"]),
            spec("n1", ResourceKind::Namespace, &["c1"]),
            spec("c1", ResourceKind::Cluster, &[]),
        ]
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let plan = Plan::new(search_stack()).unwrap();
        // r2 was declared before r1, so it stays first among equals
        assert_eq!(plan.ids(), vec!["c1", "n1", "r2", "r1", "i1"]);

        let again = Plan::new(search_stack()).unwrap();
        assert_eq!(plan.ids(), again.ids());
    }

    #[test]
    fn test_every_edge_respected() {
        let plan = Plan::new(search_stack()).unwrap();
        for spec in plan.iter() {
            let at = plan.position(&spec.id).unwrap();
            for dep in &spec.depends_on {
                assert!(plan.position(dep).unwrap() < at);
            }
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Plan::new(vec![
            spec("a", ResourceKind::Namespace, &[]),
            spec("a", ResourceKind::Namespace, &[]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = Plan::new(vec![spec("a", ResourceKind::Namespace, &["ghost"])]).unwrap_err();
        assert!(matches!(err, CloudError::InvalidPlan(_)));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Plan::new(vec![
            spec("a", ResourceKind::Namespace, &["c"]),
            spec("b", ResourceKind::Namespace, &["a"]),
            spec("c", ResourceKind::Namespace, &["b"]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        assert!(Plan::new(vec![spec("a", ResourceKind::Namespace, &["a"])]).is_err());
    }

    #[test]
    fn test_transitive_dependents() {
        let plan = Plan::new(search_stack()).unwrap();
        let dependents = plan.transitive_dependents("n1");
        assert_eq!(
            dependents.into_iter().collect::<Vec<_>>(),
            vec!["i1", "r1", "r2"]
        );
        assert!(plan.transitive_dependents("i1").is_empty());
        assert_eq!(plan.dependents("r1"), vec!["i1"]);
    }

    #[test]
    fn test_reference_must_be_dependency() {
        let err = Plan::new(vec![
            spec("lb", ResourceKind::Network, &[]),
            spec("ing", ResourceKind::Network, &[])
                .with_parameter("host", json!("{{ lb.hostname }}")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("not one of its dependencies"));

        let ok = Plan::new(vec![
            spec("lb", ResourceKind::Network, &[]),
            spec("ing", ResourceKind::Network, &["lb"])
                .with_parameter("host", json!("{{ lb.hostname }}")),
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_subset_keeps_dependencies() {
        let plan = Plan::new(search_stack()).unwrap();
        let subset = plan.subset(&["r1".to_string()]).unwrap();
        assert_eq!(subset.ids(), vec!["c1", "n1", "r1"]);
        assert!(plan.subset(&["nope".to_string()]).is_err());
    }
}
