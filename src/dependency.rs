//! Dependency resolver
//!
//! Orders tables so that every referenced table is upserted before the tables
//! that reference it.
//!
//! Ranks follow the chain-depth rule used for foreign-key loading: starting
//! from each `(child, parent)` edge, chains are extended through the children
//! of the current child. A parent's rank is the deepest level at which it
//! appears as a parent; a table that is only ever a child gets its deepest
//! level plus one; tables without relationships get rank 0.

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use tracing::warn;

/// One step of a dependency chain
#[derive(Debug, Clone, Copy)]
struct ChainLink {
    first_child: NodeIndex,
    child: NodeIndex,
    parent: NodeIndex,
    level: usize,
}

/// Processing order derived from foreign-key dependencies
///
/// Edges point from the referencing (child) table to the referenced (parent) table.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyResolver {
    /// Build the graph from `(child, parent)` pairs; self-references are ignored
    pub fn new<S: AsRef<str>>(edges: &[(S, S)]) -> Self {
        let mut resolver = Self::default();
        for (child, parent) in edges {
            let (child, parent) = (child.as_ref(), parent.as_ref());
            if child == parent {
                continue;
            }
            let c = resolver.node(child);
            let p = resolver.node(parent);
            resolver.graph.update_edge(c, p, ());
        }
        resolver
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    /// Whether the foreign-key graph contains a cycle
    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Rank of every table that takes part in a relationship
    pub fn ranks(&self) -> HashMap<String, usize> {
        let links = self.chain_links();

        let mut parent_level: HashMap<NodeIndex, usize> = HashMap::new();
        let mut child_level: HashMap<NodeIndex, usize> = HashMap::new();
        for link in &links {
            let p = parent_level.entry(link.parent).or_default();
            *p = (*p).max(link.level);
            let c = child_level.entry(link.child).or_default();
            *c = (*c).max(link.level);
        }

        let mut ranks = HashMap::new();
        for (idx, level) in &parent_level {
            ranks.insert(self.graph[*idx].clone(), *level);
        }
        for (idx, level) in &child_level {
            let is_parent = self
                .graph
                .neighbors_directed(*idx, Direction::Incoming)
                .next()
                .is_some();
            if !is_parent {
                ranks.insert(self.graph[*idx].clone(), level + 1);
            }
        }
        ranks
    }

    /// Rank each selected table; tables outside the graph get rank 0
    ///
    /// Sorted by ascending rank, ties by name.
    pub fn order<S: AsRef<str>>(&self, tables: &[S]) -> Vec<(String, usize)> {
        if self.has_cycle() {
            warn!(
                "Foreign key relationships contain a cycle; \
                 processing order may not satisfy every dependency"
            );
        }

        let ranks = self.ranks();
        let mut ordered: Vec<(String, usize)> = tables
            .iter()
            .map(|t| {
                let name = t.as_ref().to_string();
                let rank = ranks.get(&name).copied().unwrap_or(0);
                (name, rank)
            })
            .collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ordered.dedup_by(|a, b| a.0 == b.0);
        ordered
    }

    /// Expand every edge into the chains reachable through the children of its child
    fn chain_links(&self) -> Vec<ChainLink> {
        // Bounds chain length when the graph is cyclic
        let max_level = self.graph.node_count() + 1;

        let mut links: Vec<ChainLink> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(child, parent)| ChainLink {
                first_child: child,
                child,
                parent,
                level: 1,
            })
            .collect();

        let mut frontier = links.clone();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for link in &frontier {
                if link.level >= max_level {
                    continue;
                }
                // edges whose parent is this link's child
                for grandchild in self
                    .graph
                    .neighbors_directed(link.child, Direction::Incoming)
                {
                    let returns_to_start = link.child == link.first_child && link.level > 2;
                    if grandchild == link.parent || returns_to_start {
                        continue;
                    }
                    next.push(ChainLink {
                        first_child: link.first_child,
                        child: grandchild,
                        parent: link.child,
                        level: link.level + 1,
                    });
                }
            }
            links.extend(next.iter().copied());
            frontier = next;
        }
        links
    }
}
