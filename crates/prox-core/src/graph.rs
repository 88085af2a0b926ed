use std::collections::{BTreeSet, HashMap};

use crate::ids::EntityId;

/// Symmetric "currently near" relation between entities.
///
/// Unknown entities are treated as having no edges; every mutation is a
/// no-op when the graph already has the requested shape.
#[derive(Clone, Debug, Default)]
pub struct ContactGraph {
    adjacency: HashMap<EntityId, BTreeSet<EntityId>>,
    edges: usize,
}

impl ContactGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the edge `a-b`. Returns false if it already existed or `a == b`.
    pub fn add_edge(&mut self, a: EntityId, b: EntityId) -> bool {
        if a == b || self.contains_edge(a, b) {
            return false;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
        self.edges += 1;
        true
    }

    /// Remove the edge `a-b`. Returns false if it was absent.
    pub fn remove_edge(&mut self, a: EntityId, b: EntityId) -> bool {
        if !self.contains_edge(a, b) {
            return false;
        }
        self.unlink(a, b);
        self.unlink(b, a);
        self.edges -= 1;
        true
    }

    fn unlink(&mut self, from: EntityId, to: EntityId) {
        if let Some(set) = self.adjacency.get_mut(&from) {
            set.remove(&to);
            if set.is_empty() {
                self.adjacency.remove(&from);
            }
        }
    }

    pub fn contains_edge(&self, a: EntityId, b: EntityId) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }

    /// Neighbors of `a` in ascending id order.
    pub fn neighbors(&self, a: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        self.adjacency.get(&a).into_iter().flatten().copied()
    }

    pub fn degree(&self, a: EntityId) -> usize {
        self.adjacency.get(&a).map_or(0, BTreeSet::len)
    }

    pub fn edge_count(&self) -> usize {
        self.edges
    }

    /// Every edge once, as `(low, high)` pairs in ascending order.
    pub fn edges(&self) -> Vec<(EntityId, EntityId)> {
        let mut out: Vec<(EntityId, EntityId)> = self
            .adjacency
            .iter()
            .flat_map(|(&a, set)| set.iter().filter(move |&&b| a < b).map(move |&b| (a, b)))
            .collect();
        out.sort_unstable();
        out
    }

    /// Drop every edge touching `a`, returning the former neighbors.
    pub fn remove_entity(&mut self, a: EntityId) -> Vec<EntityId> {
        let former: Vec<EntityId> = self.neighbors(a).collect();
        for &b in &former {
            self.remove_edge(a, b);
        }
        former
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(n: u64) -> EntityId {
        EntityId(n)
    }

    #[test]
    fn test_add_edge_is_symmetric() {
        let mut g = ContactGraph::new();
        assert!(g.add_edge(e(1), e(2)));
        assert!(g.contains_edge(e(1), e(2)));
        assert!(g.contains_edge(e(2), e(1)));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut g = ContactGraph::new();
        g.add_edge(e(1), e(2));
        assert!(!g.add_edge(e(2), e(1)));
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.degree(e(1)), 1);
    }

    #[test]
    fn test_self_edge_ignored() {
        let mut g = ContactGraph::new();
        assert!(!g.add_edge(e(3), e(3)));
        assert_eq!(g.degree(e(3)), 0);
    }

    #[test]
    fn test_remove_absent_edge_is_noop() {
        let mut g = ContactGraph::new();
        assert!(!g.remove_edge(e(1), e(2)));
        g.add_edge(e(1), e(2));
        assert!(g.remove_edge(e(2), e(1)));
        assert!(!g.remove_edge(e(1), e(2)));
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.neighbors(e(1)).count(), 0);
    }

    #[test]
    fn test_unknown_entity_has_no_neighbors() {
        let g = ContactGraph::new();
        assert_eq!(g.neighbors(e(99)).count(), 0);
    }

    #[test]
    fn test_remove_entity_releases_all_edges() {
        let mut g = ContactGraph::new();
        g.add_edge(e(1), e(2));
        g.add_edge(e(1), e(3));
        g.add_edge(e(2), e(3));

        let former = g.remove_entity(e(1));
        assert_eq!(former, vec![e(2), e(3)]);
        assert_eq!(g.degree(e(1)), 0);
        assert!(!g.contains_edge(e(2), e(1)));
        assert!(g.contains_edge(e(2), e(3)));
        assert_eq!(g.edge_count(), 1);
    }
}
