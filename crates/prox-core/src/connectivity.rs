//! Connected-component tracking over the contact graph.
//!
//! Insertions go through a union-find (union-by-size, path compression).
//! Deletions cannot be undone by union-find, so a removed edge triggers a
//! bounded traversal of the old component's members only, after which the
//! parent pointers of exactly those members are rebuilt.

use std::collections::{HashMap, HashSet};

use crate::graph::ContactGraph;
use crate::ids::EntityId;

/// Opaque handle for a component. Only meaningful for comparison at a
/// single point in time: representatives change across merges and splits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentId(EntityId);

/// Two components joined by a new edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Merge {
    /// Prior members of the component containing the edge's first endpoint.
    pub left: Vec<EntityId>,
    /// Prior members of the component containing the second endpoint.
    pub right: Vec<EntityId>,
    pub merged: Vec<EntityId>,
}

/// A component broken apart by a removed edge. `components` are ordered by
/// their smallest member and each one is sorted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Split {
    pub components: Vec<Vec<EntityId>>,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectivityTracker {
    parent: HashMap<EntityId, EntityId>,
    /// Member list per representative. Only roots have an entry.
    members: HashMap<EntityId, Vec<EntityId>>,
}

impl ConnectivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `e` as a singleton component. No-op if already known.
    pub fn insert(&mut self, e: EntityId) {
        if self.parent.contains_key(&e) {
            return;
        }
        self.parent.insert(e, e);
        self.members.insert(e, vec![e]);
    }

    pub fn contains(&self, e: EntityId) -> bool {
        self.parent.contains_key(&e)
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Every tracked entity, sorted.
    pub fn entities(&self) -> Vec<EntityId> {
        let mut out: Vec<EntityId> = self.parent.keys().copied().collect();
        out.sort_unstable();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Forget `e`. Only singletons can be removed; returns false otherwise.
    pub fn remove(&mut self, e: EntityId) -> bool {
        let root = self.root(e);
        match self.members.get(&root) {
            Some(m) if m.len() == 1 && root == e => {
                self.members.remove(&root);
                self.parent.remove(&e);
                true
            }
            _ => false,
        }
    }

    /// Walk to the representative without compressing the path.
    fn root(&self, e: EntityId) -> EntityId {
        let mut cur = e;
        while let Some(&p) = self.parent.get(&cur) {
            if p == cur {
                break;
            }
            cur = p;
        }
        cur
    }

    /// Representative lookup with path compression.
    fn find(&mut self, e: EntityId) -> EntityId {
        let root = self.root(e);
        let mut cur = e;
        while cur != root {
            let next = self.parent.get(&cur).copied().unwrap_or(root);
            self.parent.insert(cur, root);
            cur = next;
        }
        root
    }

    pub fn component_of(&self, e: EntityId) -> ComponentId {
        ComponentId(self.root(e))
    }

    pub fn same_component(&self, a: EntityId, b: EntityId) -> bool {
        a == b || (self.contains(a) && self.contains(b) && self.root(a) == self.root(b))
    }

    /// Sorted members of `e`'s component. Unknown entities are their own
    /// singleton component.
    pub fn members_of(&self, e: EntityId) -> Vec<EntityId> {
        let mut out = self
            .members
            .get(&self.root(e))
            .cloned()
            .unwrap_or_else(|| vec![e]);
        out.sort_unstable();
        out
    }

    pub fn size_of(&self, e: EntityId) -> usize {
        self.members.get(&self.root(e)).map_or(1, Vec::len)
    }

    /// Number of distinct components currently tracked.
    pub fn component_count(&self) -> usize {
        self.members.len()
    }

    /// Account for a new edge `a-b`. Returns the merge if it joined two
    /// distinct components.
    pub fn on_edge_added(&mut self, a: EntityId, b: EntityId) -> Option<Merge> {
        self.insert(a);
        self.insert(b);
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return None;
        }

        let mut left = self.members.remove(&ra).unwrap_or_else(|| vec![ra]);
        let mut right = self.members.remove(&rb).unwrap_or_else(|| vec![rb]);
        left.sort_unstable();
        right.sort_unstable();

        let (winner, loser) = if left.len() >= right.len() {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent.insert(loser, winner);

        let mut merged = Vec::with_capacity(left.len() + right.len());
        merged.extend_from_slice(&left);
        merged.extend_from_slice(&right);
        merged.sort_unstable();
        self.members.insert(winner, merged.clone());

        Some(Merge {
            left,
            right,
            merged,
        })
    }

    /// Account for the removal of edge `a-b`, which must already be gone
    /// from `graph`. Returns the split if the old component fell apart.
    pub fn on_edge_removed(
        &mut self,
        graph: &ContactGraph,
        a: EntityId,
        b: EntityId,
    ) -> Option<Split> {
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        let root = self.find(a);
        if self.find(b) != root {
            return None;
        }

        let old = self.members.get(&root).cloned().unwrap_or_default();
        let scope: HashSet<EntityId> = old.iter().copied().collect();
        let mut visited: HashSet<EntityId> = HashSet::with_capacity(old.len());

        let first = collect_reachable(graph, a, &scope, &mut visited);
        if visited.contains(&b) {
            return None;
        }

        let components = self.repartition(graph, root, old, vec![first], &mut visited);
        tracing::debug!(
            edge = %format_args!("{a}-{b}"),
            parts = components.len(),
            "component split"
        );
        Some(Split { components })
    }

    /// Account for `e` having lost all of its edges in `graph` at once.
    /// Returns the split (with `e` as a singleton) unless `e` was already
    /// alone.
    pub fn on_entity_detached(&mut self, graph: &ContactGraph, e: EntityId) -> Option<Split> {
        if !self.contains(e) {
            return None;
        }
        let root = self.find(e);
        let old = self.members.get(&root).cloned().unwrap_or_default();
        if old.len() <= 1 {
            return None;
        }
        let mut visited = HashSet::with_capacity(old.len());
        let components = self.repartition(graph, root, old, Vec::new(), &mut visited);
        if components.len() <= 1 {
            return None;
        }
        Some(Split { components })
    }

    /// Partition `old` (the members under `root`) into the components
    /// actually connected in `graph`, then rebuild parent pointers for
    /// exactly those members. `found` holds components already discovered.
    fn repartition(
        &mut self,
        graph: &ContactGraph,
        root: EntityId,
        mut old: Vec<EntityId>,
        mut found: Vec<Vec<EntityId>>,
        visited: &mut HashSet<EntityId>,
    ) -> Vec<Vec<EntityId>> {
        let scope: HashSet<EntityId> = old.iter().copied().collect();
        old.sort_unstable();
        for &start in &old {
            if !visited.contains(&start) {
                found.push(collect_reachable(graph, start, &scope, visited));
            }
        }

        for comp in &mut found {
            comp.sort_unstable();
        }
        found.sort_by_key(|c| c.first().copied());

        self.members.remove(&root);
        for comp in &found {
            let Some(&rep) = comp.first() else {
                continue;
            };
            for &m in comp {
                self.parent.insert(m, rep);
            }
            self.members.insert(rep, comp.clone());
        }
        found
    }
}

/// Iterative traversal from `start`, restricted to `scope`. Marks every
/// reached entity in `visited` and returns them.
fn collect_reachable(
    graph: &ContactGraph,
    start: EntityId,
    scope: &HashSet<EntityId>,
    visited: &mut HashSet<EntityId>,
) -> Vec<EntityId> {
    let mut found = Vec::new();
    let mut stack = vec![start];
    visited.insert(start);
    while let Some(cur) = stack.pop() {
        found.push(cur);
        for next in graph.neighbors(cur) {
            if scope.contains(&next) && visited.insert(next) {
                stack.push(next);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(n: u64) -> EntityId {
        EntityId(n)
    }

    fn ids(ns: &[u64]) -> Vec<EntityId> {
        ns.iter().map(|&n| EntityId(n)).collect()
    }

    fn connect(g: &mut ContactGraph, t: &mut ConnectivityTracker, a: u64, b: u64) -> Option<Merge> {
        g.add_edge(e(a), e(b));
        t.on_edge_added(e(a), e(b))
    }

    fn disconnect(
        g: &mut ContactGraph,
        t: &mut ConnectivityTracker,
        a: u64,
        b: u64,
    ) -> Option<Split> {
        g.remove_edge(e(a), e(b));
        t.on_edge_removed(g, e(a), e(b))
    }

    #[test]
    fn test_merge_reports_prior_sets() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        connect(&mut g, &mut t, 1, 2);
        connect(&mut g, &mut t, 3, 4);
        connect(&mut g, &mut t, 4, 5);

        let m = connect(&mut g, &mut t, 2, 5).unwrap();
        assert_eq!(m.left, ids(&[1, 2]));
        assert_eq!(m.right, ids(&[3, 4, 5]));
        assert_eq!(m.merged, ids(&[1, 2, 3, 4, 5]));
        assert_eq!(t.size_of(e(1)), 5);
        assert_eq!(t.component_count(), 1);
    }

    #[test]
    fn test_edge_within_component_is_not_a_merge() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        connect(&mut g, &mut t, 1, 2);
        connect(&mut g, &mut t, 2, 3);
        assert!(connect(&mut g, &mut t, 1, 3).is_none());
    }

    #[test]
    fn test_removing_cycle_edge_does_not_split() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        connect(&mut g, &mut t, 1, 2);
        connect(&mut g, &mut t, 2, 3);
        connect(&mut g, &mut t, 3, 1);

        assert!(disconnect(&mut g, &mut t, 1, 2).is_none());
        assert!(t.same_component(e(1), e(2)));
        assert_eq!(t.members_of(e(2)), ids(&[1, 2, 3]));
    }

    #[test]
    fn test_last_edge_of_pair_yields_singletons() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        connect(&mut g, &mut t, 1, 2);

        let s = disconnect(&mut g, &mut t, 1, 2).unwrap();
        assert_eq!(s.components, vec![ids(&[1]), ids(&[2])]);
        assert!(!t.same_component(e(1), e(2)));
        assert_eq!(t.members_of(e(1)), ids(&[1]));
    }

    #[test]
    fn test_split_path_in_the_middle() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        for (a, b) in [(1, 2), (2, 3), (3, 4), (4, 5)] {
            connect(&mut g, &mut t, a, b);
        }

        let s = disconnect(&mut g, &mut t, 3, 4).unwrap();
        assert_eq!(s.components, vec![ids(&[1, 2, 3]), ids(&[4, 5])]);
        assert!(t.same_component(e(1), e(3)));
        assert!(t.same_component(e(4), e(5)));
        assert!(!t.same_component(e(3), e(4)));
    }

    #[test]
    fn test_split_leaves_unrelated_components_alone() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        connect(&mut g, &mut t, 1, 2);
        connect(&mut g, &mut t, 10, 11);
        let before = t.component_of(e(10));

        disconnect(&mut g, &mut t, 1, 2).unwrap();
        assert_eq!(t.component_of(e(10)), before);
        assert_eq!(t.members_of(e(11)), ids(&[10, 11]));
    }

    #[test]
    fn test_merge_after_split_reuses_tracker_state() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        connect(&mut g, &mut t, 1, 2);
        connect(&mut g, &mut t, 2, 3);
        disconnect(&mut g, &mut t, 1, 2).unwrap();

        let m = connect(&mut g, &mut t, 1, 3).unwrap();
        assert_eq!(m.left, ids(&[1]));
        assert_eq!(m.right, ids(&[2, 3]));
        assert_eq!(t.members_of(e(1)), ids(&[1, 2, 3]));
    }

    #[test]
    fn test_remove_only_singletons() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        connect(&mut g, &mut t, 1, 2);
        assert!(!t.remove(e(1)));

        disconnect(&mut g, &mut t, 1, 2);
        assert!(t.remove(e(1)));
        assert!(t.remove(e(2)));
        assert!(t.is_empty());
    }

    #[test]
    fn test_detach_hub_splits_star() {
        let mut g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        for leaf in [2, 3, 4] {
            connect(&mut g, &mut t, 1, leaf);
        }
        connect(&mut g, &mut t, 3, 4);

        g.remove_entity(e(1));
        let s = t.on_entity_detached(&g, e(1)).unwrap();
        assert_eq!(s.components, vec![ids(&[1]), ids(&[2]), ids(&[3, 4])]);
        assert!(t.remove(e(1)));
        assert!(t.same_component(e(3), e(4)));
    }

    #[test]
    fn test_detach_singleton_is_none() {
        let g = ContactGraph::new();
        let mut t = ConnectivityTracker::new();
        t.insert(e(1));
        assert!(t.on_entity_detached(&g, e(1)).is_none());
    }

    #[test]
    fn test_unknown_entity_is_its_own_component() {
        let t = ConnectivityTracker::new();
        assert_eq!(t.members_of(e(5)), ids(&[5]));
        assert!(t.same_component(e(5), e(5)));
        assert!(!t.same_component(e(5), e(6)));
    }
}
