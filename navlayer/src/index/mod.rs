//! Spatial indexing of containers.
//!
//! Containers live in a [`ContainerStore`] arena and are addressed by
//! [`ContainerId`]; the [`SpatialIndex`] is a bounding-box tree holding ids
//! only, so there are no ownership cycles between containers and tree nodes.
//!
//! The tree is a small R-tree: inserts descend by minimum bounding-box
//! enlargement, nodes split at a fixed fanout by redistributing entries to
//! minimize overlap, and queries prune subtrees whose box misses the search
//! area. A degenerate insert order (all boxes equal, sorted stripes) makes
//! the tree lopsided and queries degrade toward a linear scan; that is an
//! accepted fallback, not a failure.

use std::collections::HashMap;

use crate::calibrate::Calibrator;
use crate::container::{Container, ContainerId, ContainerKey};
use crate::geo::GeoArea;

/// Maximum entries per tree node before it splits.
pub const MAX_FANOUT: usize = 8;

/// Append-only arena owning all containers of a source.
#[derive(Debug, Default)]
pub struct ContainerStore {
    slots: Vec<Container>,
    by_key: HashMap<ContainerKey, ContainerId>,
}

impl ContainerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a container and returns its id.
    ///
    /// The key must not already be present; use [`ContainerStore::find`]
    /// first for get-or-create flows.
    pub fn insert(
        &mut self,
        key: ContainerKey,
        bounds: GeoArea,
        calibrator: Calibrator,
    ) -> ContainerId {
        debug_assert!(!self.by_key.contains_key(&key), "duplicate key {key}");
        let id = ContainerId(self.slots.len() as u32);
        self.slots.push(Container::new(id, key, bounds, calibrator));
        self.by_key.insert(key, id);
        id
    }

    /// Looks up a container by key.
    pub fn find(&self, key: &ContainerKey) -> Option<ContainerId> {
        self.by_key.get(key).copied()
    }

    /// The container behind an id.
    pub fn get(&self, id: ContainerId) -> Option<&Container> {
        self.slots.get(id.0 as usize)
    }

    /// Mutable access to the container behind an id.
    pub fn get_mut(&mut self, id: ContainerId) -> Option<&mut Container> {
        self.slots.get_mut(id.0 as usize)
    }

    /// Number of containers in the store.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the store holds no containers.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over all containers.
    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.slots.iter()
    }
}

#[derive(Debug, Clone)]
enum Entry {
    /// An inner entry pointing at a child node.
    Child(usize),
    /// A leaf entry holding a container and its bounding box.
    Leaf { id: ContainerId, bbox: GeoArea },
}

#[derive(Debug)]
struct Node {
    bbox: GeoArea,
    entries: Vec<Entry>,
    is_leaf: bool,
}

/// Bounding-box tree over container ids.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    nodes: Vec<Node>,
    root: Option<usize>,
    len: usize,
}

impl SpatialIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed containers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a container with its bounding box.
    pub fn insert(&mut self, id: ContainerId, bbox: GeoArea) {
        self.len += 1;
        let Some(root) = self.root else {
            let root = self.push_node(Node {
                bbox,
                entries: vec![Entry::Leaf { id, bbox }],
                is_leaf: true,
            });
            self.root = Some(root);
            return;
        };
        if let Some(sibling) = self.insert_rec(root, id, bbox) {
            // Root split: grow the tree by one level.
            let new_root = self.push_node(Node {
                bbox: self.nodes[root].bbox.union(&self.nodes[sibling].bbox),
                entries: vec![Entry::Child(root), Entry::Child(sibling)],
                is_leaf: false,
            });
            self.root = Some(new_root);
        }
    }

    /// Returns the ids of all containers whose bounding box intersects
    /// `area`, in no particular order.
    pub fn find_containers(&self, area: &GeoArea) -> Vec<ContainerId> {
        let mut found = Vec::new();
        let Some(root) = self.root else {
            return found;
        };
        let mut stack = vec![root];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if !node.bbox.intersects(area) {
                continue;
            }
            for entry in &node.entries {
                match entry {
                    Entry::Child(child) => stack.push(*child),
                    Entry::Leaf { id, bbox } => {
                        if bbox.intersects(area) {
                            found.push(*id);
                        }
                    }
                }
            }
        }
        found
    }

    fn push_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn entry_bbox(&self, entry: &Entry) -> GeoArea {
        match entry {
            Entry::Child(child) => self.nodes[*child].bbox,
            Entry::Leaf { bbox, .. } => *bbox,
        }
    }

    /// Recursive insert. Returns the index of a new sibling node when the
    /// visited node had to split.
    fn insert_rec(&mut self, node_idx: usize, id: ContainerId, bbox: GeoArea) -> Option<usize> {
        self.nodes[node_idx].bbox = self.nodes[node_idx].bbox.union(&bbox);

        if self.nodes[node_idx].is_leaf {
            self.nodes[node_idx].entries.push(Entry::Leaf { id, bbox });
            return (self.nodes[node_idx].entries.len() > MAX_FANOUT)
                .then(|| self.split_node(node_idx));
        }

        // Choose the child needing the least enlargement; break ties in
        // favor of the smaller box.
        let mut best: Option<(usize, f64, f64)> = None;
        for entry in &self.nodes[node_idx].entries {
            let Entry::Child(child) = entry else { continue };
            let child_bbox = self.nodes[*child].bbox;
            let enlargement = child_bbox.enlargement(&bbox);
            let extent = child_bbox.extent();
            let better = match best {
                None => true,
                Some((_, e, x)) => enlargement < e || (enlargement == e && extent < x),
            };
            if better {
                best = Some((*child, enlargement, extent));
            }
        }
        let (chosen, _, _) = best?;

        if let Some(sibling) = self.insert_rec(chosen, id, bbox) {
            self.nodes[node_idx].entries.push(Entry::Child(sibling));
            if self.nodes[node_idx].entries.len() > MAX_FANOUT {
                return Some(self.split_node(node_idx));
            }
        }
        None
    }

    /// Splits an overflowing node, redistributing entries to minimize the
    /// overlap of the two resulting boxes. Returns the new sibling's index.
    fn split_node(&mut self, node_idx: usize) -> usize {
        let entries = std::mem::take(&mut self.nodes[node_idx].entries);
        let is_leaf = self.nodes[node_idx].is_leaf;
        let bboxes: Vec<GeoArea> = entries.iter().map(|e| self.entry_bbox(e)).collect();

        // Quadratic seeds: the pair wasting the most area if grouped.
        let (mut seed_a, mut seed_b, mut worst) = (0, 1, f64::NEG_INFINITY);
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let waste =
                    bboxes[i].union(&bboxes[j]).extent() - bboxes[i].extent() - bboxes[j].extent();
                if waste > worst {
                    (seed_a, seed_b, worst) = (i, j, waste);
                }
            }
        }

        let mut group_a: Vec<usize> = vec![seed_a];
        let mut group_b: Vec<usize> = vec![seed_b];
        let mut bbox_a = bboxes[seed_a];
        let mut bbox_b = bboxes[seed_b];
        for i in 0..entries.len() {
            if i == seed_a || i == seed_b {
                continue;
            }
            let grow_a = bbox_a.enlargement(&bboxes[i]);
            let grow_b = bbox_b.enlargement(&bboxes[i]);
            let to_a = match grow_a.partial_cmp(&grow_b) {
                Some(std::cmp::Ordering::Less) => true,
                Some(std::cmp::Ordering::Greater) => false,
                _ => bbox_a.extent() <= bbox_b.extent(),
            };
            if to_a {
                bbox_a = bbox_a.union(&bboxes[i]);
                group_a.push(i);
            } else {
                bbox_b = bbox_b.union(&bboxes[i]);
                group_b.push(i);
            }
        }

        let take = |indices: &[usize]| -> Vec<Entry> {
            indices.iter().map(|&i| entries[i].clone()).collect()
        };
        self.nodes[node_idx].entries = take(&group_a);
        self.nodes[node_idx].bbox = bbox_a;
        self.push_node(Node {
            bbox: bbox_b,
            entries: take(&group_b),
            is_leaf,
        })
    }

    /// Verifies the tree invariants. Test support.
    #[cfg(test)]
    fn check_invariants(&self) {
        let Some(root) = self.root else {
            assert_eq!(self.len, 0);
            return;
        };
        let mut leaf_count = 0;
        let mut stack = vec![root];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            assert!(!node.entries.is_empty(), "empty node {node_idx}");
            assert!(node.entries.len() <= MAX_FANOUT, "overfull node {node_idx}");
            let mut union: Option<GeoArea> = None;
            for entry in &node.entries {
                let bbox = self.entry_bbox(entry);
                union = Some(union.map_or(bbox, |u| u.union(&bbox)));
                match entry {
                    Entry::Child(child) => {
                        assert!(!node.is_leaf);
                        stack.push(*child);
                    }
                    Entry::Leaf { .. } => {
                        assert!(node.is_leaf);
                        leaf_count += 1;
                    }
                }
            }
            assert_eq!(
                union.unwrap(),
                node.bbox,
                "node {node_idx} bbox is not the union of its children"
            );
        }
        assert_eq!(leaf_count, self.len);
    }
}
