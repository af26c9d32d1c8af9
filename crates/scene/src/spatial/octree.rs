use std::collections::{BTreeSet, VecDeque};

use foundation::arena::Arena;
use foundation::bounds::Aabb3;
use foundation::math::precision::{argmin_by_key, stable_total_cmp_f64};
use foundation::math::{Mat4, Vec3};

use crate::camera::projected_screen_area;
use crate::icon::MarkerId;

/// Index of a node in an [`IconOctree`]. Node 0 is the root; ids follow
/// breadth-first order, so a parent always has a lower id than its children.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OctreeParams {
    /// A leaf holding more markers than this is split.
    pub max_leaf_size: usize,
    /// Leaves at this level are never split, whatever they hold.
    pub max_depth: u32,
}

impl Default for OctreeParams {
    fn default() -> Self {
        Self {
            max_leaf_size: 2,
            max_depth: 8,
        }
    }
}

/// A marker as seen by the index.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Entry {
    pub marker: MarkerId,
    pub position: Vec3,
}

impl Entry {
    pub fn new(marker: MarkerId, position: Vec3) -> Self {
        Self { marker, position }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OctreeNode {
    bounds: Aabb3,
    level: u32,
    children: Vec<NodeId>,
    entries: Vec<Entry>,
    representative: Option<Entry>,
    marker_count: usize,
}

impl OctreeNode {
    pub fn bounds(&self) -> &Aabb3 {
        &self.bounds
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Markers stored directly in this node (non-empty only for leaves).
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Markers in the whole subtree.
    pub fn marker_count(&self) -> usize {
        self.marker_count
    }

    pub fn representative(&self) -> Option<Entry> {
        self.representative
    }
}

/// Mutable node used while inserting, before pruning and compaction.
struct BuildNode {
    bounds: Aabb3,
    level: u32,
    children: Option<[usize; 8]>,
    entries: Vec<Entry>,
}

/// Static point octree over one collection's markers.
///
/// Built once: markers are inserted, empty subtrees pruned, the arena
/// compacted breadth-first and a medoid representative assigned to every node
/// bottom-up. Leaves always hold at least one marker; only the root of an
/// empty octree is empty.
#[derive(Debug, Clone)]
pub struct IconOctree {
    nodes: Arena<OctreeNode>,
    params: OctreeParams,
}

/// Tight bounds around `positions`; `None` when empty.
pub fn minimal_bounds(positions: impl IntoIterator<Item = Vec3>) -> Option<Aabb3> {
    Aabb3::from_points(positions)
}

impl IconOctree {
    /// Build over `entries` inside `bounds`. The bounds are grown to contain
    /// every entry.
    pub fn new(entries: impl IntoIterator<Item = Entry>, bounds: Aabb3, params: OctreeParams) -> Self {
        let entries: Vec<Entry> = entries.into_iter().collect();
        let bounds = minimal_bounds(entries.iter().map(|e| e.position))
            .map_or(bounds, |tight| bounds.union(tight));
        let max_leaf_size = params.max_leaf_size.max(1);

        let mut build = vec![BuildNode {
            bounds,
            level: 0,
            children: None,
            entries: Vec::with_capacity(entries.len().min(max_leaf_size + 1)),
        }];
        for entry in entries {
            insert(&mut build, 0, entry, max_leaf_size, params.max_depth);
        }

        let mut tree = Self {
            nodes: compact(build),
            params,
        };
        tree.assign_representatives();
        tree
    }

    /// Build over `entries` using their tight bounds.
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>, params: OctreeParams) -> Self {
        let entries: Vec<Entry> = entries.into_iter().collect();
        let bounds = minimal_bounds(entries.iter().map(|e| e.position))
            .unwrap_or(Aabb3::new(Vec3::ZERO, Vec3::ZERO));
        Self::new(entries, bounds, params)
    }

    pub fn params(&self) -> OctreeParams {
        self.params
    }

    /// `None` for an octree without markers; callers must special-case that.
    pub fn root(&self) -> Option<NodeId> {
        (self.nodes[0].marker_count > 0).then_some(NodeId(0))
    }

    pub fn is_empty(&self) -> bool {
        self.root().is_none()
    }

    pub fn marker_count(&self) -> usize {
        self.nodes[0].marker_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &OctreeNode {
        &self.nodes[id.index()]
    }

    pub fn bounds(&self) -> &Aabb3 {
        &self.nodes[0].bounds
    }

    /// Deepest node level; 0 for a single-node tree.
    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|(_, n)| n.level).max().unwrap_or(0)
    }

    /// Node ids at `level`, in breadth-first order.
    pub fn nodes_at_level(&self, level: u32) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.level == level)
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    pub fn representative(&self, id: NodeId) -> Option<MarkerId> {
        self.node(id).representative.map(|e| e.marker)
    }

    /// Every marker in the subtree of `id`, leaves visited in child order.
    pub fn all_markers(&self, id: NodeId) -> Vec<MarkerId> {
        let mut out = Vec::with_capacity(self.node(id).marker_count);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            out.extend(node.entries.iter().map(|e| e.marker));
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// True if `id` or any node below it is in `set`.
    pub fn has_descendant_in_set(&self, id: NodeId, set: &BTreeSet<NodeId>) -> bool {
        if set.contains(&id) {
            return true;
        }
        self.node(id)
            .children
            .iter()
            .any(|child| self.has_descendant_in_set(*child, set))
    }

    /// Level-of-detail selection by projected screen coverage.
    ///
    /// Breadth-first from the root: leaves are selected; an internal node is
    /// expanded into all of its children when any child covers more than
    /// `area_threshold` of the screen, and is otherwise selected as a cluster.
    /// The result is disjoint and covers every marker exactly once.
    pub fn lod_by_screen_area(&self, area_threshold: f64, view_projection: &Mat4) -> Vec<NodeId> {
        self.lod_by_screen_area_from_level(area_threshold, view_projection, 0)
    }

    /// As [`IconOctree::lod_by_screen_area`], but nodes shallower than
    /// `minimum_level` are always expanded.
    pub fn lod_by_screen_area_from_level(
        &self,
        area_threshold: f64,
        view_projection: &Mat4,
        minimum_level: u32,
    ) -> Vec<NodeId> {
        self.select_breadth_first(|node| {
            node.level < minimum_level
                || node.children.iter().any(|child| {
                    projected_screen_area(&self.node(*child).bounds, view_projection) > area_threshold
                })
        })
    }

    /// Distance-driven selection.
    ///
    /// A node with a marker within `distance_threshold` of `camera` is always
    /// expanded. A node with a marker within `distance_threshold` plus its own
    /// diagonal is expanded unless it sits at `max_depth`. Anything else is
    /// selected as a cluster.
    pub fn lod_by_distance_with_clustering(
        &self,
        camera: Vec3,
        distance_threshold: f64,
        max_depth: Option<u32>,
    ) -> Vec<NodeId> {
        self.select_breadth_first(|node| {
            let close = self.any_marker_within(node, camera, distance_threshold);
            if close {
                return true;
            }
            let at_max_depth = max_depth.is_some_and(|d| node.level >= d);
            let reach = distance_threshold + node.bounds.size().length();
            !at_max_depth && self.any_marker_within(node, camera, reach)
        })
    }

    /// Markers within `radius` of `point`, nearest first (ties by marker id).
    pub fn markers_within_radius(&self, point: Vec3, radius: f64) -> Vec<Entry> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        let mut hits: Vec<(f64, Entry)> = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.bounds.distance_to_point(point) > radius {
                continue;
            }
            for entry in &node.entries {
                let d = entry.position.distance(point);
                if d <= radius {
                    hits.push((d, *entry));
                }
            }
            stack.extend(node.children.iter().copied());
        }
        hits.sort_by(|(da, a), (db, b)| {
            stable_total_cmp_f64(*da, *db).then_with(|| a.marker.cmp(&b.marker))
        });
        hits.into_iter().map(|(_, e)| e).collect()
    }

    fn select_breadth_first(&self, mut expand: impl FnMut(&OctreeNode) -> bool) -> Vec<NodeId> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        let mut selected = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let node = self.node(id);
            if node.is_leaf() || !expand(node) {
                selected.push(id);
            } else {
                queue.extend(node.children.iter().copied());
            }
        }
        selected
    }

    fn any_marker_within(&self, node: &OctreeNode, point: Vec3, distance: f64) -> bool {
        if node.bounds.distance_to_point(point) > distance {
            return false;
        }
        if node
            .representative
            .is_some_and(|rep| rep.position.distance(point) <= distance)
        {
            return true;
        }
        node.entries
            .iter()
            .any(|e| e.position.distance(point) <= distance)
            || node
                .children
                .iter()
                .any(|child| self.any_marker_within(self.node(*child), point, distance))
    }

    /// Children always have higher ids than their parent, so a reverse sweep
    /// sees every child before its parent.
    fn assign_representatives(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            let candidates: Vec<Entry> = if self.nodes[i].entries.is_empty() {
                self.nodes[i]
                    .children
                    .iter()
                    .filter_map(|c| self.nodes[c.index()].representative)
                    .collect()
            } else {
                self.nodes[i].entries.clone()
            };
            self.nodes[i].representative = medoid(&candidates);
        }
    }
}

/// The entry closest to the mean of `candidates`; first wins on ties.
fn medoid(candidates: &[Entry]) -> Option<Entry> {
    let mean = Vec3::mean(candidates.iter().map(|e| e.position))?;
    argmin_by_key(candidates, |e| e.position.distance_squared(mean)).map(|i| candidates[i])
}

fn insert(build: &mut Vec<BuildNode>, start: usize, entry: Entry, max_leaf_size: usize, max_depth: u32) {
    let mut idx = start;
    while let Some(children) = build[idx].children {
        idx = children[build[idx].bounds.octant_of(entry.position)];
    }
    build[idx].entries.push(entry);
    if build[idx].entries.len() > max_leaf_size && build[idx].level < max_depth {
        split(build, idx, max_leaf_size, max_depth);
    }
}

fn split(build: &mut Vec<BuildNode>, idx: usize, max_leaf_size: usize, max_depth: u32) {
    let bounds = build[idx].bounds;
    let level = build[idx].level + 1;
    let first = build.len();
    for octant in 0..8 {
        build.push(BuildNode {
            bounds: bounds.octant(octant),
            level,
            children: None,
            entries: Vec::new(),
        });
    }
    build[idx].children = Some(std::array::from_fn(|i| first + i));
    for entry in std::mem::take(&mut build[idx].entries) {
        insert(build, idx, entry, max_leaf_size, max_depth);
    }
}

/// Drop empty subtrees and renumber breadth-first. The root is always kept.
fn compact(build: Vec<BuildNode>) -> Arena<OctreeNode> {
    // Children are pushed after their parent, so a reverse sweep is post-order.
    let mut counts = vec![0usize; build.len()];
    for i in (0..build.len()).rev() {
        let below: usize = build[i]
            .children
            .map(|c| c.iter().map(|child| counts[*child]).sum::<usize>())
            .unwrap_or(0);
        counts[i] = build[i].entries.len() + below;
    }

    let mut nodes = Arena::with_capacity(build.len());
    let mut queue: VecDeque<(usize, Option<usize>)> = VecDeque::from([(0, None)]);
    while let Some((b, parent)) = queue.pop_front() {
        let src = &build[b];
        let id = nodes.alloc(OctreeNode {
            bounds: src.bounds,
            level: src.level,
            children: Vec::new(),
            entries: src.entries.clone(),
            representative: None,
            marker_count: counts[b],
        });
        if let Some(p) = parent {
            nodes[p].children.push(NodeId(id as u32));
        }
        if let Some(children) = src.children {
            queue.extend(
                children
                    .iter()
                    .filter(|c| counts[**c] > 0)
                    .map(|c| (*c, Some(id))),
            );
        }
    }
    nodes
}
