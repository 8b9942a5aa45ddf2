//! The CSG tree: typed nodes, groups of blocks, and the builder façade
//!
//! A tree is made of [`Node`]s stored in an arena.  Each node carries its
//! [`MetaNode`] payload, a bounding box recomputed on every update, and two
//! parent links:
//!
//! - the **owner** is the node it was added to with [`MetaBuilder::add`], and
//!   never changes; ownership forms a strict tree, which is what rules out
//!   cycles.
//! - the **parent** is the node that consumes its value during CSG
//!   evaluation.  This is usually the owner, but composites re-route their
//!   children through [`MetaNode::Input`] slots and synthesized unions.
use std::collections::BTreeSet;

use nalgebra::{Matrix4, Point3, Vector3};

use crate::{
    Error,
    block::MetaBlock,
    csg::Accumulator,
    geometry::{MetaGeometry, Settings},
    indexed::{IndexVec, define_index},
    render::RenderableGeometry,
    types::Aabb,
};

define_index!(NodeId, "Handle to a node in a [`Tree`]");
define_index!(BlockId, "Handle to a [`MetaBlock`] in a [`Tree`]");

/// Discriminant of a [`MetaNode`], used in error messages
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
pub enum NodeKind {
    Composite,
    CompositeBlocks,
    Input,
    Blocks,
    Transform,
    Union,
    Intersection,
    Difference,
}

/// A set of blocks that forms one closed solid for CSG purposes
#[derive(Clone, Debug)]
pub struct Group {
    /// Blocks created directly in this group
    pub blocks: Vec<BlockId>,
    /// Local transform
    pub transform: Matrix4<f32>,

    /// Every block reporting to this group, recomputed on update
    pub(crate) members: Vec<BlockId>,
    /// World transform, recomputed on update
    pub(crate) world: Matrix4<f32>,
    /// User-declared pairs of attracted sub-groups
    attraction: BTreeSet<(u32, u32)>,
    /// Attraction pairs including those inherited from children
    effective: BTreeSet<(u32, u32)>,
    /// Creation order, used to break ties between coincident surfaces
    pub(crate) priority: usize,
    pub(crate) accum: Accumulator,
}

impl Group {
    fn new(priority: usize) -> Self {
        Self {
            blocks: vec![],
            transform: Matrix4::identity(),
            members: vec![],
            world: Matrix4::identity(),
            attraction: BTreeSet::new(),
            effective: BTreeSet::new(),
            priority,
            accum: Accumulator::default(),
        }
    }

    fn key(a: u32, b: u32) -> (u32, u32) {
        (a.min(b), a.max(b))
    }

    /// Declares that blocks in sub-groups `a` and `b` fuse together
    ///
    /// Attraction is never implied: blocks of sub-group `g` only fuse with
    /// each other once `(g, g)` has been declared.
    pub fn attract(&mut self, a: u32, b: u32) {
        self.attraction.insert(Self::key(a, b));
    }

    pub fn are_attracted(&self, a: u32, b: u32) -> bool {
        self.effective.contains(&Self::key(a, b))
    }

    /// Blocks reporting to this group during the last update
    pub fn members(&self) -> &[BlockId] {
        &self.members
    }
}

/// A composite layers its children, plugging lower layers into the `Input`
/// of each composite child
#[derive(Clone, Debug)]
pub struct Composite {
    pub children: Vec<NodeId>,
    pub input: Option<NodeId>,
    pub transform: Matrix4<f32>,
    /// Root of the connected child expression, recomputed on update
    pub(crate) main: Option<NodeId>,
    /// Unions synthesized by previous updates, reused in order
    unions: Vec<NodeId>,
}

/// Payload of a tree node
#[derive(Clone, Debug)]
pub enum MetaNode {
    Composite(Composite),
    CompositeBlocks { group: Group, children: Vec<NodeId> },
    Input { child: Option<NodeId> },
    Blocks(Group),
    Transform {
        transform: Matrix4<f32>,
        child: Option<NodeId>,
    },
    Union(Vec<NodeId>),
    Intersection(Vec<NodeId>),
    Difference(Vec<NodeId>),
}

impl MetaNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            MetaNode::Composite(..) => NodeKind::Composite,
            MetaNode::CompositeBlocks { .. } => NodeKind::CompositeBlocks,
            MetaNode::Input { .. } => NodeKind::Input,
            MetaNode::Blocks(..) => NodeKind::Blocks,
            MetaNode::Transform { .. } => NodeKind::Transform,
            MetaNode::Union(..) => NodeKind::Union,
            MetaNode::Intersection(..) => NodeKind::Intersection,
            MetaNode::Difference(..) => NodeKind::Difference,
        }
    }

    /// Returns the group if this node is one of the block-holding kinds
    pub fn group(&self) -> Option<&Group> {
        match self {
            MetaNode::Blocks(g) | MetaNode::CompositeBlocks { group: g, .. } => {
                Some(g)
            }
            MetaNode::Composite(..)
            | MetaNode::Input { .. }
            | MetaNode::Transform { .. }
            | MetaNode::Union(..)
            | MetaNode::Intersection(..)
            | MetaNode::Difference(..) => None,
        }
    }

    pub(crate) fn group_mut(&mut self) -> Option<&mut Group> {
        match self {
            MetaNode::Blocks(g) | MetaNode::CompositeBlocks { group: g, .. } => {
                Some(g)
            }
            MetaNode::Composite(..)
            | MetaNode::Input { .. }
            | MetaNode::Transform { .. }
            | MetaNode::Union(..)
            | MetaNode::Intersection(..)
            | MetaNode::Difference(..) => None,
        }
    }

    /// Children consumed during CSG evaluation
    pub(crate) fn operands(&self) -> Vec<NodeId> {
        match self {
            MetaNode::Composite(c) => c.main.into_iter().collect(),
            MetaNode::Input { child } | MetaNode::Transform { child, .. } => {
                child.iter().copied().collect()
            }
            MetaNode::Union(c)
            | MetaNode::Intersection(c)
            | MetaNode::Difference(c) => c.clone(),
            MetaNode::Blocks(..) | MetaNode::CompositeBlocks { .. } => vec![],
        }
    }

    /// Children added through [`MetaBuilder::add`]
    fn owned(&self) -> Vec<NodeId> {
        match self {
            MetaNode::Composite(c) => c.children.clone(),
            MetaNode::CompositeBlocks { children, .. } => children.clone(),
            MetaNode::Transform { child, .. } => child.iter().copied().collect(),
            MetaNode::Union(c)
            | MetaNode::Intersection(c)
            | MetaNode::Difference(c) => c.clone(),
            MetaNode::Input { .. } | MetaNode::Blocks(..) => vec![],
        }
    }
}

/// A node in the tree
#[derive(Clone, Debug)]
pub struct Node {
    pub data: MetaNode,
    pub layer: i32,
    pub(crate) owner: Option<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) aabb: Aabb,
}

impl Node {
    fn new(data: MetaNode) -> Self {
        Self {
            data,
            layer: 0,
            owner: None,
            parent: None,
            aabb: Aabb::empty(),
        }
    }

    /// Bounding box from the last update
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    /// Parent used during CSG evaluation
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Arena of nodes and blocks
#[derive(Clone, Debug, Default)]
pub struct Tree {
    pub(crate) nodes: IndexVec<Node, NodeId>,
    pub(crate) blocks: IndexVec<MetaBlock, BlockId>,
    root: Option<NodeId>,
    next_priority: usize,
}

impl Tree {
    pub fn node(&self, n: NodeId) -> Result<&Node, Error> {
        self.nodes.get(n).ok_or(Error::BadNode)
    }

    fn node_mut(&mut self, n: NodeId) -> Result<&mut Node, Error> {
        if self.nodes.get(n).is_none() {
            return Err(Error::BadNode);
        }
        Ok(&mut self.nodes[n])
    }

    pub fn block(&self, b: BlockId) -> &MetaBlock {
        &self.blocks[b]
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn push(&mut self, data: MetaNode) -> NodeId {
        self.nodes.push(Node::new(data))
    }

    fn new_group(&mut self) -> Group {
        let g = Group::new(self.next_priority);
        self.next_priority += 1;
        g
    }

    /// Group node that a block reports to (valid after an update)
    pub fn group_of(&self, b: BlockId) -> Option<&Group> {
        self.nodes.get(self.blocks.get(b)?.group)?.data.group()
    }

    /// Checks that every node reachable from the root is owned exactly once
    pub(crate) fn validate(&self) -> Result<NodeId, Error> {
        let root = self.root.ok_or(Error::NoRoot)?;
        self.node(root)?;
        let mut seen = vec![false; self.nodes.len()];
        let mut todo = vec![root];
        while let Some(n) = todo.pop() {
            if std::mem::replace(&mut seen[n.0], true) {
                return Err(Error::Cycle);
            }
            todo.extend(self.nodes[n].data.owned());
        }
        Ok(root)
    }

    /// Wires every composite's children into a single expression
    ///
    /// Children are stable-sorted by layer.  Walking upward through the
    /// layers, a composite child with an input slot receives everything below
    /// it through that slot; any other child is unioned with the layers below.
    pub(crate) fn connect_composites(&mut self) {
        let composites: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n.data, MetaNode::Composite(..)))
            .map(|(i, _)| i)
            .collect();
        for c in composites {
            self.connect_composite(c);
        }
    }

    fn connect_composite(&mut self, c: NodeId) {
        let MetaNode::Composite(comp) = &self.nodes[c].data else {
            return;
        };
        let mut children = comp.children.clone();
        let spare = comp.unions.clone();
        children.sort_by_key(|n| self.nodes[*n].layer);

        let mut used = 0;
        let mut synthesized = vec![];
        let mut last: Option<NodeId> = None;
        let mut union: Option<NodeId> = None;
        for child in children {
            let Some(prev) = last else {
                last = Some(child);
                continue;
            };
            let input = match &self.nodes[child].data {
                MetaNode::Composite(inner) => inner.input,
                _ => None,
            };
            if let Some(input) = input {
                self.nodes[input].data = MetaNode::Input { child: Some(prev) };
                self.nodes[prev].parent = Some(input);
                last = Some(child);
                union = None;
            } else {
                let u = match union {
                    Some(u) => u,
                    None => {
                        let u = if used < spare.len() {
                            spare[used]
                        } else {
                            let u = self.push(MetaNode::Union(vec![]));
                            self.nodes[u].owner = Some(c);
                            u
                        };
                        used += 1;
                        synthesized.push(u);
                        self.nodes[u].data = MetaNode::Union(vec![prev]);
                        self.nodes[prev].parent = Some(u);
                        union = Some(u);
                        last = Some(u);
                        u
                    }
                };
                if let MetaNode::Union(members) = &mut self.nodes[u].data {
                    members.push(child);
                }
                self.nodes[child].parent = Some(u);
            }
        }
        if let Some(main) = last {
            self.nodes[main].parent = Some(c);
        }
        // Spare unions from a previous layout are emptied, so they evaluate
        // as `Out` if anything still refers to them
        for &u in &spare[used.min(spare.len())..] {
            self.nodes[u].data = MetaNode::Union(vec![]);
            synthesized.push(u);
        }
        if let MetaNode::Composite(comp) = &mut self.nodes[c].data {
            comp.main = last;
            comp.unions = synthesized;
        }
    }

    /// Propagates transforms down the ownership tree, updating world-space
    /// block corners
    pub(crate) fn update_transforms(&mut self, n: NodeId, mat: Matrix4<f32>) {
        let next = match &mut self.nodes[n].data {
            MetaNode::Blocks(g) => {
                g.world = mat * g.transform;
                let (world, blocks) = (g.world, g.blocks.clone());
                for b in blocks {
                    let block = &mut self.blocks[b];
                    for i in 0..8 {
                        block.corners[i] = world
                            .transform_point(&Point3::from(block.local[i]))
                            .coords;
                    }
                }
                return;
            }
            MetaNode::CompositeBlocks { group, children } => {
                group.world = mat * group.transform;
                let world = group.world;
                let blocks = group.blocks.clone();
                let children = children.clone();
                for b in blocks {
                    let block = &mut self.blocks[b];
                    for i in 0..8 {
                        block.corners[i] = world
                            .transform_point(&Point3::from(block.local[i]))
                            .coords;
                    }
                }
                (children, world)
            }
            MetaNode::Composite(c) => (c.children.clone(), mat * c.transform),
            MetaNode::Transform { transform, child } => {
                (child.iter().copied().collect(), mat * *transform)
            }
            MetaNode::Union(c)
            | MetaNode::Intersection(c)
            | MetaNode::Difference(c) => (c.clone(), mat),
            MetaNode::Input { .. } => return,
        };
        let (children, mat) = next;
        for c in children {
            self.update_transforms(c, mat);
        }
    }

    /// Collects every group reachable from `root` during evaluation, and
    /// gathers the blocks and attractions of composite groups
    pub(crate) fn collect_groups(&mut self, root: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut seen = vec![false; self.nodes.len()];
        let mut todo = vec![root];
        while let Some(n) = todo.pop() {
            if std::mem::replace(&mut seen[n.0], true) {
                continue;
            }
            let node = &self.nodes[n].data;
            match node {
                MetaNode::Blocks(..) | MetaNode::CompositeBlocks { .. } => {
                    out.push(n)
                }
                _ => todo.extend(node.operands()),
            }
        }
        out.sort();

        for &g in &out {
            let node = &self.nodes[g].data;
            let mut sources: Vec<&Group> = node.group().into_iter().collect();
            if let MetaNode::CompositeBlocks { children, .. } = node {
                sources.extend(
                    children.iter().filter_map(|c| self.nodes[*c].data.group()),
                );
            }
            let mut members = vec![];
            let mut effective = BTreeSet::new();
            for s in sources {
                members.extend(s.blocks.iter().copied());
                effective.extend(s.attraction.iter().copied());
            }
            for &b in &members {
                self.blocks[b].group = g;
            }
            if let Some(group) = self.nodes[g].data.group_mut() {
                group.members = members;
                group.effective = effective;
            }
        }
        out
    }

    /// Recomputes bounding boxes bottom-up from `n`
    pub(crate) fn update_bounding_boxes(&mut self, n: NodeId) -> Aabb {
        let aabb = match &self.nodes[n].data {
            MetaNode::Blocks(g) | MetaNode::CompositeBlocks { group: g, .. } => {
                g.members.iter().fold(Aabb::empty(), |acc, b| {
                    let bb = self.blocks[*b].aabb();
                    acc.union(&bb.grow(bb.extent()))
                })
            }
            data => {
                let children = data.operands();
                children.into_iter().fold(Aabb::empty(), |acc, c| {
                    acc.union(&self.update_bounding_boxes(c))
                })
            }
        };
        self.nodes[n].aabb = aabb;
        aabb
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Factory and assembly façade for a CSG tree of blocks
///
/// ```
/// use metageo::MetaBuilder;
/// let mut builder = MetaBuilder::default();
/// let blocks = builder.create_blocks();
/// let cube = builder.create_block(blocks)?;
/// builder.set_block_info(cube, 1, 0, 0xfff, 0)?;
/// builder.set_root(blocks)?;
/// let out = builder.execute()?;
/// assert_eq!(out.patches.len(), 1);
/// # Ok::<(), metageo::Error>(())
/// ```
#[derive(Default)]
pub struct MetaBuilder {
    pub(crate) tree: Tree,
    pub(crate) geometry: MetaGeometry,
}

impl MetaBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            tree: Tree::default(),
            geometry: MetaGeometry::new(settings),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Geometry produced by the last call to [`execute`](Self::execute)
    pub fn geometry(&self) -> &MetaGeometry {
        &self.geometry
    }

    /// Creates a unit cube block inside a `Blocks` node
    pub fn create_block(&mut self, blocks: NodeId) -> Result<BlockId, Error> {
        let node = self.tree.node(blocks)?;
        if !matches!(node.data, MetaNode::Blocks(..)) {
            return Err(Error::NotAGroup(node.data.kind()));
        }
        let b = self.tree.blocks.push(MetaBlock::new(blocks));
        if let MetaNode::Blocks(g) = &mut self.tree.nodes[blocks].data {
            g.blocks.push(b);
        }
        Ok(b)
    }

    pub fn create_blocks(&mut self) -> NodeId {
        let g = self.tree.new_group();
        self.tree.push(MetaNode::Blocks(g))
    }

    pub fn create_composite_blocks(&mut self) -> NodeId {
        let group = self.tree.new_group();
        self.tree.push(MetaNode::CompositeBlocks {
            group,
            children: vec![],
        })
    }

    pub fn create_union(&mut self) -> NodeId {
        self.tree.push(MetaNode::Union(vec![]))
    }

    pub fn create_intersection(&mut self) -> NodeId {
        self.tree.push(MetaNode::Intersection(vec![]))
    }

    pub fn create_difference(&mut self) -> NodeId {
        self.tree.push(MetaNode::Difference(vec![]))
    }

    pub fn create_transform(&mut self) -> NodeId {
        self.tree.push(MetaNode::Transform {
            transform: Matrix4::identity(),
            child: None,
        })
    }

    pub fn create_composite(&mut self) -> NodeId {
        self.tree.push(MetaNode::Composite(Composite {
            children: vec![],
            input: None,
            transform: Matrix4::identity(),
            main: None,
            unions: vec![],
        }))
    }

    /// Creates the input slot of a composite
    ///
    /// The returned node must still be added somewhere inside the
    /// composite's children; it evaluates to the layers below the composite.
    pub fn create_input(&mut self, composite: NodeId) -> Result<NodeId, Error> {
        let kind = self.tree.node(composite)?.data.kind();
        if kind != NodeKind::Composite {
            return Err(Error::NotAContainer(kind));
        }
        let input = self.tree.push(MetaNode::Input { child: None });
        if let MetaNode::Composite(c) = &mut self.tree.nodes[composite].data {
            c.input = Some(input);
        }
        Ok(input)
    }

    /// Adds `child` under `parent`
    pub fn add(&mut self, parent: NodeId, child: NodeId) -> Result<(), Error> {
        self.tree.node(parent)?;
        if self.tree.node(child)?.owner.is_some() {
            return Err(Error::AlreadyParented);
        }
        let mut cursor = Some(parent);
        while let Some(c) = cursor {
            if c == child {
                return Err(Error::Cycle);
            }
            cursor = self.tree.nodes[c].owner;
        }
        let child_kind = self.tree.nodes[child].data.kind();
        match &mut self.tree.nodes[parent].data {
            MetaNode::Composite(c) => c.children.push(child),
            MetaNode::CompositeBlocks { children, .. }
                if child_kind == NodeKind::Blocks =>
            {
                children.push(child)
            }
            MetaNode::Transform { child: slot, .. } if slot.is_none() => {
                *slot = Some(child)
            }
            MetaNode::Union(c)
            | MetaNode::Intersection(c)
            | MetaNode::Difference(c) => c.push(child),
            data @ (MetaNode::CompositeBlocks { .. }
            | MetaNode::Transform { .. }
            | MetaNode::Input { .. }
            | MetaNode::Blocks(..)) => {
                return Err(Error::NotAContainer(data.kind()));
            }
        }
        let node = &mut self.tree.nodes[child];
        node.owner = Some(parent);
        node.parent = Some(parent);
        Ok(())
    }

    pub fn set_transform(
        &mut self,
        n: NodeId,
        mat: Matrix4<f32>,
    ) -> Result<(), Error> {
        match &mut self.tree.node_mut(n)?.data {
            MetaNode::Blocks(g) | MetaNode::CompositeBlocks { group: g, .. } => {
                g.transform = mat
            }
            MetaNode::Composite(c) => c.transform = mat,
            MetaNode::Transform { transform, .. } => *transform = mat,
            data @ (MetaNode::Input { .. }
            | MetaNode::Union(..)
            | MetaNode::Intersection(..)
            | MetaNode::Difference(..)) => {
                return Err(Error::NoTransform(data.kind()));
            }
        }
        Ok(())
    }

    /// Sets the layer used to order a node among its composite's children
    pub fn set_layer(&mut self, n: NodeId, layer: i32) -> Result<(), Error> {
        self.tree.node_mut(n)?.layer = layer;
        Ok(())
    }

    /// Sets the 8 local corner positions of a block
    ///
    /// Corner `i` plays the role of `(i & 1, (i >> 1) & 1, (i >> 2) & 1)` in
    /// the unit cube.
    pub fn set_block(
        &mut self,
        b: BlockId,
        corners: [Vector3<f32>; 8],
    ) -> Result<(), Error> {
        let block = self.block_mut(b)?;
        block.local = corners;
        Ok(())
    }

    /// Sets the user id, sub-group, crease mask and subdivision code
    ///
    /// `creases` holds one bit per cube edge; `subdivision` holds 4 bits per
    /// side, encoding `(code & 3) + 1` cells along x and `(code >> 2) + 1`
    /// along y.
    pub fn set_block_info(
        &mut self,
        b: BlockId,
        id: u32,
        sub_group: u32,
        creases: u16,
        subdivision: u32,
    ) -> Result<(), Error> {
        let block = self.block_mut(b)?;
        block.id = id & crate::block::ID_MASK;
        block.sub_group = sub_group;
        block.creases = creases & 0xfff;
        block.subdivision = subdivision & 0xff_ffff;
        Ok(())
    }

    fn block_mut(&mut self, b: BlockId) -> Result<&mut MetaBlock, Error> {
        if self.tree.blocks.get(b).is_none() {
            return Err(Error::BadNode);
        }
        Ok(&mut self.tree.blocks[b])
    }

    /// Declares that sub-groups `a` and `b` of a group fuse together
    pub fn set_attraction(
        &mut self,
        n: NodeId,
        a: u32,
        b: u32,
    ) -> Result<(), Error> {
        let data = &mut self.tree.node_mut(n)?.data;
        let kind = data.kind();
        data.group_mut().ok_or(Error::NotAGroup(kind))?.attract(a, b);
        Ok(())
    }

    /// Sets the geometric and detail error thresholds for subdivision
    pub fn set_error(&mut self, geometric: f32, detail: f32) {
        let settings = self.geometry.settings_mut();
        settings.geometric_error = geometric;
        settings.detail_error = detail;
    }

    pub fn set_root(&mut self, n: NodeId) -> Result<(), Error> {
        self.tree.node(n)?;
        self.tree.root = Some(n);
        Ok(())
    }

    /// Runs the whole pipeline, returning renderable geometry
    pub fn execute(&mut self) -> Result<RenderableGeometry, Error> {
        self.geometry.update(&mut self.tree)?;
        Ok(self.geometry.compute_renderable_geometry())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_rejects_bad_structure() {
        let mut b = MetaBuilder::default();
        let u = b.create_union();
        let d = b.create_difference();
        let blocks = b.create_blocks();
        b.add(u, d).unwrap();
        assert!(matches!(b.add(d, u), Err(Error::Cycle)));
        assert!(matches!(b.add(u, u), Err(Error::Cycle)));
        b.add(d, blocks).unwrap();
        assert!(matches!(b.add(u, blocks), Err(Error::AlreadyParented)));

        let other = b.create_blocks();
        assert!(matches!(
            b.add(blocks, other),
            Err(Error::NotAContainer(NodeKind::Blocks))
        ));
        assert!(matches!(
            b.create_block(u),
            Err(Error::NotAGroup(NodeKind::Union))
        ));

        let t = b.create_transform();
        b.add(t, other).unwrap();
        let third = b.create_blocks();
        assert!(matches!(
            b.add(t, third),
            Err(Error::NotAContainer(NodeKind::Transform))
        ));
        assert!(matches!(
            b.set_transform(u, Matrix4::identity()),
            Err(Error::NoTransform(NodeKind::Union))
        ));
    }

    #[test]
    fn execute_requires_root() {
        let mut b = MetaBuilder::default();
        assert!(matches!(b.execute(), Err(Error::NoRoot)));
    }

    #[test]
    fn composite_layers() {
        let mut b = MetaBuilder::default();
        let outer = b.create_composite();
        let base = b.create_blocks();
        let extra = b.create_blocks();
        let inner = b.create_composite();
        let input = b.create_input(inner).unwrap();
        let diff = b.create_difference();
        let tool = b.create_blocks();
        b.add(diff, input).unwrap();
        b.add(diff, tool).unwrap();
        b.add(inner, diff).unwrap();

        b.add(outer, inner).unwrap();
        b.add(outer, extra).unwrap();
        b.add(outer, base).unwrap();
        b.set_layer(inner, 2).unwrap();
        b.set_layer(extra, 1).unwrap();

        let tree = &mut b.tree;
        tree.connect_composites();

        // Layers sort as [base, extra, inner]; base and extra are unioned,
        // then fed into the inner composite's input
        let MetaNode::Composite(c) = &tree.nodes[outer].data else {
            panic!()
        };
        assert_eq!(c.main, Some(inner));
        let MetaNode::Input { child: Some(u) } = tree.nodes[input].data else {
            panic!()
        };
        let MetaNode::Union(members) = &tree.nodes[u].data else {
            panic!()
        };
        assert_eq!(members, &vec![base, extra]);
        assert_eq!(tree.nodes[base].parent, Some(u));
        assert_eq!(tree.nodes[u].parent, Some(input));
        assert_eq!(tree.nodes[inner].parent, Some(outer));

        // Reconnecting reuses the synthesized union
        let count = tree.nodes.len();
        tree.connect_composites();
        assert_eq!(tree.nodes.len(), count);

        let groups = tree.collect_groups(outer);
        assert_eq!(groups, vec![base, extra, tool]);
    }

    #[test]
    fn composite_blocks_gather_children() {
        let mut b = MetaBuilder::default();
        let comp = b.create_composite_blocks();
        let child = b.create_blocks();
        let block = b.create_block(child).unwrap();
        b.set_attraction(child, 1, 2).unwrap();
        b.add(comp, child).unwrap();
        b.set_root(comp).unwrap();

        let tree = &mut b.tree;
        let groups = tree.collect_groups(comp);
        assert_eq!(groups, vec![comp]);
        assert_eq!(tree.blocks[block].group, comp);
        let g = tree.nodes[comp].data.group().unwrap();
        assert_eq!(g.members(), &[block]);
        assert!(g.are_attracted(2, 1));
        assert!(!g.are_attracted(1, 1));
    }
}
