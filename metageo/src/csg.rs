//! Ray-parity classification of surface pieces against the CSG tree
//!
//! Each query casts an axis-aligned ray from a point on the surface, counts
//! crossings per group, and then walks the tree to decide whether the point
//! lies on the boundary of the evaluated solid.
//!
//! Each group keeps an [`Accumulator`] stamped with the epoch of the last
//! query that reset it, so stale counts from earlier queries read as
//! [`State::Out`] without any clearing pass.
use nalgebra::Vector3;

use crate::{
    Error,
    node::{MetaNode, NodeId, Tree},
    surface::{PatchId, Surface},
    types::{Aabb, Ray, RayHit, SERROR, ray_triangle},
};

/// Normal components smaller than this are never used as ray axes
const AXIS_EPSILON: f32 = 1e-3;

/// Containment of a point with respect to a solid
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    In,
    Out,
    /// On the surface, with the solid lying along the ray
    BoundaryIn,
    /// On the surface, with the solid lying behind the ray origin
    BoundaryOut,
}

impl State {
    /// Swaps the two boundary states, leaving the others unchanged
    fn flip(self) -> Self {
        match self {
            State::BoundaryIn => State::BoundaryOut,
            State::BoundaryOut => State::BoundaryIn,
            s => s,
        }
    }
}

/// Per-group crossing counter for the current query
#[derive(Copy, Clone, Debug, Default)]
pub struct Accumulator {
    epoch: u32,
    count: i32,
    /// A front face was crossed at the ray origin
    front: bool,
    /// A back face was crossed at the ray origin
    back: bool,
}

impl Accumulator {
    pub fn reset(&mut self, epoch: u32) {
        *self = Self {
            epoch,
            ..Self::default()
        };
    }

    /// Records one crossing at distance `t` past the query point
    ///
    /// Crossings at the query point itself are counted at most once per
    /// facing, since the point may sit on several coincident faces.
    pub fn add_intersection(&mut self, t: f32, back_facing: bool) {
        let near = t < SERROR;
        let (seen, delta) = if back_facing {
            (&mut self.back, -1)
        } else {
            (&mut self.front, 1)
        };
        if near && std::mem::replace(seen, true) {
            return;
        }
        self.count += delta;
    }

    pub fn state(&self, epoch: u32) -> State {
        if self.epoch != epoch {
            State::Out
        } else if self.count == 0 {
            if self.front {
                State::BoundaryOut
            } else {
                State::Out
            }
        } else if self.count == -1 && self.back && !self.front {
            State::BoundaryIn
        } else {
            State::In
        }
    }
}

/// Outcome of classifying one surface point
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Verdict {
    /// The point is not on the boundary of the evaluated solid
    pub hidden: bool,
    /// The point is on the boundary, but its solid lies on the outside
    pub flipped: bool,
}

const HIDDEN: Verdict = Verdict {
    hidden: true,
    flipped: false,
};

/// Per-query context shared by the casting and evaluation passes
pub struct Classifier<'a> {
    tree: &'a mut Tree,
    surface: &'a Surface,
    groups: &'a [NodeId],
    epoch: &'a mut u32,
}

impl<'a> Classifier<'a> {
    pub fn new(
        tree: &'a mut Tree,
        surface: &'a Surface,
        groups: &'a [NodeId],
        epoch: &'a mut u32,
    ) -> Self {
        Self {
            tree,
            surface,
            groups,
            epoch,
        }
    }

    /// Classifies a point of `group`'s surface
    ///
    /// `samples` are candidate points with their unit normals, tried in
    /// order; each one is cast along its normal's axes from largest to
    /// smallest component until a ray avoids every triangle edge.
    pub fn classify(
        &mut self,
        group: NodeId,
        samples: &[(Vector3<f32>, Vector3<f32>)],
    ) -> Result<Verdict, Error> {
        let Some((first, _)) = samples.first() else {
            log::warn!("no usable sample for a piece of {group:?}");
            return Ok(HIDDEN);
        };
        for (pos, normal) in samples {
            let mut axes = [0, 1, 2];
            axes.sort_by(|a, b| normal[*b].abs().total_cmp(&normal[*a].abs()));
            for axis in axes {
                if normal[axis].abs() < AXIS_EPSILON {
                    continue;
                }
                *self.epoch += 1;
                if self.cast(pos, normal, axis) {
                    return Ok(self.evaluate(group, pos));
                }
                log::trace!("ray from {pos:?} along axis {axis} is ambiguous");
            }
        }
        Err(Error::AmbiguousRay {
            pos: [first.x, first.y, first.z],
        })
    }

    /// Casts one ray and fills the accumulators of every group around
    /// `pos`, returning `false` if the ray touched a triangle edge
    fn cast(
        &mut self,
        pos: &Vector3<f32>,
        normal: &Vector3<f32>,
        axis: usize,
    ) -> bool {
        let epoch = *self.epoch;
        let mut region = Aabb::empty();
        let mut active = vec![];
        for &g in self.groups {
            let node = &mut self.tree.nodes[g];
            if !node.aabb.contains(pos) {
                continue;
            }
            region = region.union(&node.aabb);
            if let Some(group) = node.data.group_mut() {
                group.accum.reset(epoch);
            }
            active.push(g);
        }

        let mut origin = *pos;
        let mut dir = Vector3::zeros();
        let mut query = Aabb::new(*pos, *pos);
        if normal[axis] < 0.0 {
            dir[axis] = -1.0;
            origin[axis] += SERROR;
            query.min[axis] = region.min[axis] - SERROR;
            query.max[axis] += SERROR;
        } else {
            dir[axis] = 1.0;
            origin[axis] -= SERROR;
            query.max[axis] = region.max[axis] + SERROR;
            query.min[axis] -= SERROR;
        }
        let ray = Ray { origin, dir };

        let mut candidates = vec![];
        self.surface
            .grid
            .find_collisions(&query, |sp| candidates.push(sp));
        let mut hits = vec![];
        for sp in candidates {
            let p = self.surface.subpatches[sp].patch;
            let g = self.surface.patches[p].group;
            if !active.contains(&g) {
                continue;
            }
            for tri in self.surface.triangle_positions(sp) {
                match ray_triangle(&ray, &tri) {
                    RayHit::Miss => (),
                    RayHit::Hit { t, back_facing } => {
                        hits.push((g, t - SERROR, back_facing))
                    }
                    RayHit::Edge { t, back_facing } if t - SERROR < SERROR => {
                        hits.push((g, t - SERROR, back_facing))
                    }
                    RayHit::Edge { .. } | RayHit::Grazing => return false,
                }
            }
        }
        for (g, t, back_facing) in hits {
            if let Some(group) = self.tree.nodes[g].data.group_mut() {
                group.accum.add_intersection(t, back_facing);
            }
        }
        true
    }

    fn group_state(&self, g: NodeId) -> (State, usize) {
        match self.tree.nodes[g].data.group() {
            Some(group) => (group.accum.state(*self.epoch), group.priority),
            None => (State::Out, usize::MAX),
        }
    }

    /// Walks from `group` up to the root, checking that every sibling
    /// expression leaves the point on the boundary
    fn evaluate(&self, group: NodeId, pos: &Vector3<f32>) -> Verdict {
        let (mut state, priority) = self.group_state(group);
        if state != State::BoundaryIn {
            return HIDDEN;
        }
        // Coincident boundaries go to the group with the lowest priority
        let loses = |other: Option<usize>| other.is_some_and(|b| priority > b);

        let mut prev = group;
        let mut node = self.tree.nodes[group].parent;
        while let Some(n) = node {
            match &self.tree.nodes[n].data {
                MetaNode::Union(children) => {
                    for &c in children.iter().filter(|c| **c != prev) {
                        let (cur, b) = self.evaluate_down(c, pos);
                        if cur == State::Out {
                            continue;
                        }
                        if cur == State::In || cur != state || loses(b) {
                            return HIDDEN;
                        }
                    }
                }
                MetaNode::Intersection(children) => {
                    for &c in children.iter().filter(|c| **c != prev) {
                        let (cur, b) = self.evaluate_down(c, pos);
                        if cur == State::In {
                            continue;
                        }
                        if cur == State::Out || cur != state || loses(b) {
                            return HIDDEN;
                        }
                    }
                }
                MetaNode::Difference(children) => {
                    let first = children.first().copied();
                    if let Some(first) = first.filter(|f| *f != prev) {
                        // We are being subtracted, so our surface turns over
                        state = state.flip();
                        let (cur, b) = self.evaluate_down(first, pos);
                        if cur != State::In
                            && (cur == State::Out || cur != state || loses(b))
                        {
                            return HIDDEN;
                        }
                    }
                    for &c in children.iter().skip(1).filter(|c| **c != prev) {
                        let (cur, b) = self.evaluate_down(c, pos);
                        if cur == State::Out {
                            continue;
                        }
                        if cur == State::In || cur == state || loses(b) {
                            return HIDDEN;
                        }
                    }
                }
                MetaNode::Composite(..)
                | MetaNode::CompositeBlocks { .. }
                | MetaNode::Input { .. }
                | MetaNode::Blocks(..)
                | MetaNode::Transform { .. } => (),
            }
            prev = n;
            node = self.tree.nodes[n].parent;
        }
        Verdict {
            hidden: false,
            flipped: state != State::BoundaryIn,
        }
    }

    /// Containment of `pos` in the expression rooted at `n`, along with the
    /// priority of the group owning the boundary (if any)
    fn evaluate_down(
        &self,
        n: NodeId,
        pos: &Vector3<f32>,
    ) -> (State, Option<usize>) {
        const OUT: (State, Option<usize>) = (State::Out, None);
        let node = &self.tree.nodes[n];
        if !node.aabb.contains(pos) {
            return OUT;
        }
        let lowest =
            |a: Option<usize>, b: Option<usize>| a.into_iter().chain(b).min();
        match &node.data {
            MetaNode::Composite(c) => {
                c.main.map_or(OUT, |m| self.evaluate_down(m, pos))
            }
            MetaNode::Input { child } | MetaNode::Transform { child, .. } => {
                child.map_or(OUT, |c| self.evaluate_down(c, pos))
            }
            MetaNode::Blocks(..) | MetaNode::CompositeBlocks { .. } => {
                let (state, priority) = self.group_state(n);
                (state, Some(priority))
            }
            MetaNode::Union(children) => {
                let (mut state, mut bnode) = OUT;
                for &c in children {
                    let (cur, b) = self.evaluate_down(c, pos);
                    match cur {
                        State::In => return (State::In, None),
                        State::Out => (),
                        _ if state == State::Out => (state, bnode) = (cur, b),
                        _ if state != cur => return (State::In, None),
                        _ => bnode = lowest(bnode, b),
                    }
                }
                (state, bnode)
            }
            MetaNode::Intersection(children) => {
                if children.is_empty() {
                    return OUT;
                }
                let (mut state, mut bnode) = (State::In, None);
                for &c in children {
                    let (cur, b) = self.evaluate_down(c, pos);
                    match cur {
                        State::Out => return OUT,
                        State::In => (),
                        _ if state == State::In => (state, bnode) = (cur, b),
                        _ if state != cur => return OUT,
                        _ => bnode = lowest(bnode, b),
                    }
                }
                (state, bnode)
            }
            MetaNode::Difference(children) => {
                let Some((&first, rest)) = children.split_first() else {
                    return OUT;
                };
                let (mut state, mut bnode) = self.evaluate_down(first, pos);
                if state == State::Out {
                    return OUT;
                }
                for &c in rest {
                    let (cur, b) = self.evaluate_down(c, pos);
                    match cur {
                        State::In => return OUT,
                        State::Out => (),
                        _ => {
                            let cur = cur.flip();
                            if state == State::In {
                                (state, bnode) = (cur, b);
                            } else if state != cur {
                                return OUT;
                            } else {
                                bnode = lowest(bnode, b);
                            }
                        }
                    }
                }
                debug_assert!(state != State::In || bnode.is_none());
                (state, bnode)
            }
        }
    }
}

/// Classifies every patch, subpatch and trim loop of the surface
///
/// Untrimmed patches are classified once as a whole.  In a trimmed patch,
/// untrimmed subpatches are classified one by one and trimmed ones loop by
/// loop; the patch is flipped if any of its visible pieces is.  Returns the
/// number of hidden pieces.
pub fn update_csg(
    tree: &mut Tree,
    surface: &mut Surface,
    groups: &[NodeId],
    epoch: &mut u32,
) -> Result<usize, Error> {
    let mut hidden = 0;
    let patches: Vec<PatchId> = surface.patches.keys().collect();
    for p in patches {
        let group = surface.patches[p].group;
        let subpatches = surface.patches[p].subpatches.clone();
        if !surface.patches[p].trimmed {
            let samples = subpatches
                .iter()
                .map(|sp| surface.samples(*sp))
                .find(|s| !s.is_empty())
                .unwrap_or_default();
            let v = Classifier::new(tree, surface, groups, epoch)
                .classify(group, &samples)?;
            let patch = &mut surface.patches[p];
            patch.hidden = v.hidden;
            patch.flipped = v.flipped;
            hidden += usize::from(v.hidden);
            continue;
        }

        let mut flipped = false;
        for sp in subpatches {
            let verdicts = {
                let mut c = Classifier::new(tree, surface, groups, epoch);
                match &surface.subpatches[sp].trimming {
                    None => vec![c.classify(group, &surface.samples(sp))?],
                    Some(trim) => trim
                        .loops
                        .iter()
                        .map(|l| c.classify(group, &l.samples()))
                        .collect::<Result<Vec<_>, _>>()?,
                }
            };
            flipped |= verdicts.iter().any(|v| v.flipped);
            hidden += verdicts.iter().filter(|v| v.hidden).count();
            let sub = &mut surface.subpatches[sp];
            match &mut sub.trimming {
                None => {
                    sub.hidden = verdicts[0].hidden;
                    sub.flipped = verdicts[0].flipped;
                }
                Some(trim) => {
                    for (l, v) in trim.loops.iter_mut().zip(&verdicts) {
                        l.hidden = v.hidden;
                        l.flipped = v.flipped;
                    }
                }
            }
        }
        let patch = &mut surface.patches[p];
        patch.hidden = false;
        patch.flipped = flipped;
    }
    Ok(hidden)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accumulator_states() {
        let mut a = Accumulator::default();
        assert_eq!(a.state(1), State::Out);

        // Leaving a solid right at the query point
        a.reset(1);
        a.add_intersection(0.0, true);
        a.add_intersection(0.0, true);
        assert_eq!(a.state(1), State::BoundaryIn);
        assert_eq!(a.state(2), State::Out);

        // Entering at the query point, then leaving further on
        a.reset(2);
        a.add_intersection(0.0, false);
        a.add_intersection(0.5, true);
        assert_eq!(a.state(2), State::BoundaryOut);

        // Strictly inside
        a.reset(3);
        a.add_intersection(0.3, true);
        assert_eq!(a.state(3), State::In);

        // Entering and leaving further on
        a.reset(4);
        a.add_intersection(0.3, false);
        a.add_intersection(0.6, true);
        assert_eq!(a.state(4), State::Out);

        // Leaving at the query point while inside another shell
        a.reset(5);
        a.add_intersection(0.0, true);
        a.add_intersection(0.4, true);
        assert_eq!(a.state(5), State::In);
    }

    #[test]
    fn flip_only_touches_boundaries() {
        assert_eq!(State::BoundaryIn.flip(), State::BoundaryOut);
        assert_eq!(State::BoundaryOut.flip(), State::BoundaryIn);
        assert_eq!(State::In.flip(), State::In);
        assert_eq!(State::Out.flip(), State::Out);
    }
}
