//! Cutting subpatches where they cross another solid's surface
//!
//! Two subpatches from solids that do not fuse are tested triangle against
//! triangle.  Each triangle that crosses or touches something along a line
//! is then split by the plane of every such triangle, giving convex pieces
//! that lie entirely on one side of each cutter.  Those pieces are the trim loops,
//! and each one is classified on its own.
use std::collections::BTreeMap;

use nalgebra::{Vector2, Vector3};

use super::{SubpatchId, Surface, triangulate::sample_triangles};
use crate::{
    node::Tree,
    types::{Aabb, SERROR, tri_tri_contact, triangle_normal},
};

/// Upper bound on the number of loops cut from one subpatch
const MAX_PIECES: usize = 256;

/// Points closer than this to a cutting plane count as lying on it
const PLANE_EPSILON: f32 = 1e-6;

#[derive(Copy, Clone, Debug)]
pub struct TrimPoint {
    pub pos: Vector3<f32>,
    pub normal: Vector3<f32>,
    /// Parameter within the patch, in `[0, 1]`
    pub uv: Vector2<f32>,
}

impl TrimPoint {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            pos: self.pos.lerp(&other.pos, t),
            normal: self.normal.lerp(&other.normal, t),
            uv: self.uv.lerp(&other.uv, t),
        }
    }
}

/// A convex piece of a trimmed subpatch
#[derive(Clone, Debug)]
pub struct Loop {
    /// Boundary, with the same winding as the subpatch
    pub points: Vec<TrimPoint>,
    pub hidden: bool,
    pub flipped: bool,
}

impl Loop {
    fn new(points: Vec<TrimPoint>) -> Self {
        Self {
            points,
            hidden: false,
            flipped: false,
        }
    }

    /// Fan triangles of the loop
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        (1..self.points.len().saturating_sub(1))
            .map(|i| [0, i, i + 1])
            .collect()
    }

    /// Candidate classification points with their unit normals
    pub(crate) fn samples(&self) -> Vec<(Vector3<f32>, Vector3<f32>)> {
        let tris: Vec<[Vector3<f32>; 3]> = self
            .triangles()
            .into_iter()
            .map(|t| t.map(|i| self.points[i].pos))
            .collect();
        sample_triangles(&tris)
    }

    fn aabb(&self) -> Aabb {
        Aabb::from_points(self.points.iter().map(|p| &p.pos))
    }

    /// Splits the loop by a plane, returning the pieces on either side or
    /// `None` if it does not straddle the plane
    fn split(
        &self,
        normal: &Vector3<f32>,
        origin: &Vector3<f32>,
    ) -> Option<[Loop; 2]> {
        let d: Vec<f32> = self
            .points
            .iter()
            .map(|p| normal.dot(&(p.pos - origin)))
            .collect();
        if d.iter().all(|x| *x > -PLANE_EPSILON)
            || d.iter().all(|x| *x < PLANE_EPSILON)
        {
            return None;
        }
        let mut above = vec![];
        let mut below = vec![];
        let n = self.points.len();
        for i in 0..n {
            let j = (i + 1) % n;
            let (p, dp, dq) = (&self.points[i], d[i], d[j]);
            if dp >= -PLANE_EPSILON {
                above.push(*p);
            }
            if dp <= PLANE_EPSILON {
                below.push(*p);
            }
            if (dp > PLANE_EPSILON && dq < -PLANE_EPSILON)
                || (dp < -PLANE_EPSILON && dq > PLANE_EPSILON)
            {
                let x = p.lerp(&self.points[j], dp / (dp - dq));
                above.push(x);
                below.push(x);
            }
        }
        (above.len() >= 3 && below.len() >= 3)
            .then(|| [Loop::new(above), Loop::new(below)])
    }
}

/// Trim loops of one subpatch
#[derive(Clone, Debug, Default)]
pub struct Trimming {
    pub loops: Vec<Loop>,
}

impl Surface {
    /// Whether two subpatches belong to solids that should cut each other
    fn can_trim(&self, tree: &Tree, a: SubpatchId, b: SubpatchId) -> bool {
        let pa = &self.patches[self.subpatches[a].patch];
        let pb = &self.patches[self.subpatches[b].patch];
        if pa.block == pb.block {
            return false;
        }
        if pa.group == pb.group {
            let (ba, bb) = (tree.block(pa.block), tree.block(pb.block));
            let fused = tree
                .group_of(pa.block)
                .is_some_and(|g| g.are_attracted(ba.sub_group, bb.sub_group));
            if fused {
                return false;
            }
        }
        true
    }

    /// Computes trim loops for every subpatch that crosses another solid
    ///
    /// Returns the number of trimmed subpatches.
    pub(crate) fn trim(&mut self, tree: &Tree) -> usize {
        let mut pairs = vec![];
        self.grid
            .find_all_collisions(|a, b| pairs.push((a.min(b), a.max(b))));
        pairs.sort();

        // Cutting triangles, keyed by subpatch and triangle index
        let mut cutters: BTreeMap<_, Vec<[Vector3<f32>; 3]>> = BTreeMap::new();
        for (a, b) in pairs {
            if !self.can_trim(tree, a, b) {
                continue;
            }
            let ta = self.triangle_positions(a);
            let tb = self.triangle_positions(b);
            for (i, x) in ta.iter().enumerate() {
                for (j, y) in tb.iter().enumerate() {
                    if tri_tri_contact(x, y) {
                        cutters.entry((a, i)).or_default().push(*y);
                        cutters.entry((b, j)).or_default().push(*x);
                    }
                }
            }
        }

        let mut trimmed: BTreeMap<SubpatchId, Vec<Loop>> = BTreeMap::new();
        let mut last = None;
        for ((sp, _), _) in &cutters {
            if last == Some(*sp) {
                continue;
            }
            last = Some(*sp);
            let mut loops = vec![];
            for (i, tri) in self.triangles(*sp).into_iter().enumerate() {
                let points = tri
                    .map(|v| {
                        let v = &self.vertices[v];
                        TrimPoint {
                            pos: v.pos,
                            normal: v.normal,
                            uv: v.param(),
                        }
                    })
                    .to_vec();
                let mut pieces = vec![Loop::new(points)];
                for cutter in cutters.get(&(*sp, i)).into_iter().flatten() {
                    pieces = self.cut(pieces, cutter, *sp);
                }
                loops.extend(pieces);
            }
            trimmed.insert(*sp, loops);
        }

        let count = trimmed.len();
        for (sp, loops) in trimmed {
            let p = self.subpatches[sp].patch;
            self.subpatches[sp].trimming = Some(Trimming { loops });
            self.patches[p].trimmed = true;
        }
        count
    }

    /// Splits each piece that straddles the cutter's plane within reach of
    /// the cutter itself
    fn cut(
        &self,
        pieces: Vec<Loop>,
        cutter: &[Vector3<f32>; 3],
        sp: SubpatchId,
    ) -> Vec<Loop> {
        let Some(normal) = triangle_normal(cutter).try_normalize(0.0) else {
            return pieces;
        };
        let reach = Aabb::from_points(cutter.iter()).grow(SERROR);
        let mut out = Vec::with_capacity(pieces.len() + 1);
        let mut budget = MAX_PIECES.saturating_sub(pieces.len());
        for piece in pieces {
            if budget == 0 || !piece.aabb().overlaps(&reach) {
                out.push(piece);
                continue;
            }
            match piece.split(&normal, &cutter[0]) {
                Some(halves) => {
                    budget -= 1;
                    out.extend(halves);
                }
                None => out.push(piece),
            }
        }
        if budget == 0 {
            log::warn!("trimming of {sp:?} stopped at {MAX_PIECES} pieces");
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn point(x: f32, y: f32) -> TrimPoint {
        TrimPoint {
            pos: Vector3::new(x, y, 0.0),
            normal: Vector3::z(),
            uv: Vector2::new(x, y),
        }
    }

    #[test]
    fn split_square() {
        let square = Loop::new(vec![
            point(0.0, 0.0),
            point(1.0, 0.0),
            point(1.0, 1.0),
            point(0.0, 1.0),
        ]);
        let [a, b] = square
            .split(&Vector3::x(), &Vector3::new(0.25, 0.0, 0.0))
            .unwrap();
        assert_eq!(a.points.len(), 4);
        assert_eq!(b.points.len(), 4);
        assert!(a.points.iter().all(|p| p.pos.x >= 0.25 - 1e-6));
        assert!(b.points.iter().all(|p| p.pos.x <= 0.25 + 1e-6));
        assert!(b.points.iter().any(|p| (p.uv.x - 0.25).abs() < 1e-6));

        // A plane through a vertex, or missing the loop, leaves it whole
        assert!(square.split(&Vector3::x(), &Vector3::zeros()).is_none());
        let far = Vector3::new(0.0, 2.0, 0.0);
        assert!(square.split(&Vector3::y(), &far).is_none());
    }

    #[test]
    fn split_triangle_through_vertex() {
        let tri =
            Loop::new(vec![point(0.0, 0.0), point(1.0, 0.0), point(0.0, 1.0)]);
        let n = Vector3::new(1.0, -1.0, 0.0).normalize();
        let [a, b] = tri.split(&n, &Vector3::zeros()).unwrap();
        assert_eq!(a.points.len(), 3);
        assert_eq!(b.points.len(), 3);
        assert_eq!(a.triangles().len(), 1);
    }
}
