//! Control patches and their adaptive refinement
//!
//! Every exterior half-edge of the control mesh produces one [`Patch`]: a
//! quad spanning the face center, the two adjacent edge points and the
//! half-edge's corner.  Patches are turned into bicubic [`CubicPatch`]es,
//! refined into [`Subpatch`] leaves on a dyadic `u32` parameter grid, then
//! stitched so that no cracks open between leaves of different sizes.
//!
//! Parameters run from `0` to [`ONE`] along each axis.  Corner `c` of a patch
//! sits at `(0, 0)`, `(ONE, 0)`, `(ONE, ONE)`, `(0, ONE)` for `c = 0..4`, and
//! edge `e` runs from corner `e` to corner `e + 1`.
use std::collections::BTreeMap;

use arrayvec::ArrayVec;
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

use crate::{
    Error,
    block::HEdgeId,
    hgrid::HGrid,
    indexed::{IndexVec, define_index},
    node::{BlockId, NodeId},
    types::{Aabb, SERROR},
};

mod param;
mod subdivide;
mod triangulate;
mod trim;

pub use param::CubicPatch;
pub use trim::{Loop, TrimPoint, Trimming};

define_index!(PatchId, "Handle to a [`Patch`] in a [`Surface`]");
define_index!(SubpatchId, "Handle to a [`Subpatch`] in a [`Surface`]");
define_index!(PointId, "Handle to a control point in a [`Surface`]");
define_index!(SVertexId, "Handle to an [`SVertex`] in a [`Surface`]");

/// Parameter value of the far side of a patch
pub const ONE: u32 = 1 << 16;

/// Upper bound on the number of patches around a control point
pub(crate) const MAX_VALENCE: usize = 64;

/// Parameter of each patch corner
pub(crate) const CORNER_UV: [[u32; 2]; 4] = [[0, 0], [ONE, 0], [ONE, ONE], [0, ONE]];

/// Control patch built from one exterior half-edge
#[derive(Clone, Debug)]
pub struct Patch {
    /// Face point, previous edge point, corner point, next edge point
    pub control: [PointId; 4],
    /// Patch across each edge, and the index of that edge on the other side
    pub neighbors: [Option<(PatchId, u8)>; 4],
    /// One bit per edge
    creases: u8,
    /// Block id, with the block side in the top 3 bits
    pub id: u32,
    /// Texture coordinates of the 4 corners
    pub uv: [Vector2<f32>; 4],
    pub block: BlockId,
    pub group: NodeId,
    pub hedge: HEdgeId,
    pub hidden: bool,
    pub flipped: bool,
    /// At least one subpatch was cut by another group's surface
    pub trimmed: bool,
    pub subpatches: Vec<SubpatchId>,

    /// Vertices keyed by `(v, u)`, for queries along rows
    rows: BTreeMap<(u32, u32), SVertexId>,
    /// Vertices keyed by `(u, v)`, for queries along columns
    cols: BTreeMap<(u32, u32), SVertexId>,
}

impl Patch {
    pub fn new(
        control: [PointId; 4],
        id: u32,
        uv: [Vector2<f32>; 4],
        block: BlockId,
        group: NodeId,
        hedge: HEdgeId,
    ) -> Self {
        Self {
            control,
            neighbors: [None; 4],
            creases: 0,
            id,
            uv,
            block,
            group,
            hedge,
            hidden: false,
            flipped: false,
            trimmed: false,
            subpatches: vec![],
            rows: BTreeMap::new(),
            cols: BTreeMap::new(),
        }
    }

    pub fn is_creased(&self, edge: usize) -> bool {
        (self.creases >> edge) & 1 != 0
    }

    /// Texture coordinate at a parameter value in `[0, 1]²`
    pub fn tex(&self, uv: Vector2<f32>) -> Vector2<f32> {
        let (u, v) = (uv.x, uv.y);
        self.uv[0] * ((1.0 - u) * (1.0 - v))
            + self.uv[1] * (u * (1.0 - v))
            + self.uv[2] * (u * v)
            + self.uv[3] * ((1.0 - u) * v)
    }
}

/// A vertex of the refined surface, private to one patch
#[derive(Clone, Debug)]
pub struct SVertex {
    pub uv: [u32; 2],
    pub pos: Vector3<f32>,
    pub normal: Vector3<f32>,
}

impl SVertex {
    /// Parameter scaled to `[0, 1]²`
    pub fn param(&self) -> Vector2<f32> {
        Vector2::new(self.uv[0] as f32, self.uv[1] as f32) / ONE as f32
    }
}

/// A leaf quad of a patch's refinement
#[derive(Clone, Debug)]
pub struct Subpatch {
    pub patch: PatchId,
    /// Corners at `(u0, v0)`, `(u1, v0)`, `(u1, v1)`, `(u0, v1)`
    pub corners: [SVertexId; 4],
    /// Fan center, present when an edge carries extra vertices
    pub center: Option<SVertexId>,
    pub trimming: Option<Trimming>,
    pub hidden: bool,
    pub flipped: bool,
}

/// One ring entry around a patch corner
#[derive(Copy, Clone, Debug)]
pub(crate) struct RingEntry {
    pub patch: PatchId,
    pub corner: usize,
    /// Control point across the ring edge
    pub edge: Vector3<f32>,
    /// Control point diagonally opposite the corner
    pub diag: Vector3<f32>,
    pub crease: bool,
}

/// The refined surface of every group
#[derive(Debug, Default)]
pub struct Surface {
    pub points: IndexVec<Vector3<f32>, PointId>,
    pub patches: IndexVec<Patch, PatchId>,
    pub subpatches: IndexVec<Subpatch, SubpatchId>,
    pub vertices: IndexVec<SVertex, SVertexId>,
    cubics: IndexVec<CubicPatch, PatchId>,
    /// Subpatch boxes, grown by [`SERROR`]
    pub(crate) grid: HGrid<SubpatchId>,
}

impl Surface {
    pub fn clear(&mut self) {
        self.points.clear();
        self.patches.clear();
        self.subpatches.clear();
        self.vertices.clear();
        self.cubics.clear();
        self.grid.clear();
    }

    pub fn create_point(&mut self, pos: Vector3<f32>) -> PointId {
        self.points.push(pos)
    }

    pub fn create_patch(&mut self, patch: Patch) -> PatchId {
        self.patches.push(patch)
    }

    /// Records that edge `e0` of `p0` is glued to edge `e1` of `p1`
    pub fn neighbors(
        &mut self,
        p0: PatchId,
        e0: usize,
        p1: PatchId,
        e1: usize,
        crease: bool,
    ) {
        for (p, e, q, f) in [(p0, e0, p1, e1), (p1, e1, p0, e0)] {
            let patch = &mut self.patches[p];
            patch.neighbors[e] = Some((q, f as u8));
            if crease {
                patch.creases |= 1 << e;
            } else {
                patch.creases &= !(1 << e);
            }
        }
    }

    /// Walks the patches around corner `c` of patch `p`, starting with `p`
    ///
    /// Each step crosses the edge that ends at the current corner.
    pub(crate) fn ring(
        &self,
        p: PatchId,
        c: usize,
    ) -> Result<ArrayVec<RingEntry, MAX_VALENCE>, Error> {
        let mut out = ArrayVec::new();
        let (mut cp, mut cc) = (p, c);
        loop {
            let patch = &self.patches[cp];
            let entry = RingEntry {
                patch: cp,
                corner: cc,
                edge: self.points[patch.control[(cc + 1) % 4]],
                diag: self.points[patch.control[(cc + 2) % 4]],
                crease: patch.is_creased(cc),
            };
            out.try_push(entry).map_err(|_| {
                Error::NonManifold(format!(
                    "more than {MAX_VALENCE} patches around corner {c} of {p:?}"
                ))
            })?;
            let (np, ne) = patch.neighbors[(cc + 3) % 4].ok_or_else(|| {
                Error::NonManifold(format!("{cp:?} has an open edge"))
            })?;
            cp = np;
            cc = ne as usize;
            if cp == p {
                return Ok(out);
            }
        }
    }

    /// Builds the bicubic form of every patch
    pub fn build_cubics(&mut self) -> Result<(), Error> {
        let keys: Vec<PatchId> = self.patches.keys().collect();
        let cubics = keys
            .par_iter()
            .map(|&p| CubicPatch::new(self, p))
            .collect::<Result<Vec<_>, _>>()?;
        self.cubics = cubics.into();
        Ok(())
    }

    pub fn cubic(&self, p: PatchId) -> &CubicPatch {
        &self.cubics[p]
    }

    /// Evaluates a patch at an integer parameter
    pub fn eval(&self, p: PatchId, uv: [u32; 2]) -> (Vector3<f32>, Vector3<f32>) {
        let uv = Vector2::new(uv[0] as f32, uv[1] as f32) / ONE as f32;
        self.cubics[p].eval(uv)
    }

    /// Returns the vertex of `p` at `uv`, creating it on first use
    pub(crate) fn vertex(&mut self, p: PatchId, uv: [u32; 2]) -> SVertexId {
        if let Some(v) = self.patches[p].rows.get(&(uv[1], uv[0])) {
            return *v;
        }
        let (pos, normal) = self.eval(p, uv);
        let v = self.vertices.push(SVertex { uv, pos, normal });
        let patch = &mut self.patches[p];
        patch.rows.insert((uv[1], uv[0]), v);
        patch.cols.insert((uv[0], uv[1]), v);
        v
    }

    /// Vertices strictly between `a` and `b`, which share a row or a
    /// column, ordered from `a` to `b`
    pub(crate) fn between(
        &self,
        p: PatchId,
        a: [u32; 2],
        b: [u32; 2],
    ) -> Vec<SVertexId> {
        let patch = &self.patches[p];
        let (map, fixed, s0, s1) = if a[1] == b[1] {
            (&patch.rows, a[1], a[0], b[0])
        } else {
            (&patch.cols, a[0], a[1], b[1])
        };
        let (lo, hi) = (s0.min(s1), s0.max(s1));
        if hi - lo < 2 {
            return vec![];
        }
        let mut out: Vec<SVertexId> = map
            .range((fixed, lo + 1)..(fixed, hi))
            .map(|(_, v)| *v)
            .collect();
        if s0 > s1 {
            out.reverse();
        }
        out
    }

    /// Vertices along edge `e` of a patch, keyed by their distance from the
    /// edge's starting corner
    pub(crate) fn edge_vertices(&self, p: PatchId, e: usize) -> Vec<(u32, SVertexId)> {
        let (a, b) = (CORNER_UV[e], CORNER_UV[(e + 1) % 4]);
        let patch = &self.patches[p];
        let mut out = vec![];
        for uv in [a, b] {
            if let Some(v) = patch.rows.get(&(uv[1], uv[0])) {
                out.push(*v);
            }
        }
        out.extend(self.between(p, a, b));
        let mut out: Vec<(u32, SVertexId)> = out
            .into_iter()
            .map(|v| (edge_param(e, self.vertices[v].uv), v))
            .collect();
        out.sort();
        out
    }

    /// Parameter bounds `(lo, hi)` of a subpatch
    pub fn bounds(&self, sp: SubpatchId) -> ([u32; 2], [u32; 2]) {
        let c = &self.subpatches[sp].corners;
        (self.vertices[c[0]].uv, self.vertices[c[2]].uv)
    }

    /// Box around every vertex a subpatch's triangles use
    pub fn subpatch_aabb(&self, sp: SubpatchId) -> Aabb {
        let s = &self.subpatches[sp];
        let mut out = Aabb::empty();
        for v in s.corners.iter().chain(s.center.iter()) {
            out.include(&self.vertices[*v].pos);
        }
        out
    }

    /// Rebuilds the broad-phase grid over subpatches
    pub(crate) fn build_grid(&mut self) {
        let boxes: Vec<_> = self
            .subpatches
            .keys()
            .map(|sp| (sp, self.subpatch_aabb(sp).grow(SERROR)))
            .collect();
        self.grid = HGrid::with_boxes(boxes);
    }
}

/// Parameter halfway between `a` and `b`
pub(crate) fn mid_uv(a: [u32; 2], b: [u32; 2]) -> [u32; 2] {
    [(a[0] + b[0]) / 2, (a[1] + b[1]) / 2]
}

/// Distance along edge `e` from its starting corner
pub(crate) fn edge_param(e: usize, uv: [u32; 2]) -> u32 {
    match e {
        0 => uv[0],
        1 => uv[1],
        2 => ONE - uv[0],
        _ => ONE - uv[1],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::indexed::Index;

    /// A single flat patch over the unit square, with no neighbors
    fn flat_patch() -> Surface {
        let mut s = Surface::default();
        let pts = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ]
        .map(|p| s.create_point(p));
        s.create_patch(Patch::new(
            pts,
            7,
            [Vector2::zeros(); 4],
            BlockId::new(0),
            NodeId::new(0),
            HEdgeId::new(0),
        ));
        s
    }

    #[test]
    fn neighbors_are_symmetric() {
        let mut s = flat_patch();
        let q = s.create_patch(s.patches[PatchId::new(0)].clone());
        let p = PatchId::new(0);
        s.neighbors(p, 1, q, 3, true);
        assert_eq!(s.patches[p].neighbors[1], Some((q, 3)));
        assert_eq!(s.patches[q].neighbors[3], Some((p, 1)));
        assert!(s.patches[p].is_creased(1));
        assert!(s.patches[q].is_creased(3));
        assert!(!s.patches[q].is_creased(1));
    }

    #[test]
    fn open_ring_is_an_error() {
        let s = flat_patch();
        assert!(matches!(
            s.ring(PatchId::new(0), 0),
            Err(Error::NonManifold(..))
        ));
    }

    #[test]
    fn edge_params() {
        assert_eq!(edge_param(0, [10, 0]), 10);
        assert_eq!(edge_param(1, [ONE, 20]), 20);
        assert_eq!(edge_param(2, [ONE - 5, ONE]), 5);
        assert_eq!(edge_param(3, [0, ONE]), 0);
        for e in 0..4 {
            assert_eq!(edge_param(e, CORNER_UV[e]), 0);
            assert_eq!(edge_param(e, CORNER_UV[(e + 1) % 4]), ONE);
        }
    }
}
