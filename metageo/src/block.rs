//! Hexahedral blocks and their half-edge topology
//!
//! Each block is a cube-topology cell with 8 corners.  Its 6 sides become
//! faces made of half-edges; sides with a nonzero subdivision code are then
//! split into a grid of sub-faces.  Corner `i` of a block sits at
//! `(i & 1, (i >> 1) & 1, (i >> 2) & 1)` in the block's parametric space,
//! which is recorded per vertex as `t` and used to locate split points.
use nalgebra::Vector3;

use crate::{
    Error,
    indexed::{IndexVec, define_index},
    node::{BlockId, NodeId},
    surface::{PatchId, PointId},
    types::{Aabb, max_axis},
};

define_index!(FaceId, "Handle to a [`Face`] in a [`Topology`]");
define_index!(HEdgeId, "Handle to a [`HEdge`] in a [`Topology`]");
define_index!(VertexId, "Handle to a [`Vertex`] in a [`Topology`]");

/// Mask for the user-visible part of an id; the top 3 bits hold a side
pub const ID_MASK: u32 = 0x1fff_ffff;
static_assertions::const_assert_eq!(ID_MASK >> 29, 0);

/// Corner vertices of each side, counter-clockwise seen from outside
pub const FACE_VERTEX: [[usize; 4]; 6] = [
    [0, 4, 6, 2],
    [5, 1, 3, 7],
    [0, 1, 5, 4],
    [6, 7, 3, 2],
    [1, 0, 2, 3],
    [4, 5, 7, 6],
];

/// Cube edge (crease bit) running from corner `c` to corner `c + 1` of a side
pub const FACE_EDGE: [[usize; 4]; 6] = [
    [8, 5, 11, 4],
    [9, 7, 10, 6],
    [0, 9, 3, 8],
    [2, 10, 1, 11],
    [0, 4, 1, 7],
    [3, 6, 2, 5],
];

/// Split positions for 1 through 4 cells
const SUB_FRACS: [[f32; 4]; 5] = [
    [1.0, 1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0, 1.0],
    [0.5, 1.0, 1.0, 1.0],
    [1.0 / 3.0, 2.0 / 3.0, 1.0, 1.0],
    [0.25, 0.5, 0.75, 1.0],
];

/// Tolerance when matching parametric split positions
const T_EPSILON: f32 = 32.0 * f32::EPSILON;

/// Upper bound on the length of any half-edge walk
pub(crate) const MAX_WALK: usize = 4096;

/// A hexahedral block
#[derive(Clone, Debug)]
pub struct MetaBlock {
    /// Corner positions in the group's local frame
    pub local: [Vector3<f32>; 8],
    /// Corner positions in world space, recomputed on update
    pub corners: [Vector3<f32>; 8],
    /// One crease bit per cube edge
    pub creases: u16,
    /// 4 bits of subdivision code per side
    pub subdivision: u32,
    /// User id (material), 29 bits
    pub id: u32,
    /// Sub-group id, checked against the group's attraction table
    pub sub_group: u32,
    /// Group node this block reports to
    pub group: NodeId,
    /// Faces built by the last topology pass, sub-faces included
    pub(crate) faces: Vec<FaceId>,
}

impl MetaBlock {
    /// Builds a unit cube block
    pub fn new(group: NodeId) -> Self {
        let local = std::array::from_fn(|i| unit_corner(i));
        Self {
            local,
            corners: local,
            creases: 0,
            subdivision: 0,
            id: 0,
            sub_group: 0,
            group,
            faces: vec![],
        }
    }

    /// Subdivision code of a side
    pub fn subdivision(&self, side: usize) -> u32 {
        (self.subdivision >> (4 * side)) & 0xf
    }

    pub fn is_creased(&self, edge: usize) -> bool {
        (self.creases >> edge) & 1 != 0
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(self.corners.iter())
    }

    pub fn center(&self) -> Vector3<f32> {
        self.corners.iter().sum::<Vector3<f32>>() / 8.0
    }

    /// World-space corners of a side, before any subdivision
    pub fn side_quad(&self, side: usize) -> [Vector3<f32>; 4] {
        FACE_VERTEX[side].map(|i| self.corners[i])
    }

    pub fn faces(&self) -> &[FaceId] {
        &self.faces
    }
}

fn unit_corner(i: usize) -> Vector3<f32> {
    Vector3::new(
        (i & 1) as f32,
        ((i >> 1) & 1) as f32,
        ((i >> 2) & 1) as f32,
    )
}

pub fn quad_center(q: &[Vector3<f32>; 4]) -> Vector3<f32> {
    (q[0] + q[1] + q[2] + q[3]) / 4.0
}

fn quad_tangents(q: &[Vector3<f32>; 4]) -> (Vector3<f32>, Vector3<f32>) {
    let tanu = (q[1] - q[0]) / 2.0 + (q[2] - q[3]) / 2.0;
    let tanv = (q[3] - q[0]) / 2.0 + (q[2] - q[1]) / 2.0;
    (tanu, tanv)
}

/// Squared length of the shorter mean tangent, used as a linking radius
pub fn quad_force(q: &[Vector3<f32>; 4]) -> f32 {
    let (tanu, tanv) = quad_tangents(q);
    tanu.norm_squared().min(tanv.norm_squared())
}

/// Outward unit normal
pub fn quad_direction(q: &[Vector3<f32>; 4]) -> Vector3<f32> {
    let (tanu, tanv) = quad_tangents(q);
    tanu.cross(&tanv).try_normalize(0.0).unwrap_or_else(Vector3::zeros)
}

////////////////////////////////////////////////////////////////////////////////

/// Topological vertex, private to one block
#[derive(Clone, Debug)]
pub struct Vertex {
    pub pos: Vector3<f32>,
    /// Position in the block's unit-cube parameter space
    pub t: Vector3<f32>,
    /// Welded control-mesh point, assigned by the control-mesh builder
    pub joint: Option<PointId>,
}

/// A quad face, possibly with extra vertices along its edges
#[derive(Clone, Debug)]
pub struct Face {
    pub block: BlockId,
    pub side: u8,
    /// Half-edges starting at the 4 corners, in counter-clockwise order
    pub corners: [HEdgeId; 4],
    /// Coincident face on another block, if any
    pub link: Option<FaceId>,
    /// Corner `c` of this face meets corner `(link_corner - c) % 4` of the
    /// linked face
    pub link_corner: u8,
    /// Squared center distance to the linked face
    pub(crate) link_dist: f32,
}

#[derive(Clone, Debug)]
pub struct HEdge {
    pub face: FaceId,
    pub next: HEdgeId,
    /// Opposite half-edge within the same block
    pub neighbor: HEdgeId,
    /// Coincident, opposite half-edge across faces that are glued together
    pub link: Option<HEdgeId>,
    /// Starting vertex
    pub vertex: VertexId,
    pub crease: bool,
    /// Control patch built from this half-edge
    pub patch: Option<PatchId>,
}

/// Arena of faces, half-edges, and vertices for every block
#[derive(Clone, Debug, Default)]
pub struct Topology {
    pub faces: IndexVec<Face, FaceId>,
    pub hedges: IndexVec<HEdge, HEdgeId>,
    pub vertices: IndexVec<Vertex, VertexId>,
}

impl Topology {
    pub fn clear(&mut self) {
        self.faces.clear();
        self.hedges.clear();
        self.vertices.clear();
    }

    pub fn pos(&self, h: HEdgeId) -> Vector3<f32> {
        self.vertices[self.hedges[h].vertex].pos
    }

    fn t(&self, h: HEdgeId) -> Vector3<f32> {
        self.vertices[self.hedges[h].vertex].t
    }

    fn new_hedge(&mut self, face: FaceId, vertex: VertexId) -> HEdgeId {
        self.hedges.push(HEdge {
            face,
            next: HEdgeId::default(),
            neighbor: HEdgeId::default(),
            link: None,
            vertex,
            crease: false,
            patch: None,
        })
    }

    fn new_face(&mut self, block: BlockId, side: u8) -> FaceId {
        self.faces.push(Face {
            block,
            side,
            corners: [HEdgeId::default(); 4],
            link: None,
            link_corner: 0,
            link_dist: f32::INFINITY,
        })
    }

    /// Corner positions of a face
    pub fn face_quad(&self, f: FaceId) -> [Vector3<f32>; 4] {
        self.faces[f].corners.map(|h| self.pos(h))
    }

    pub fn face_center(&self, f: FaceId) -> Vector3<f32> {
        quad_center(&self.face_quad(f))
    }

    pub fn face_force(&self, f: FaceId) -> f32 {
        quad_force(&self.face_quad(f))
    }

    pub fn face_direction(&self, f: FaceId) -> Vector3<f32> {
        quad_direction(&self.face_quad(f))
    }

    /// Half-edges from `start` up to (but excluding) `stop`
    pub fn chain(
        &self,
        start: HEdgeId,
        stop: HEdgeId,
    ) -> Result<Vec<HEdgeId>, Error> {
        let mut out = vec![];
        let mut h = start;
        loop {
            out.push(h);
            h = self.hedges[h].next;
            if h == stop {
                return Ok(out);
            } else if h == start || out.len() > MAX_WALK {
                return Err(Error::NonManifold(format!(
                    "half-edge chain from {start:?} never reaches {stop:?}"
                )));
            }
        }
    }

    /// Interior vertices between `start` and `end`, as fractions of the way
    /// along in the block's parameter space
    pub fn fractions(
        &self,
        start: HEdgeId,
        end: HEdgeId,
    ) -> Result<Vec<f32>, Error> {
        let t0 = self.t(start);
        let dt = self.t(end) - t0;
        let axis = max_axis(&dt);
        let chain = self.chain(start, end)?;
        Ok(chain[1..]
            .iter()
            .map(|h| (self.t(*h)[axis] - t0[axis]) / dt[axis])
            .collect())
    }

    /// Every half-edge of a face, starting at its first corner
    pub fn face_loop(&self, f: FaceId) -> Result<Vec<HEdgeId>, Error> {
        let start = self.faces[f].corners[0];
        self.chain(start, start)
            .map_err(|_| Error::NonManifold(format!("face {f:?} is open")))
    }

    /// Builds the half-edge mesh of a block, then splits subdivided sides
    pub fn update_topology(&mut self, id: BlockId, block: &mut MetaBlock) {
        block.faces.clear();
        let verts: [VertexId; 8] = std::array::from_fn(|i| {
            self.vertices.push(Vertex {
                pos: block.corners[i],
                t: unit_corner(i),
                joint: None,
            })
        });

        let mut sides = [FaceId::default(); 6];
        let mut edges = Vec::with_capacity(24);
        for (s, side) in sides.iter_mut().enumerate() {
            let f = self.new_face(id, s as u8);
            let hs: [HEdgeId; 4] = std::array::from_fn(|c| {
                let h = self.new_hedge(f, verts[FACE_VERTEX[s][c]]);
                self.hedges[h].crease = block.is_creased(FACE_EDGE[s][c]);
                h
            });
            for c in 0..4 {
                self.hedges[hs[c]].next = hs[(c + 1) % 4];
                edges.push((
                    FACE_VERTEX[s][c],
                    FACE_VERTEX[s][(c + 1) % 4],
                    hs[c],
                ));
            }
            self.faces[f].corners = hs;
            *side = f;
        }
        for &(a, b, h) in &edges {
            if let Some(&(_, _, n)) =
                edges.iter().find(|(c, d, _)| *c == b && *d == a)
            {
                self.hedges[h].neighbor = n;
            }
        }

        for (s, &f) in sides.iter().enumerate() {
            let code = block.subdivision(s) as usize;
            if code == 0 {
                block.faces.push(f);
            } else {
                let sx = (code & 3) + 1;
                let sy = (code >> 2) + 1;
                block.faces.extend(self.split_face(f, sx, sy));
            }
        }
    }

    /// Splits a half-edge and its neighbor at `frac` along the half-edge
    ///
    /// If the neighbor is linked to another block, the linked half-edge is
    /// split as well so that the seam stays consistent.
    pub fn split_edge(&mut self, e0: HEdgeId, frac: f32) {
        let ne0 = self.hedges[e0].neighbor;
        let a = &self.vertices[self.hedges[e0].vertex];
        let b = &self.vertices[self.hedges[ne0].vertex];
        let v = Vertex {
            pos: a.pos + (b.pos - a.pos) * frac,
            t: a.t + (b.t - a.t) * frac,
            joint: None,
        };
        let v = self.vertices.push(v);

        let he = self.hedges[e0].clone();
        let nhe = self.hedges[ne0].clone();
        let e1 = self.hedges.push(HEdge {
            next: he.next,
            neighbor: ne0,
            vertex: v,
            patch: None,
            ..he
        });
        let ne1 = self.hedges.push(HEdge {
            next: nhe.next,
            neighbor: e0,
            vertex: v,
            patch: None,
            ..nhe
        });
        self.hedges[e0].neighbor = ne1;
        self.hedges[e0].next = e1;
        self.hedges[ne0].neighbor = e1;
        self.hedges[ne0].next = ne1;

        if let Some(l) = nhe.link {
            self.split_edge(l, frac);
            let l1 = self.hedges[l].next;
            self.hedges[ne0].link = Some(l1);
            self.hedges[l1].link = Some(ne0);
            self.hedges[l].link = Some(ne1);
            self.hedges[ne1].link = Some(l);
        }
    }

    /// Splits the chain from `start` to `end` at each fraction, measured in
    /// the block's parameter space
    ///
    /// Fractions must be sorted; any at or above 1 are ignored.  Existing
    /// vertices within tolerance of a fraction are reused rather than split
    /// again.  Returns the half-edge starting at each requested fraction.
    pub fn split_range(
        &mut self,
        start: HEdgeId,
        end: HEdgeId,
        fracs: &[f32],
    ) -> Vec<HEdgeId> {
        let t0 = self.t(start);
        let axis = max_axis(&(self.t(end) - t0));
        let p0 = t0[axis];
        let dt = self.t(end)[axis] - p0;
        let sign = dt.signum();
        let param = |topo: &Self, h: HEdgeId| topo.t(h)[axis];

        let mut out = Vec::with_capacity(fracs.len());
        let mut cur = start;
        for &frac in fracs {
            if frac >= 1.0 {
                break;
            }
            let target = p0 + dt * frac;
            loop {
                let n = self.hedges[cur].next;
                if n == end || (param(self, n) - target) * sign > T_EPSILON {
                    break;
                }
                cur = n;
            }
            let pc = param(self, cur);
            if (pc - target).abs() > T_EPSILON {
                let pn = param(self, self.hedges[cur].next);
                self.split_edge(cur, (target - pc) / (pn - pc));
                cur = self.hedges[cur].next;
            }
            out.push(cur);
        }
        out
    }

    /// Splits a face into an `sx × sy` grid of sub-faces
    ///
    /// The face being split becomes the first sub-face (lowest `x` and `y`);
    /// the remaining `sx * sy - 1` are new.  Sub-faces are returned in
    /// row-major order.
    pub fn split_face(&mut self, f: FaceId, sx: usize, sy: usize) -> Vec<FaceId> {
        let sx = sx.clamp(1, 4);
        let sy = sy.clamp(1, 4);
        let corners = self.faces[f].corners;
        let ufr = &SUB_FRACS[sx][..sx - 1];
        let vfr = &SUB_FRACS[sy][..sy - 1];
        let urev: Vec<f32> = ufr.iter().rev().map(|u| 1.0 - u).collect();
        let vrev: Vec<f32> = vfr.iter().rev().map(|v| 1.0 - v).collect();

        // Grid nodes along each side, starting at that side's corner
        let mut nodes: [Vec<HEdgeId>; 4] = Default::default();
        for (k, fr) in [ufr, vfr, &urev[..], &vrev[..]].into_iter().enumerate() {
            let next = corners[(k + 1) % 4];
            nodes[k].push(corners[k]);
            let split = self.split_range(corners[k], next, fr);
            nodes[k].extend(split);
            nodes[k].push(next);
        }
        // Boundary segments, each a run of half-edges between grid nodes
        let segs: [Vec<Vec<HEdgeId>>; 4] = std::array::from_fn(|k| {
            nodes[k]
                .windows(2)
                .map(|w| {
                    let mut out = vec![];
                    let mut h = w[0];
                    while h != w[1] && out.len() <= MAX_WALK {
                        out.push(h);
                        h = self.hedges[h].next;
                    }
                    out
                })
                .collect()
        });

        let vertex = |topo: &Self, h: HEdgeId| topo.hedges[h].vertex;
        let mut grid = vec![vec![VertexId::default(); sy + 1]; sx + 1];
        for i in 0..sx {
            grid[i][0] = vertex(self, nodes[0][i]);
            grid[sx - i][sy] = vertex(self, nodes[2][i]);
        }
        for j in 0..sy {
            grid[sx][j] = vertex(self, nodes[1][j]);
            grid[0][sy - j] = vertex(self, nodes[3][j]);
        }
        let p = corners.map(|h| self.pos(h));
        let t = corners.map(|h| self.t(h));
        for i in 1..sx {
            for j in 1..sy {
                let u = SUB_FRACS[sx][i - 1];
                let v = SUB_FRACS[sy][j - 1];
                let w = [(1.0 - u) * (1.0 - v), u * (1.0 - v), u * v, (1.0 - u) * v];
                grid[i][j] = self.vertices.push(Vertex {
                    pos: (0..4).map(|k| p[k] * w[k]).sum(),
                    t: (0..4).map(|k| t[k] * w[k]).sum(),
                    joint: None,
                });
            }
        }

        let (block, side) = (self.faces[f].block, self.faces[f].side);
        let mut faces = vec![vec![f; sy]; sx];
        for (k, face) in faces.iter_mut().flatten().enumerate() {
            if k > 0 {
                *face = self.new_face(block, side);
            }
        }

        // Interior half-edges, keyed by the sub-face that owns them
        let mut bottom = vec![vec![None; sy]; sx];
        let mut top = vec![vec![None; sy]; sx];
        let mut right = vec![vec![None; sy]; sx];
        let mut left = vec![vec![None; sy]; sx];
        for j in 1..sy {
            for i in 0..sx {
                let b = self.new_hedge(faces[i][j], grid[i][j]);
                let t = self.new_hedge(faces[i][j - 1], grid[i + 1][j]);
                self.hedges[b].neighbor = t;
                self.hedges[t].neighbor = b;
                bottom[i][j] = Some(b);
                top[i][j - 1] = Some(t);
            }
        }
        for i in 1..sx {
            for j in 0..sy {
                let r = self.new_hedge(faces[i - 1][j], grid[i][j]);
                let l = self.new_hedge(faces[i][j], grid[i][j + 1]);
                self.hedges[r].neighbor = l;
                self.hedges[l].neighbor = r;
                right[i - 1][j] = Some(r);
                left[i][j] = Some(l);
            }
        }

        let mut out = Vec::with_capacity(sx * sy);
        for y in 0..sy {
            for x in 0..sx {
                let fid = faces[x][y];
                let pick = |new: Option<HEdgeId>, seg: &Vec<HEdgeId>| match new {
                    Some(h) => vec![h],
                    None => seg.clone(),
                };
                let loops = [
                    pick(bottom[x][y], &segs[0][x.min(segs[0].len() - 1)]),
                    pick(right[x][y], &segs[1][y.min(segs[1].len() - 1)]),
                    pick(top[x][y], &segs[2][(sx - 1 - x).min(segs[2].len() - 1)]),
                    pick(left[x][y], &segs[3][(sy - 1 - y).min(segs[3].len() - 1)]),
                ];
                for (s, run) in loops.iter().enumerate() {
                    for w in run.windows(2) {
                        self.hedges[w[0]].next = w[1];
                    }
                    if let (Some(&last), Some(&first)) =
                        (run.last(), loops[(s + 1) % 4].first())
                    {
                        self.hedges[last].next = first;
                    }
                    for &h in run {
                        self.hedges[h].face = fid;
                    }
                }
                self.faces[fid].corners = std::array::from_fn(|s| loops[s][0]);
                out.push(fid);
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::indexed::Index;

    fn cube(subdivision: u32, creases: u16) -> (Topology, MetaBlock) {
        let mut block = MetaBlock::new(NodeId::default());
        block.subdivision = subdivision;
        block.creases = creases;
        let mut topo = Topology::default();
        topo.update_topology(BlockId::new(0), &mut block);
        (topo, block)
    }

    /// Checks loop closure and neighbor involution over the whole block
    fn check_closed(topo: &Topology, block: &MetaBlock) {
        for &f in block.faces() {
            let hs = topo.face_loop(f).unwrap();
            assert!(hs.len() >= 4);
            for &h in &hs {
                let he = &topo.hedges[h];
                assert_eq!(he.face, f);
                assert_eq!(topo.hedges[he.neighbor].neighbor, h);
                assert_eq!(
                    topo.hedges[he.neighbor].vertex,
                    topo.hedges[he.next].vertex
                );
            }
            for c in topo.faces[f].corners {
                assert!(hs.contains(&c));
            }
        }
    }

    #[test]
    fn unit_cube() {
        let (topo, block) = cube(0, 0);
        assert_eq!(topo.faces.len(), 6);
        assert_eq!(topo.hedges.len(), 24);
        assert_eq!(topo.vertices.len(), 8);
        for &f in block.faces() {
            let start = topo.faces[f].corners[0];
            let mut h = start;
            for _ in 0..4 {
                h = topo.hedges[h].next;
            }
            assert_eq!(h, start);
        }
        check_closed(&topo, &block);

        let dirs = [
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        for (s, d) in dirs.iter().enumerate() {
            let f = block.faces()[s];
            assert_eq!(topo.face_direction(f), *d, "side {s}");
            assert_eq!(quad_direction(&block.side_quad(s)), *d);
            assert_eq!(topo.face_force(f), 1.0);
        }
    }

    #[test]
    fn creases_are_shared() {
        let (topo, block) = cube(0, 1 << 5);
        let creased: Vec<_> =
            topo.hedges.iter().filter(|(_, h)| h.crease).collect();
        assert_eq!(creased.len(), 2);
        let (a, ha) = creased[0];
        assert_eq!(ha.neighbor, creased[1].0);
        assert_eq!(topo.hedges[ha.neighbor].neighbor, a);
        assert_eq!(block.faces().len(), 6);
    }

    #[test]
    fn split_counts() {
        for (sx, sy) in [(1, 1), (2, 1), (3, 2), (4, 4)] {
            let mut block = MetaBlock::new(NodeId::default());
            let mut topo = Topology::default();
            topo.update_topology(BlockId::new(0), &mut block);
            let before = topo.faces.len();
            let f = block.faces()[2];
            let faces = topo.split_face(f, sx, sy);
            assert_eq!(faces.len(), sx * sy);
            assert_eq!(faces[0], f);
            assert_eq!(topo.faces.len() - before, sx * sy - 1);
            for &f in &faces {
                let hs = topo.face_loop(f).unwrap();
                assert_eq!(hs.len(), 4, "interior sub-faces have no T-vertices");
                assert!(topo.face_force(f) > 0.0);
            }
        }
    }

    #[test]
    fn subdivided_cube_is_closed() {
        // 3×2 on side 0, 2×2 on side 2, 4×1 on side 4
        let (topo, block) = cube(0x6 | (0x5 << 8) | (0x3 << 16), 0xfff);
        assert_eq!(block.faces().len(), 6 + 1 + 4 + 1 + 4 + 1);
        check_closed(&topo, &block);

        // Sub-faces of side 0 tile the unit square in y and z
        let area: f32 = block
            .faces()
            .iter()
            .filter(|f| topo.faces[**f].side == 0)
            .map(|&f| {
                let q = topo.face_quad(f);
                (q[1] - q[0]).cross(&(q[3] - q[0])).norm()
            })
            .sum();
        assert!((area - 1.0).abs() < 1e-5);
        for &f in block.faces() {
            if topo.faces[f].side == 0 {
                assert!(topo.face_quad(f).iter().all(|p| p.x == 0.0));
            }
        }
    }

    #[test]
    fn split_range_reuses_vertices() {
        let (mut topo, block) = cube(0, 0);
        let f = block.faces()[0];
        let [c0, c1, ..] = topo.faces[f].corners;
        let a = topo.split_range(c0, c1, &[0.5, 1.0]);
        let count = topo.vertices.len();
        let b = topo.split_range(c0, c1, &[0.25, 0.5, 0.75]);
        assert_eq!(b[1], a[0]);
        assert_eq!(topo.vertices.len(), count + 2);
        let chain = topo.chain(c0, c1).unwrap();
        assert_eq!(chain.len(), 4);
        check_closed(&topo, &block);
    }

    #[test]
    fn split_follows_links() {
        let mut ta = Topology::default();
        let mut a = MetaBlock::new(NodeId::default());
        ta.update_topology(BlockId::new(0), &mut a);
        let mut b = MetaBlock::new(NodeId::default());
        for c in b.corners.iter_mut() {
            c.x += 1.0;
        }
        ta.update_topology(BlockId::new(1), &mut b);

        // Link the +x side of `a` to the -x side of `b` by hand, pairing
        // opposite half-edges by their endpoints
        let fa = a.faces()[1];
        let fb = b.faces()[0];
        for ha in ta.face_loop(fa).unwrap() {
            let (p, q) = (ta.pos(ha), ta.pos(ta.hedges[ha].next));
            for hb in ta.face_loop(fb).unwrap() {
                let (r, s) = (ta.pos(hb), ta.pos(ta.hedges[hb].next));
                if p == s && q == r {
                    ta.hedges[ha].link = Some(hb);
                    ta.hedges[hb].link = Some(ha);
                }
            }
        }

        // Splitting an edge whose neighbor is linked splits the far side too
        let h = ta.hedges[ta.faces[fa].corners[0]].neighbor;
        let count = ta.hedges.len();
        ta.split_edge(h, 0.5);
        assert_eq!(ta.hedges.len(), count + 4);
        for hb in ta.face_loop(fb).unwrap() {
            let l = ta.hedges[hb].link.unwrap();
            assert_eq!(ta.hedges[l].link, Some(hb));
            assert_eq!(ta.pos(l), ta.pos(ta.hedges[hb].next));
        }
        assert_eq!(ta.face_loop(fb).unwrap().len(), 5);
    }
}
