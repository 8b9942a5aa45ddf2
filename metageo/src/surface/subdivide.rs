//! Adaptive refinement of patches into subpatches, and crack fixing
use nalgebra::Vector3;

use super::{
    CORNER_UV, ONE, PatchId, SVertexId, Subpatch, Surface, edge_param,
    mid_uv as mid,
};
use crate::{Error, geometry::Settings};

/// Interior detail is only tested on cells wider than this
const MIN_DETAIL_SPAN: u32 = ONE / 16;

/// Every edge is tested on the root cell
const ROOT_FLAGS: u8 = 0x3c;

/// Split along `u`
const SPLIT_U: u8 = 1;
/// Split along `v`
const SPLIT_V: u8 = 2;

#[derive(Copy, Clone, Debug)]
struct Cell {
    lo: [u32; 2],
    hi: [u32; 2],
    flags: u8,
}

impl Cell {
    fn corners(&self) -> [[u32; 2]; 4] {
        let (lo, hi) = (self.lo, self.hi);
        [lo, [hi[0], lo[1]], hi, [lo[0], hi[1]]]
    }
}

impl Surface {
    /// Refines every patch, then stitches the result
    pub fn subdivide(&mut self, settings: &Settings) -> Result<(), Error> {
        for p in self.patches.keys() {
            self.subdivide_patch(p, settings);
        }
        self.snap_corners()?;
        self.fix_patch_edges();
        self.fix_t_vertices();
        Ok(())
    }

    /// Decides how a cell should split, returning `SPLIT_*` bits together
    /// with the edges that triggered them
    fn split_mode(&self, p: PatchId, cell: &Cell, settings: &Settings) -> u8 {
        let min_span = ONE >> settings.max_level.min(16);
        let can = [
            cell.hi[0] - cell.lo[0] > min_span,
            cell.hi[1] - cell.lo[1] > min_span,
        ];
        let geometric = settings.geometric_error * settings.geometric_error;
        let detail = settings.detail_error * settings.detail_error;

        let corners = cell.corners();
        let pos = corners.map(|c| self.eval(p, c).0);
        let mut sub = 0;
        let mut edge_mid = [Vector3::zeros(); 4];
        for e in 0..4 {
            let m = self.eval(p, mid(corners[e], corners[(e + 1) % 4])).0;
            edge_mid[e] = m;
            let axis = e % 2;
            if cell.flags & (4 << e) == 0 || !can[axis] {
                continue;
            }
            let chord = (pos[e] + pos[(e + 1) % 4]) / 2.0;
            if (m - chord).norm_squared() > geometric {
                sub |= (1 << axis) | (4 << e);
            }
        }

        let center = self.eval(p, mid(cell.lo, cell.hi)).0;
        for axis in 0..2 {
            let bit = 1 << axis;
            let span = cell.hi[axis] - cell.lo[axis];
            if sub & bit != 0 || !can[axis] || span <= MIN_DETAIL_SPAN {
                continue;
            }
            // Splitting along `u` is judged by the `v = const` edges
            let (a, b) = if axis == 0 { (1, 3) } else { (0, 2) };
            let across = (edge_mid[a] + edge_mid[b]) / 2.0;
            if (center - across).norm_squared() > detail {
                sub |= bit;
            }
        }
        sub
    }

    fn subdivide_patch(&mut self, p: PatchId, settings: &Settings) {
        let mut todo = vec![Cell {
            lo: [0, 0],
            hi: [ONE, ONE],
            flags: ROOT_FLAGS,
        }];
        while let Some(cell) = todo.pop() {
            let sub = self.split_mode(p, &cell, settings);
            let base = sub & ROOT_FLAGS;
            let (lo, hi) = (cell.lo, cell.hi);
            let m = mid(lo, hi);
            let child = |lo, hi, flags| Cell {
                lo,
                hi,
                flags: base | flags,
            };
            match sub & (SPLIT_U | SPLIT_V) {
                0 => self.emit(p, &cell),
                SPLIT_U => {
                    todo.push(child(lo, [m[0], hi[1]], 0x08));
                    todo.push(child([m[0], lo[1]], hi, 0x20));
                }
                SPLIT_V => {
                    todo.push(child(lo, [hi[0], m[1]], 0x10));
                    todo.push(child([lo[0], m[1]], hi, 0x04));
                }
                _ => {
                    todo.push(child(lo, m, 0x18));
                    todo.push(child([m[0], lo[1]], [hi[0], m[1]], 0x30));
                    todo.push(child(m, hi, 0x24));
                    todo.push(child([lo[0], m[1]], [m[0], hi[1]], 0x0c));
                }
            }
        }
    }

    /// Turns a cell into a subpatch leaf
    fn emit(&mut self, p: PatchId, cell: &Cell) {
        let corners = cell.corners().map(|uv| self.vertex(p, uv));
        let sp = self.subpatches.push(Subpatch {
            patch: p,
            corners,
            center: None,
            trimming: None,
            hidden: false,
            flipped: false,
        });
        self.patches[p].subpatches.push(sp);
    }

    fn corner_vertex(&self, p: PatchId, c: usize) -> Option<SVertexId> {
        let uv = CORNER_UV[c];
        self.patches[p].rows.get(&(uv[1], uv[0])).copied()
    }

    /// Moves every patch corner to the position chosen by the lowest
    /// numbered patch around it
    fn snap_corners(&mut self) -> Result<(), Error> {
        for p in self.patches.keys() {
            for c in 0..4 {
                let ring = self.ring(p, c)?;
                let Some(owner) = ring.iter().min_by_key(|r| r.patch) else {
                    continue;
                };
                if owner.patch != p {
                    continue;
                }
                let Some(src) = self.corner_vertex(p, c) else {
                    continue;
                };
                let pos = self.vertices[src].pos;
                for r in &ring {
                    if let Some(v) = self.corner_vertex(r.patch, r.corner) {
                        self.vertices[v].pos = pos;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reconciles vertices along every edge shared by two patches
    ///
    /// Parameters present on both sides take the lower patch's position.
    /// A parameter present on one side only is moved onto the straight
    /// segment that the other side draws there.
    fn fix_patch_edges(&mut self) {
        for p in self.patches.keys() {
            for e in 0..4 {
                let Some((q, f)) = self.patches[p].neighbors[e] else {
                    continue;
                };
                if q <= p {
                    continue;
                }
                let ours = self.edge_vertices(p, e);
                let theirs: Vec<(u32, SVertexId)> = self
                    .edge_vertices(q, f as usize)
                    .into_iter()
                    .rev()
                    .map(|(s, v)| (ONE - s, v))
                    .collect();

                let mut common = vec![];
                let mut j = 0;
                for &(s, v) in &ours {
                    while j < theirs.len() && theirs[j].0 < s {
                        j += 1;
                    }
                    if j < theirs.len() && theirs[j].0 == s {
                        let pos = self.vertices[v].pos;
                        self.vertices[theirs[j].1].pos = pos;
                        common.push((s, pos));
                    }
                }
                for (s, v) in ours.iter().chain(theirs.iter()) {
                    let k = common.partition_point(|(c, _)| c < s);
                    if k < common.len() && common[k].0 == *s {
                        continue;
                    }
                    if k == 0 || k == common.len() {
                        log::warn!("edge vertex of {p:?} outside the shared edge");
                        continue;
                    }
                    let (s0, p0) = common[k - 1];
                    let (s1, p1) = common[k];
                    let t = (s - s0) as f32 / (s1 - s0) as f32;
                    self.vertices[*v].pos = p0 + (p1 - p0) * t;
                }
            }
        }
    }

    /// Moves vertices lying inside a larger subpatch's edge onto that edge
    fn fix_t_vertices(&mut self) {
        let mut order: Vec<_> = self
            .subpatches
            .iter()
            .map(|(sp, s)| {
                let (lo, hi) = self.bounds(sp);
                let span = (hi[0] - lo[0]).max(hi[1] - lo[1]);
                (std::cmp::Reverse(span), s.patch, sp)
            })
            .collect();
        order.sort();
        for (_, p, sp) in order {
            let corners = self.subpatches[sp].corners;
            for e in 0..4 {
                let (a, b) = (corners[e], corners[(e + 1) % 4]);
                let (ua, ub) = (self.vertices[a].uv, self.vertices[b].uv);
                let inner = self.between(p, ua, ub);
                if inner.is_empty() {
                    continue;
                }
                let (pa, pb) = (self.vertices[a].pos, self.vertices[b].pos);
                let (sa, sb) = (edge_param(e, ua), edge_param(e, ub));
                for v in inner {
                    let s = edge_param(e, self.vertices[v].uv);
                    let t = (s - sa) as f32 / (sb - sa) as f32;
                    self.vertices[v].pos = pa + (pb - pa) * t;
                }
            }
        }
    }
}
