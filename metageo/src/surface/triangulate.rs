//! Triangulation of subpatches, and sample points for classification
use nalgebra::Vector3;

use super::{SVertex, SVertexId, SubpatchId, Surface, mid_uv};
use crate::types::triangle_normal;

/// Barycentric sample positions, tried in order until one gives a clean ray
pub(crate) const SAMPLES: [[f32; 3]; 5] = [
    [0.25, 0.5, 0.25],
    [0.3, 0.45, 0.25],
    [0.2, 0.35, 0.45],
    [0.4, 0.25, 0.35],
    [0.15, 0.6, 0.25],
];

/// Candidate classification points inside a list of triangles
///
/// Every sample of the first usable triangle comes first, then those of the
/// next one, and so on.  Each point comes with its triangle's unit normal.
pub(crate) fn sample_triangles(
    tris: &[[Vector3<f32>; 3]],
) -> Vec<(Vector3<f32>, Vector3<f32>)> {
    let mut out = vec![];
    for tri in tris {
        let Some(n) = triangle_normal(tri).try_normalize(0.0) else {
            continue;
        };
        for w in SAMPLES {
            out.push((tri[0] * w[0] + tri[1] * w[1] + tri[2] * w[2], n));
        }
    }
    out
}

impl Surface {
    /// Boundary vertices of a subpatch, counter-clockwise from its first
    /// corner, including any vertex that lies along one of its edges
    pub fn polygon(&self, sp: SubpatchId) -> Vec<SVertexId> {
        let s = &self.subpatches[sp];
        let mut out = Vec::with_capacity(4);
        for e in 0..4 {
            let (a, b) = (s.corners[e], s.corners[(e + 1) % 4]);
            out.push(a);
            out.extend(self.between(
                s.patch,
                self.vertices[a].uv,
                self.vertices[b].uv,
            ));
        }
        out
    }

    /// Adds a fan center to every subpatch with more than 4 boundary
    /// vertices
    pub(crate) fn prepare_centers(&mut self) {
        for sp in self.subpatches.keys() {
            if self.polygon(sp).len() <= 4 {
                continue;
            }
            let (lo, hi) = self.bounds(sp);
            let uv = mid_uv(lo, hi);
            let p = self.subpatches[sp].patch;
            let (pos, normal) = self.eval(p, uv);
            let v = self.vertices.push(SVertex { uv, pos, normal });
            self.subpatches[sp].center = Some(v);
        }
    }

    /// Triangles covering a subpatch
    ///
    /// A plain quad is cut along whichever diagonal keeps both halves facing
    /// the same way; anything else is fanned around the subpatch center.
    pub fn triangles(&self, sp: SubpatchId) -> Vec<[SVertexId; 3]> {
        let poly = self.polygon(sp);
        match (poly.as_slice(), self.subpatches[sp].center) {
            (&[a, b, c, d], _) => {
                let [pa, pb, pc, pd] = [a, b, c, d].map(|v| self.vertices[v].pos);
                let n0 = (pb - pa).cross(&(pc - pa));
                let n1 = (pc - pa).cross(&(pd - pa));
                if n0.dot(&n1) > 0.0 {
                    vec![[a, b, c], [a, c, d]]
                } else {
                    vec![[d, a, b], [d, b, c]]
                }
            }
            (_, Some(center)) => (0..poly.len())
                .map(|i| [center, poly[i], poly[(i + 1) % poly.len()]])
                .collect(),
            (_, None) => (1..poly.len().saturating_sub(1))
                .map(|i| [poly[0], poly[i], poly[i + 1]])
                .collect(),
        }
    }

    pub fn triangle_positions(&self, sp: SubpatchId) -> Vec<[Vector3<f32>; 3]> {
        self.triangles(sp)
            .into_iter()
            .map(|t| t.map(|v| self.vertices[v].pos))
            .collect()
    }

    /// A point and unit normal inside the subpatch's first triangle
    pub fn compute_point(
        &self,
        sp: SubpatchId,
    ) -> Option<(Vector3<f32>, Vector3<f32>)> {
        self.samples(sp).into_iter().next()
    }

    /// Every candidate classification point of a subpatch
    pub(crate) fn samples(
        &self,
        sp: SubpatchId,
    ) -> Vec<(Vector3<f32>, Vector3<f32>)> {
        sample_triangles(&self.triangle_positions(sp))
    }
}
