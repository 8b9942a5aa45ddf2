//! Bicubic approximation of a control patch
use std::f32::consts::TAU;

use nalgebra::{Vector2, Vector3};

use super::{PatchId, Surface};
use crate::Error;

/// Below this length, the tangent cross product is treated as degenerate
const NORMAL_EPSILON: f32 = 1e-5;

/// Bicubic Bezier patch, with control points stored row by row (`v` major)
#[derive(Clone, Debug)]
pub struct CubicPatch {
    b: [Vector3<f32>; 16],
}

/// Limit point and the two tangent points around one patch corner
struct CornerStencil {
    limit: Vector3<f32>,
    /// Toward the next corner
    t0: Vector3<f32>,
    /// Toward the previous corner
    t1: Vector3<f32>,
    /// Interior point next to the corner
    face: Vector3<f32>,
}

impl CubicPatch {
    pub fn new(surface: &Surface, p: PatchId) -> Result<Self, Error> {
        let c: [CornerStencil; 4] = [
            corner(surface, p, 0)?,
            corner(surface, p, 1)?,
            corner(surface, p, 2)?,
            corner(surface, p, 3)?,
        ];
        #[rustfmt::skip]
        let b = [
            c[0].limit, c[0].t0, c[1].t1, c[1].limit,
            c[0].t1, c[0].face, c[1].face, c[1].t0,
            c[3].t0, c[3].face, c[2].face, c[2].t1,
            c[3].limit, c[3].t1, c[2].t0, c[2].limit,
        ];
        Ok(Self { b })
    }

    /// Control point at row `j`, column `i`
    pub fn control(&self, i: usize, j: usize) -> Vector3<f32> {
        self.b[j * 4 + i]
    }

    /// Returns position and unit normal at `uv`
    pub fn eval(&self, uv: Vector2<f32>) -> (Vector3<f32>, Vector3<f32>) {
        let (uc, ud) = bernstein(uv.x);
        let (vc, vd) = bernstein(uv.y);
        let mut pos = Vector3::zeros();
        let mut su = Vector3::zeros();
        let mut sv = Vector3::zeros();
        for j in 0..4 {
            for i in 0..4 {
                let b = self.b[j * 4 + i];
                pos += b * (uc[i] * vc[j]);
                su += b * (ud[i] * vc[j]);
                sv += b * (uc[i] * vd[j]);
            }
        }
        let mut n = su.cross(&sv);
        if n.norm() < NORMAL_EPSILON {
            n = (self.b[10] - self.b[15]).cross(&su);
        }
        if n.norm() < NORMAL_EPSILON {
            n = (self.b[15] - self.b[0]).cross(&(self.b[12] - self.b[3]));
        }
        let normal = n.try_normalize(0.0).unwrap_or_else(Vector3::z);
        (pos, normal)
    }
}

/// Cubic Bernstein weights and their derivatives
fn bernstein(t: f32) -> ([f32; 4], [f32; 4]) {
    let s = 1.0 - t;
    (
        [s * s * s, 3.0 * t * s * s, 3.0 * t * t * s, t * t * t],
        [
            -3.0 * s * s,
            3.0 * s * s - 6.0 * t * s,
            6.0 * t * s - 3.0 * t * t,
            3.0 * t * t,
        ],
    )
}

fn corner(surface: &Surface, p: PatchId, c: usize) -> Result<CornerStencil, Error> {
    let ring = surface.ring(p, c)?;
    let v = surface.points[surface.patches[p].control[c]];
    let n = ring.len();
    let nf = n as f32;

    let f: Vec<Vector3<f32>> = (0..n)
        .map(|i| {
            v * (4.0 / 9.0)
                + (ring[i].edge + ring[(i + 1) % n].edge) * (2.0 / 9.0)
                + ring[i].diag / 9.0
        })
        .collect();
    let creased: Vec<usize> = (0..n).filter(|&i| ring[i].crease).collect();

    let (limit, t0, t1) = if creased.is_empty() {
        let limit = (f.iter().sum::<Vector3<f32>>() * (9.0 / nf)
            + v * (nf - 4.0))
            / (nf + 5.0);
        let mut e0 = Vector3::zeros();
        let mut e1 = Vector3::zeros();
        for i in 0..n {
            let e = (f[i] + f[(i + n - 1) % n]) / 2.0;
            let a = TAU * i as f32 / nf;
            e0 += e * a.cos();
            e1 += e * a.sin();
        }
        let (sn, cn) = (TAU / nf).sin_cos();
        let lambda = if n == 4 {
            0.5
        } else {
            (cn + 5.0 + ((cn + 9.0) * (cn + 1.0)).max(0.0).sqrt()) / 16.0
        };
        let k = 1.0 / (lambda * nf);
        let (e0, e1) = (e0 * k, e1 * k);
        (limit, limit + e0, limit + e0 * cn + e1 * sn)
    } else {
        let limit = match creased.as_slice() {
            [_] => {
                let sum: Vector3<f32> =
                    ring.iter().map(|r| v * nf + r.edge * 4.0 + r.diag).sum();
                sum / (nf * nf + 5.0 * nf)
            }
            [a, b] => (v * 4.0 + ring[*a].edge + ring[*b].edge) / 6.0,
            _ => v,
        };
        let t0 = if ring[0].crease {
            (v * 2.0 + ring[0].edge) / 3.0
        } else {
            (f[0] + f[n - 1]) / 2.0
        };
        let t1 = if ring[1 % n].crease {
            (v * 2.0 + ring[1 % n].edge) / 3.0
        } else {
            (f[0] + f[1 % n]) / 2.0
        };
        (limit, t0, t1)
    };
    Ok(CornerStencil {
        limit,
        t0,
        t1,
        face: f[0],
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn flat() -> CubicPatch {
        let b = std::array::from_fn(|k| {
            Vector3::new((k % 4) as f32 / 3.0, (k / 4) as f32 / 3.0, 0.0)
        });
        CubicPatch { b }
    }

    #[test]
    fn bernstein_partition() {
        for t in [0.0, 0.2, 0.5, 0.9, 1.0] {
            let (w, d) = bernstein(t);
            assert_relative_eq!(w.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
            assert_relative_eq!(d.iter().sum::<f32>(), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn flat_patch_is_linear() {
        let c = flat();
        for (u, v) in [(0.0, 0.0), (0.25, 0.5), (1.0, 0.3), (1.0, 1.0)] {
            let (p, n) = c.eval(Vector2::new(u, v));
            assert_relative_eq!(p, Vector3::new(u, v, 0.0), epsilon = 1e-6);
            assert_relative_eq!(n, Vector3::z(), epsilon = 1e-6);
        }
    }

    #[test]
    fn degenerate_corner_normal() {
        // Collapse the v = 0 row onto one point
        let mut c = flat();
        for i in 0..4 {
            c.b[i] = Vector3::zeros();
        }
        let (_, n) = c.eval(Vector2::new(0.5, 0.0));
        assert!((n.norm() - 1.0).abs() < 1e-5);
        assert!(n.z > 0.9);
    }
}
