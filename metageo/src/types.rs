//! Small geometric primitives shared across the pipeline
use nalgebra::Vector3;

/// Offset applied to classification rays, so that the surface being
/// classified is hit at `t ≈ SERROR` rather than at the origin
pub const SERROR: f32 = 1e-4;

/// Barycentric margin below which a hit counts as touching a triangle edge
const EDGE_EPSILON: f32 = 1e-6;

/// Relative threshold below which a ray is considered parallel to a triangle
const PARALLEL_EPSILON: f32 = 1e-7;

/// Axis-aligned bounding box
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Builds an inverted box, which contains nothing and absorbs any union
    pub fn empty() -> Self {
        Self {
            min: Vector3::repeat(f32::INFINITY),
            max: Vector3::repeat(f32::NEG_INFINITY),
        }
    }

    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    pub fn from_points<'a, I>(pts: I) -> Self
    where
        I: IntoIterator<Item = &'a Vector3<f32>>,
    {
        let mut out = Self::empty();
        for p in pts {
            out.include(p);
        }
        out
    }

    pub fn include(&mut self, p: &Vector3<f32>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Returns a copy grown by `amount` on every side
    pub fn grow(&self, amount: f32) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb {
            min: self.min.add_scalar(-amount),
            max: self.max.add_scalar(amount),
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.max[i] < self.min[i])
    }

    /// Largest side length (zero for an empty box)
    pub fn extent(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            (self.max - self.min).max()
        }
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, p: &Vector3<f32>) -> bool {
        (0..3).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Half-line starting at `origin`
#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: Vector3<f32>,
    /// Unit direction
    pub dir: Vector3<f32>,
}

/// Result of a ray-triangle test
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RayHit {
    Miss,
    /// Clean crossing of the triangle interior
    Hit { t: f32, back_facing: bool },
    /// Crossing within a hair of a triangle edge, which may be reported by
    /// the adjacent triangle as well
    Edge { t: f32, back_facing: bool },
    /// The ray runs inside the triangle's plane and touches it
    Grazing,
}

/// Moller-Trumbore intersection, with explicit reporting of the degenerate
/// cases that make parity counting unreliable.
pub fn ray_triangle(ray: &Ray, tri: &[Vector3<f32>; 3]) -> RayHit {
    let [a, b, c] = tri;
    let e1 = b - a;
    let e2 = c - a;
    let n = e1.cross(&e2);
    let area = n.norm();
    if area == 0.0 {
        return RayHit::Miss;
    }

    let pvec = ray.dir.cross(&e2);
    let det = e1.dot(&pvec);
    if det.abs() <= PARALLEL_EPSILON * area {
        let dist = (ray.origin - a).dot(&n) / area;
        let scale = e1.norm().max(e2.norm());
        if dist.abs() > PARALLEL_EPSILON * scale.max(1.0) * 10.0 {
            return RayHit::Miss;
        }
        let bounds = Aabb::from_points(tri.iter()).grow(EDGE_EPSILON);
        return if ray_aabb(ray, &bounds) {
            RayHit::Grazing
        } else {
            RayHit::Miss
        };
    }

    let inv = 1.0 / det;
    let tvec = ray.origin - a;
    let u = tvec.dot(&pvec) * inv;
    let qvec = tvec.cross(&e1);
    let v = ray.dir.dot(&qvec) * inv;
    let w = 1.0 - u - v;
    if u < -EDGE_EPSILON || v < -EDGE_EPSILON || w < -EDGE_EPSILON {
        return RayHit::Miss;
    }
    let t = e2.dot(&qvec) * inv;
    if t < 0.0 {
        return RayHit::Miss;
    }
    let back_facing = ray.dir.dot(&n) > 0.0;
    if u < EDGE_EPSILON || v < EDGE_EPSILON || w < EDGE_EPSILON {
        RayHit::Edge { t, back_facing }
    } else {
        RayHit::Hit { t, back_facing }
    }
}

/// Ray against the quad split into `(q0, q1, q2)` and `(q0, q2, q3)`,
/// accepting hits down to `tmin` behind the origin
///
/// Returns the hit position.  Triangle edges are inclusive, so a ray through
/// the shared diagonal is not lost between the two halves.
pub fn ray_quad(
    ray: &Ray,
    q: &[Vector3<f32>; 4],
    tmin: f32,
) -> Option<Vector3<f32>> {
    [[q[0], q[1], q[2]], [q[0], q[2], q[3]]]
        .iter()
        .find_map(|tri| {
            let [a, b, c] = tri;
            let e1 = b - a;
            let e2 = c - a;
            let pvec = ray.dir.cross(&e2);
            let det = e1.dot(&pvec);
            if det.abs() <= PARALLEL_EPSILON * e1.cross(&e2).norm() {
                return None;
            }
            let inv = 1.0 / det;
            let tvec = ray.origin - a;
            let u = tvec.dot(&pvec) * inv;
            let qvec = tvec.cross(&e1);
            let v = ray.dir.dot(&qvec) * inv;
            if u < -EDGE_EPSILON || v < -EDGE_EPSILON || u + v > 1.0 + EDGE_EPSILON
            {
                return None;
            }
            let t = e2.dot(&qvec) * inv;
            (t >= tmin).then(|| ray.origin + ray.dir * t)
        })
}

/// Slab test for a ray against a box, for `t >= 0`
pub fn ray_aabb(ray: &Ray, b: &Aabb) -> bool {
    let mut t0 = 0.0f32;
    let mut t1 = f32::INFINITY;
    for i in 0..3 {
        if ray.dir[i] == 0.0 {
            if ray.origin[i] < b.min[i] || ray.origin[i] > b.max[i] {
                return false;
            }
        } else {
            let inv = 1.0 / ray.dir[i];
            let mut near = (b.min[i] - ray.origin[i]) * inv;
            let mut far = (b.max[i] - ray.origin[i]) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            t0 = t0.max(near);
            t1 = t1.min(far);
            if t0 > t1 {
                return false;
            }
        }
    }
    true
}

/// Checks whether the open segment `p → q` pierces the interior of `tri`
fn segment_crosses(
    p: &Vector3<f32>,
    q: &Vector3<f32>,
    tri: &[Vector3<f32>; 3],
) -> bool {
    const EPS: f32 = 1e-5;
    let [a, b, c] = tri;
    let e1 = b - a;
    let e2 = c - a;
    let dir = q - p;
    let pvec = dir.cross(&e2);
    let det = e1.dot(&pvec);
    let area = e1.cross(&e2).norm();
    if area == 0.0 || det.abs() <= PARALLEL_EPSILON * area * dir.norm() {
        return false;
    }
    let inv = 1.0 / det;
    let tvec = p - a;
    let u = tvec.dot(&pvec) * inv;
    let qvec = tvec.cross(&e1);
    let v = dir.dot(&qvec) * inv;
    let t = e2.dot(&qvec) * inv;
    u > EPS && v > EPS && u + v < 1.0 - EPS && t > EPS && t < 1.0 - EPS
}

/// Checks whether two triangles properly cross each other
///
/// Coplanar overlaps and contacts along shared edges or vertices are not
/// reported.
pub fn tri_tri_intersect(a: &[Vector3<f32>; 3], b: &[Vector3<f32>; 3]) -> bool {
    (0..3).any(|i| segment_crosses(&a[i], &a[(i + 1) % 3], b))
        || (0..3).any(|i| segment_crosses(&b[i], &b[(i + 1) % 3], a))
}

/// Checks whether the segment `p → q` lies in the plane of `tri` (within
/// [`SERROR`]) and runs through its interior
fn segment_in_plane(
    p: &Vector3<f32>,
    q: &Vector3<f32>,
    tri: &[Vector3<f32>; 3],
) -> bool {
    let [a, b, c] = tri;
    let Some(n) = triangle_normal(tri).try_normalize(0.0) else {
        return false;
    };
    if n.dot(&(p - a)).abs() > SERROR || n.dot(&(q - a)).abs() > SERROR {
        return false;
    }
    // Clip the segment against each edge, pulled inward by SERROR
    let (mut t0, mut t1) = (0.0f32, 1.0f32);
    for (s, e) in [(a, b), (b, c), (c, a)] {
        let Some(inward) = n.cross(&(e - s)).try_normalize(0.0) else {
            return false;
        };
        let dp = inward.dot(&(p - s)) - SERROR;
        let dq = inward.dot(&(q - s)) - SERROR;
        match (dp > 0.0, dq > 0.0) {
            (false, false) => return false,
            (true, true) => (),
            (true, false) => t1 = t1.min(dp / (dp - dq)),
            (false, true) => t0 = t0.max(dp / (dp - dq)),
        }
    }
    (t1 - t0) * (q - p).norm() > SERROR
}

/// Checks whether two triangles cross, or whether an edge of one lies in
/// the other's plane and runs through its interior
///
/// The second case is how two solids with a coplanar side meet: the side of
/// one touches the other along a line without piercing it.  Coplanar and
/// parallel pairs are not reported.
pub fn tri_tri_contact(a: &[Vector3<f32>; 3], b: &[Vector3<f32>; 3]) -> bool {
    if tri_tri_intersect(a, b) {
        return true;
    }
    let (Some(na), Some(nb)) = (
        triangle_normal(a).try_normalize(0.0),
        triangle_normal(b).try_normalize(0.0),
    ) else {
        return false;
    };
    if na.cross(&nb).norm() < 1e-4 {
        return false;
    }
    (0..3).any(|i| segment_in_plane(&a[i], &a[(i + 1) % 3], b))
        || (0..3).any(|i| segment_in_plane(&b[i], &b[(i + 1) % 3], a))
}

/// Unnormalized triangle normal, following counter-clockwise winding
pub fn triangle_normal(tri: &[Vector3<f32>; 3]) -> Vector3<f32> {
    (tri[1] - tri[0]).cross(&(tri[2] - tri[0]))
}

/// Index of the component with the largest magnitude
///
/// Ties go to the later axis.
pub fn max_axis(v: &Vector3<f32>) -> usize {
    let mut best = 0;
    for i in 1..3 {
        if v[i].abs() >= v[best].abs() {
            best = i;
        }
    }
    best
}
