//! Renderer-ready buffers built from the classified surface
use std::collections::HashMap;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    block::ID_MASK,
    geometry::MetaGeometry,
    surface::{PatchId, Surface},
    types::Aabb,
};

/// Index buffer stored at the narrowest width that fits every vertex
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IndexBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Default for IndexBuffer {
    fn default() -> Self {
        IndexBuffer::U8(vec![])
    }
}

impl IndexBuffer {
    /// Packs `indices`, choosing a width from the vertex count
    pub fn new(indices: &[u32], vertex_count: usize) -> Self {
        if vertex_count < 1 << 8 {
            IndexBuffer::U8(indices.iter().map(|i| *i as u8).collect())
        } else if vertex_count < 1 << 16 {
            IndexBuffer::U16(indices.iter().map(|i| *i as u16).collect())
        } else {
            IndexBuffer::U32(indices.to_vec())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexBuffer::U8(v) => v.len(),
            IndexBuffer::U16(v) => v.len(),
            IndexBuffer::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of one index, in bytes
    pub fn width(&self) -> usize {
        match self {
            IndexBuffer::U8(..) => 1,
            IndexBuffer::U16(..) => 2,
            IndexBuffer::U32(..) => 4,
        }
    }

    pub fn get(&self, i: usize) -> Option<u32> {
        match self {
            IndexBuffer::U8(v) => v.get(i).map(|x| u32::from(*x)),
            IndexBuffer::U16(v) => v.get(i).map(|x| u32::from(*x)),
            IndexBuffer::U32(v) => v.get(i).copied(),
        }
    }

    pub fn to_vec(&self) -> Vec<u32> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

/// A contiguous run of indices sharing one material id
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRange {
    /// First index
    pub start: usize,
    /// Number of indices
    pub count: usize,
    pub id: u32,
}

/// Interleaved vertex buffer, index buffer and per-material ranges
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderableGeometry {
    /// Position, texture coordinate and normal of each vertex
    pub vertices: Vec<f32>,
    pub indices: IndexBuffer,
    pub patches: Vec<PatchRange>,
}

impl RenderableGeometry {
    /// Number of floats per vertex
    pub const STRIDE: usize = 8;

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / Self::STRIDE
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn position(&self, i: usize) -> Vector3<f32> {
        let v = &self.vertices[i * Self::STRIDE..];
        Vector3::new(v[0], v[1], v[2])
    }

    pub fn tex(&self, i: usize) -> Vector2<f32> {
        let v = &self.vertices[i * Self::STRIDE..];
        Vector2::new(v[3], v[4])
    }

    pub fn normal(&self, i: usize) -> Vector3<f32> {
        let v = &self.vertices[i * Self::STRIDE..];
        Vector3::new(v[5], v[6], v[7])
    }

    /// Vertex indices of every triangle
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        (0..self.triangle_count()).map(|t| {
            std::array::from_fn(|k| {
                self.indices.get(t * 3 + k).unwrap_or_default() as usize
            })
        })
    }

    /// Box around every referenced vertex
    pub fn aabb(&self) -> Aabb {
        let mut out = Aabb::empty();
        for t in self.triangles() {
            for v in t {
                out.include(&self.position(v));
            }
        }
        out
    }
}

/// Separate arrays produced by [`MetaGeometry::triangulate`]
#[derive(Clone, Debug, Default)]
pub struct Triangulation {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub indices: Vec<u32>,
    /// Full patch id (material and block side) of each triangle
    pub face_info: Vec<u32>,
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug)]
struct OutVertex {
    pos: Vector3<f32>,
    tex: Vector2<f32>,
    normal: Vector3<f32>,
}

/// Accumulates welded vertices and triangles
struct Emitter {
    tolerance: f32,
    welds: HashMap<[i64; 8], u32>,
    vertices: Vec<OutVertex>,
    indices: Vec<u32>,
    face_info: Vec<u32>,
}

impl Emitter {
    fn new(tolerance: f32) -> Self {
        Self {
            tolerance: tolerance.max(f32::EPSILON),
            welds: HashMap::new(),
            vertices: vec![],
            indices: vec![],
            face_info: vec![],
        }
    }

    fn vertex(&mut self, v: OutVertex) -> u32 {
        let q = |x: f32, scale: f32| (x / scale).round() as i64;
        let t = self.tolerance;
        let key = [
            q(v.pos.x, t),
            q(v.pos.y, t),
            q(v.pos.z, t),
            q(v.tex.x, t),
            q(v.tex.y, t),
            q(v.normal.x, 1e-3),
            q(v.normal.y, 1e-3),
            q(v.normal.z, 1e-3),
        ];
        let next = self.vertices.len() as u32;
        *self.welds.entry(key).or_insert_with(|| {
            self.vertices.push(v);
            next
        })
    }

    fn triangle(&mut self, tri: [OutVertex; 3], flipped: bool, id: u32) {
        let mut tri = tri;
        if flipped {
            tri.swap(1, 2);
            for v in &mut tri {
                v.normal = -v.normal;
            }
        }
        for v in tri {
            let i = self.vertex(v);
            self.indices.push(i);
        }
        self.face_info.push(id);
    }

    /// Emits the visible triangles of one patch
    fn patch(&mut self, surface: &Surface, p: PatchId) {
        let patch = &surface.patches[p];
        if patch.hidden {
            return;
        }
        let out = |uv: Vector2<f32>, pos, normal| OutVertex {
            pos,
            tex: patch.tex(uv),
            normal,
        };
        for &sp in &patch.subpatches {
            let sub = &surface.subpatches[sp];
            if patch.trimmed && sub.trimming.is_none() && sub.hidden {
                continue;
            }
            let flipped = if patch.trimmed {
                sub.flipped
            } else {
                patch.flipped
            };
            match &sub.trimming {
                None => {
                    for tri in surface.triangles(sp) {
                        let tri = tri.map(|v| {
                            let v = &surface.vertices[v];
                            out(v.param(), v.pos, v.normal)
                        });
                        self.triangle(tri, flipped, patch.id);
                    }
                }
                Some(trim) => {
                    for l in trim.loops.iter().filter(|l| !l.hidden) {
                        for tri in l.triangles() {
                            let tri = tri.map(|i| {
                                let t = &l.points[i];
                                out(t.uv, t.pos, t.normal)
                            });
                            self.triangle(tri, l.flipped, patch.id);
                        }
                    }
                }
            }
        }
    }
}

impl MetaGeometry {
    /// Visible patches, sorted by material id
    fn sorted_patches(&self) -> Vec<PatchId> {
        let mut out: Vec<PatchId> = self
            .surface
            .patches
            .iter()
            .filter(|(_, p)| !p.hidden)
            .map(|(i, _)| i)
            .collect();
        out.sort_by_key(|p| (self.surface.patches[*p].id & ID_MASK, *p));
        out
    }

    fn emit(&self) -> (Emitter, Vec<PatchRange>) {
        let mut e = Emitter::new(self.settings().weld_tolerance);
        let mut ranges: Vec<PatchRange> = vec![];
        for p in self.sorted_patches() {
            let start = e.indices.len();
            e.patch(&self.surface, p);
            let count = e.indices.len() - start;
            if count == 0 {
                continue;
            }
            let id = self.surface.patches[p].id & ID_MASK;
            match ranges.last_mut() {
                Some(r) if r.id == id => r.count += count,
                _ => ranges.push(PatchRange { start, count, id }),
            }
        }
        (e, ranges)
    }

    /// Builds interleaved buffers for every visible piece of the surface
    pub fn compute_renderable_geometry(&self) -> RenderableGeometry {
        let (e, patches) = self.emit();
        let vertices = e
            .vertices
            .iter()
            .flat_map(|v| {
                [
                    v.pos.x, v.pos.y, v.pos.z, v.tex.x, v.tex.y, v.normal.x,
                    v.normal.y, v.normal.z,
                ]
            })
            .collect();
        let indices = IndexBuffer::new(&e.indices, e.vertices.len());
        log::debug!(
            "{} vertices, {} triangles, {} ranges",
            e.vertices.len(),
            e.indices.len() / 3,
            patches.len()
        );
        RenderableGeometry {
            vertices,
            indices,
            patches,
        }
    }

    /// Exports visible triangles as separate arrays, with the full patch id
    /// of each triangle
    pub fn triangulate(&self) -> Triangulation {
        let (e, _) = self.emit();
        Triangulation {
            positions: e.vertices.iter().map(|v| v.pos).collect(),
            normals: e.vertices.iter().map(|v| v.normal).collect(),
            indices: e.indices,
            face_info: e.face_info,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_width() {
        for (count, width) in [(100, 1), (255, 1), (300, 2), (65535, 2), (70000, 4)]
        {
            let idx: Vec<u32> = (0..count as u32).collect();
            let buf = IndexBuffer::new(&idx, count);
            assert_eq!(buf.width(), width, "{count} vertices");
            assert_eq!(buf.len(), count);
            assert_eq!(buf.get(count - 1), Some(count as u32 - 1));
        }
        assert!(IndexBuffer::default().is_empty());
    }

    #[test]
    fn welding_merges_duplicates() {
        let mut e = Emitter::new(2.0 / 4096.0);
        let v = |x: f32| OutVertex {
            pos: Vector3::new(x, 0.0, 0.0),
            tex: Vector2::zeros(),
            normal: Vector3::z(),
        };
        let a = e.vertex(v(0.0));
        let b = e.vertex(v(1e-5));
        let c = e.vertex(v(1.0));
        assert_eq!(a, b);
        assert_ne!(a, c);

        // Flipping reverses winding and turns normals over
        e.triangle([v(0.0), v(1.0), v(2.0)], true, 5);
        assert_eq!(&e.indices[..], &[2, 3, 4]);
        assert_eq!(e.vertices[3].pos.x, 2.0);
        assert!(e.vertices[2..].iter().all(|v| v.normal == -Vector3::z()));
        assert_eq!(e.face_info, vec![5]);
    }
}
