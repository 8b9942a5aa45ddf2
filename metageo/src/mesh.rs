//! Plain indexed triangle mesh, for export
use std::io::{BufWriter, Write};

use nalgebra::Vector3;

use crate::{Error, geometry::MetaGeometry};

/// An indexed 3D mesh
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub triangles: Vec<Vector3<usize>>,
    pub vertices: Vec<Vector3<f32>>,
    /// Full patch id of each triangle
    pub face_info: Vec<u32>,
}

impl Mesh {
    /// Writes a binary STL to the given output
    pub fn write_stl<F: Write>(&self, out: &mut F) -> Result<(), Error> {
        let mut out = BufWriter::new(out);
        const HEADER: &[u8] = b"Binary STL exported by metageo";
        static_assertions::const_assert!(HEADER.len() <= 80);
        out.write_all(HEADER)?;
        out.write_all(&[0u8; 80 - HEADER.len()])?;
        out.write_all(&(self.triangles.len() as u32).to_le_bytes())?;
        for t in &self.triangles {
            let a = self.vertices[t.x];
            let b = self.vertices[t.y];
            let c = self.vertices[t.z];
            let normal = (b - a).cross(&(c - a)).try_normalize(0.0);
            for p in &normal.unwrap_or_else(Vector3::zeros) {
                out.write_all(&p.to_le_bytes())?;
            }
            for v in t {
                for p in &self.vertices[*v] {
                    out.write_all(&p.to_le_bytes())?;
                }
            }
            out.write_all(&[0u8; std::mem::size_of::<u16>()])?; // attributes
        }
        out.flush()?;
        Ok(())
    }
}

impl MetaGeometry {
    /// Builds a mesh from every visible piece of the surface
    pub fn create_mesh(&self) -> Mesh {
        let t = self.triangulate();
        Mesh {
            triangles: t
                .indices
                .chunks_exact(3)
                .map(|c| Vector3::new(c[0], c[1], c[2]).map(|i| i as usize))
                .collect(),
            vertices: t.positions,
            face_info: t.face_info,
        }
    }
}
