//! `metageo` turns a tree of linked hexahedral blocks into a smooth,
//! boundary-evaluated polygon mesh.
//!
//! A **block** is a cube-topology cell with 8 corners.  Blocks live in
//! **groups**; blocks of a group whose sub-groups attract each other fuse
//! along touching faces into one closed solid.  Groups are then combined by
//! a CSG tree of unions, intersections and differences.
//!
//! The pipeline runs in stages, each rebuilt from scratch on every update:
//!
//! - half-edge topology for every block, with subdivided sides split into
//!   grids of sub-faces ([`block`])
//! - linking of coincident faces between touching blocks ([`linker`])
//! - a Catmull-Clark style control mesh with one patch per exterior
//!   half-edge ([`control`])
//! - bicubic approximation, adaptive refinement and crack fixing
//!   ([`surface`])
//! - trimming where solids cross, and ray-parity classification of every
//!   piece against the CSG tree ([`csg`])
//! - renderer-ready buffers ([`render`]) or a plain mesh ([`mesh`])
//!
//! Trees are assembled with a [`MetaBuilder`]:
//! ```
//! use metageo::MetaBuilder;
//! use nalgebra::Matrix4;
//!
//! let mut b = MetaBuilder::default();
//! let diff = b.create_difference();
//! let base = b.create_blocks();
//! let tool = b.create_blocks();
//! for g in [base, tool] {
//!     let cube = b.create_block(g)?;
//!     b.set_block_info(cube, 1, 0, 0xfff, 0)?;
//!     b.add(diff, g)?;
//! }
//! b.set_transform(tool, Matrix4::new_translation(&[0.5, 0.0, 0.0].into()))?;
//! b.set_root(diff)?;
//!
//! let out = b.execute()?;
//! assert_eq!(out.triangle_count(), 32);
//! # Ok::<(), metageo::Error>(())
//! ```
pub mod block;
pub mod control;
pub mod csg;
pub mod geometry;
pub mod hgrid;
pub mod indexed;
pub mod linker;
pub mod mesh;
pub mod node;
pub mod render;
pub mod surface;
pub mod types;

mod error;
pub use error::Error;

pub use geometry::{MetaGeometry, Settings};
pub use mesh::Mesh;
pub use node::{BlockId, MetaBuilder, MetaNode, NodeId, NodeKind, Tree};
pub use render::{IndexBuffer, PatchRange, RenderableGeometry, Triangulation};
