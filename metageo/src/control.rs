//! Control mesh construction
//!
//! Linked faces are glued together and disappear from the surface; every
//! half-edge of a remaining (exterior) face then becomes one [`Patch`].  The
//! patch control points follow Catmull-Clark rules: a face point, two edge
//! points and a corner point, with sharp rules along creased edges.
use arrayvec::ArrayVec;
use nalgebra::{Vector2, Vector3};

use crate::{
    Error,
    block::{FaceId, HEdgeId, ID_MASK, Topology, VertexId},
    indexed::IndexVec,
    node::{NodeId, Tree},
    surface::{Patch, PatchId, PointId, Surface},
};

/// Texture coordinates of a face's 4 corners
const FACE_UV: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// Upper bound on the number of half-edges around one vertex
const MAX_FAN: usize = 64;

fn link_of(topo: &Topology, h: HEdgeId) -> Result<HEdgeId, Error> {
    topo.hedges[h]
        .link
        .ok_or_else(|| Error::NonManifold(format!("{h:?} is not linked")))
}

fn patch_of(topo: &Topology, h: HEdgeId) -> Result<PatchId, Error> {
    topo.hedges[h]
        .patch
        .ok_or_else(|| Error::NonManifold(format!("{h:?} has no patch")))
}

fn joint(
    topo: &Topology,
    surface: &Surface,
    h: HEdgeId,
) -> Result<Vector3<f32>, Error> {
    let v = topo.hedges[h].vertex;
    let p = topo.vertices[v]
        .joint
        .ok_or_else(|| Error::NonManifold(format!("{v:?} has no joint")))?;
    Ok(surface.points[p])
}

/// Glues a linked face to its partner
///
/// Both faces are split until they carry matching vertices along each
/// edge, then every half-edge is linked to its opposite on the other face.
/// Faces whose half-edges are already linked are left alone.
pub fn connect(topo: &mut Topology, f: FaceId) -> Result<(), Error> {
    let Some(g) = topo.faces[f].link else {
        return Ok(());
    };
    if topo.hedges[topo.faces[f].corners[0]].link.is_some() {
        return Ok(());
    }
    let lc = topo.faces[f].link_corner as usize;
    for c in 0..4 {
        let (fc, gc) = (topo.faces[f].corners, topo.faces[g].corners);
        let (s0, e0) = (fc[c], fc[(c + 1) % 4]);
        let (s1, e1) = (gc[(lc + 7 - c) % 4], gc[(lc + 8 - c) % 4]);

        let flip = |fr: Vec<f32>| -> Vec<f32> {
            fr.into_iter().rev().map(|t| 1.0 - t).collect()
        };
        let fr0 = flip(topo.fractions(s0, e0)?);
        let fr1 = flip(topo.fractions(s1, e1)?);
        topo.split_range(s0, e0, &fr1);
        topo.split_range(s1, e1, &fr0);

        let a = topo.chain(s0, e0)?;
        let b = topo.chain(s1, e1)?;
        if a.len() != b.len() {
            return Err(Error::NonManifold(format!(
                "edges of {f:?} and {g:?} split differently"
            )));
        }
        for (&ha, &hb) in a.iter().zip(b.iter().rev()) {
            topo.hedges[ha].link = Some(hb);
            topo.hedges[hb].link = Some(ha);
        }
    }
    Ok(())
}

/// Builds the control patches of every group into `surface`
///
/// The surface is cleared first.  Blocks must have their topology built and
/// their faces linked.
pub fn update_control_mesh(
    tree: &Tree,
    topo: &mut Topology,
    surface: &mut Surface,
    groups: &[NodeId],
) -> Result<(), Error> {
    surface.clear();
    let faces: Vec<FaceId> = groups
        .iter()
        .filter_map(|g| tree.node(*g).ok()?.data.group())
        .flat_map(|g| g.members().iter())
        .flat_map(|b| tree.block(*b).faces().iter())
        .copied()
        .collect();
    for &f in &faces {
        connect(topo, f)?;
    }

    let loops = faces
        .iter()
        .filter(|f| topo.faces[**f].link.is_none())
        .map(|&f| Ok((f, topo.face_loop(f)?)))
        .collect::<Result<Vec<_>, Error>>()?;

    // Glue exterior half-edges to each other, stepping over linked faces
    for (_, hs) in &loops {
        for &h in hs {
            if topo.hedges[h].link.is_some() {
                continue;
            }
            let mut n = topo.hedges[h].neighbor;
            let mut steps = 0;
            while topo.faces[topo.hedges[n].face].link.is_some() {
                n = topo.hedges[link_of(topo, n)?].neighbor;
                steps += 1;
                if steps > MAX_FAN {
                    return Err(Error::NonManifold(format!(
                        "no exterior half-edge across from {h:?}"
                    )));
                }
            }
            topo.hedges[h].link = Some(n);
            topo.hedges[n].link = Some(h);
        }
    }

    // Weld coincident vertices into joints
    for (_, hs) in &loops {
        for &h in hs {
            if topo.vertices[topo.hedges[h].vertex].joint.is_some() {
                continue;
            }
            let mut fan: ArrayVec<VertexId, MAX_FAN> = ArrayVec::new();
            let mut n = h;
            for step in 0.. {
                if step >= MAX_FAN {
                    return Err(Error::NonManifold(format!(
                        "fan around {h:?} does not close"
                    )));
                }
                let v = topo.hedges[n].vertex;
                if !fan.contains(&v) {
                    fan.push(v);
                }
                n = topo.hedges[link_of(topo, n)?].next;
                if n == h {
                    break;
                }
            }
            let pos = if let [v] = fan.as_slice() {
                topo.vertices[*v].pos
            } else {
                fan.iter().map(|v| topo.vertices[*v].pos).sum::<Vector3<f32>>()
                    / fan.len() as f32
            };
            let p = surface.create_point(pos);
            for v in fan {
                topo.vertices[v].joint = Some(p);
            }
        }
    }

    // One patch per exterior half-edge, sharing the face point
    let mut control: IndexVec<[Option<PointId>; 4], PatchId> =
        IndexVec::default();
    for (f, hs) in &loops {
        let face = &topo.faces[*f];
        let (corners, block_id, side) = (face.corners, face.block, face.side);
        let block = tree.block(block_id);
        let id = (block.id & ID_MASK) | ((side as u32) << 29);
        let pts = hs
            .iter()
            .map(|h| joint(topo, surface, *h))
            .collect::<Result<Vec<_>, _>>()?;
        let center = surface.create_point(
            pts.iter().sum::<Vector3<f32>>() / pts.len() as f32,
        );

        let mut segment = 0;
        for &h in hs {
            let uv = std::array::from_fn(|k| {
                let [u, v] = FACE_UV[(segment + 2 + k) % 4];
                Vector2::new(u, v)
            });
            let p = surface.create_patch(Patch::new(
                [center; 4],
                id,
                uv,
                block_id,
                block.group,
                h,
            ));
            let q = control.push([Some(center), None, None, None]);
            debug_assert_eq!(p, q);
            topo.hedges[h].patch = Some(p);
            if segment < 3 && topo.hedges[h].next == corners[segment + 1] {
                segment += 1;
            }
        }
    }

    let center = |surface: &Surface, p: PatchId| {
        surface.points[surface.patches[p].control[0]]
    };
    for (_, hs) in &loops {
        for &h in hs {
            let l = link_of(topo, h)?;
            let next = topo.hedges[h].next;
            let ln = topo.hedges[l].next;
            let crease = topo.hedges[h].crease || topo.hedges[l].crease;
            let (p, pl) = (patch_of(topo, h)?, patch_of(topo, l)?);
            let (pn, pln) = (patch_of(topo, next)?, patch_of(topo, ln)?);
            surface.neighbors(p, 2, pln, 1, crease);
            surface.neighbors(p, 3, pn, 0, false);

            let jh = joint(topo, surface, h)?;
            let jn = joint(topo, surface, next)?;
            if control[p][3].is_none() {
                let pos = if crease {
                    (jh + jn) / 2.0
                } else {
                    (center(surface, p) + center(surface, pl) + jh + jn) / 4.0
                };
                let e = Some(surface.create_point(pos));
                control[p][3] = e;
                control[pn][1] = e;
                control[pl][3] = e;
                control[pln][1] = e;
            }

            if control[p][2].is_none() {
                let corner = surface.create_point(jh);
                control[p][2] = Some(corner);
                let mut sum = center(surface, p) + jn;
                let mut count = 1;
                let mut creases = usize::from(crease);
                let mut sharp = if crease { jn } else { Vector3::zeros() };
                let mut n = ln;
                while n != h {
                    if count > MAX_FAN {
                        return Err(Error::NonManifold(format!(
                            "ring around {h:?} does not close"
                        )));
                    }
                    let pn = patch_of(topo, n)?;
                    control[pn][2] = Some(corner);
                    let nl = link_of(topo, n)?;
                    let j = joint(topo, surface, topo.hedges[n].next)?;
                    sum += center(surface, pn) + j;
                    count += 1;
                    if topo.hedges[n].crease || topo.hedges[nl].crease {
                        creases += 1;
                        sharp += j;
                    }
                    n = topo.hedges[nl].next;
                }
                let k = count as f32;
                surface.points[corner] = match creases {
                    0 | 1 => sum / (k * k) + jh * ((k - 2.0) / k),
                    2 => (sharp + jh * 6.0) / 8.0,
                    _ => jh,
                };
            }
        }
    }

    for (p, c) in control.iter() {
        let [Some(a), Some(b), Some(c), Some(d)] = *c else {
            return Err(Error::NonManifold(format!(
                "{p:?} is missing control points"
            )));
        };
        surface.patches[p].control = [a, b, c, d];
    }
    log::debug!(
        "control mesh: {} exterior faces, {} patches, {} points",
        loops.len(),
        surface.patches.len(),
        surface.points.len()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{MetaBuilder, linker::update_links, node::BlockId};
    use nalgebra::Matrix4;

    /// Runs the stages up to and including the control mesh
    fn build(builder: MetaBuilder, root: NodeId) -> (Tree, Topology, Surface) {
        let mut tree = builder.tree;
        let groups = tree.collect_groups(root);
        tree.update_transforms(root, Matrix4::identity());
        let members: Vec<BlockId> = groups
            .iter()
            .flat_map(|g| {
                tree.nodes[*g].data.group().unwrap().members().to_vec()
            })
            .collect();
        let mut topo = Topology::default();
        for &b in &members {
            topo.update_topology(b, &mut tree.blocks[b]);
        }
        update_links(&tree, &mut topo, &members);
        let mut surface = Surface::default();
        update_control_mesh(&tree, &mut topo, &mut surface, &groups).unwrap();
        (tree, topo, surface)
    }

    fn check_neighbors(surface: &Surface) {
        for (p, patch) in surface.patches.iter() {
            for (e, n) in patch.neighbors.iter().enumerate() {
                let (q, f) = n.unwrap();
                assert_eq!(
                    surface.patches[q].neighbors[f as usize],
                    Some((p, e as u8))
                );
                assert_eq!(
                    surface.patches[q].is_creased(f as usize),
                    patch.is_creased(e)
                );
            }
            for c in 0..4 {
                surface.ring(p, c).unwrap();
            }
        }
    }

    fn two_cubes(creases: u16, sub_a: u32, sub_b: u32) -> (MetaBuilder, NodeId) {
        let mut b = MetaBuilder::default();
        let g = b.create_blocks();
        let x = b.create_block(g).unwrap();
        let y = b.create_block(g).unwrap();
        let shifted = std::array::from_fn(|i| {
            Vector3::new((i & 1) as f32 + 1.0, ((i >> 1) & 1) as f32, (i >> 2) as f32)
        });
        b.set_block(y, shifted).unwrap();
        b.set_block_info(x, 1, 0, creases, sub_a).unwrap();
        b.set_block_info(y, 1, 0, creases, sub_b).unwrap();
        b.set_attraction(g, 0, 0).unwrap();
        (b, g)
    }

    #[test]
    fn creased_cube() {
        let mut b = MetaBuilder::default();
        let g = b.create_blocks();
        let cube = b.create_block(g).unwrap();
        b.set_block_info(cube, 3, 0, 0xfff, 0).unwrap();
        let (_, _, surface) = build(b, g);

        assert_eq!(surface.patches.len(), 24);
        // 8 joints, 6 face points, 12 edge points, 8 corner points
        assert_eq!(surface.points.len(), 34);
        check_neighbors(&surface);
        for patch in surface.patches.values() {
            assert_eq!(patch.id & ID_MASK, 3);
            let corner = surface.points[patch.control[2]];
            assert!(corner.iter().all(|x| *x == 0.0 || *x == 1.0));
            let edge = surface.points[patch.control[3]];
            assert_eq!(edge.iter().filter(|x| **x == 0.5).count(), 1);
            assert!(patch.is_creased(1) && patch.is_creased(2));
            assert!(!patch.is_creased(0) && !patch.is_creased(3));
        }
    }

    #[test]
    fn smooth_seam_is_shared() {
        let (b, g) = two_cubes(0, 0, 0);
        let (_, topo, surface) = build(b, g);
        assert_eq!(surface.patches.len(), 40);
        // 12 joints, 10 face points, 20 edge points, 12 corner points
        assert_eq!(surface.points.len(), 54);
        check_neighbors(&surface);

        // Joints on the seam are welded across both blocks
        let seam: Vec<_> = topo
            .vertices
            .values()
            .filter(|v| v.pos.x == 1.0)
            .collect();
        assert_eq!(seam.len(), 8);
        for v in &seam {
            let twin = seam.iter().find(|w| w.pos == v.pos && w.t != v.t);
            assert_eq!(twin.unwrap().joint, v.joint);
        }

        // Smooth corner points are pulled inside the hull
        for patch in surface.patches.values() {
            let c = surface.points[patch.control[2]];
            assert!(c.x > 0.0 && c.x < 2.0);
            assert!(c.y > 0.0 && c.y < 1.0);
            assert!(c.z > 0.0 && c.z < 1.0);
        }
    }

    #[test]
    fn subdivided_seam() {
        let (b, g) = two_cubes(0xfff, 0x5 << 4, 0x5);
        let (_, topo, surface) = build(b, g);
        // Each block keeps 4 patches on its far side and 5 on each of the
        // 4 sides whose edge along the seam was split
        assert_eq!(surface.patches.len(), 2 * (4 + 4 * 5));
        check_neighbors(&surface);
        // Exterior half-edges are glued head to tail
        for h in topo.hedges.values() {
            if h.patch.is_some() {
                let l = h.link.unwrap();
                assert_eq!(topo.pos(l), topo.vertices[topo.hedges[h.next].vertex].pos);
            }
        }
    }
}
