//! Links coincident faces of neighboring blocks
//!
//! Two faces are linked when they face each other, sit within each other's
//! linking radius, and each one's center projects onto the other.  A face
//! holds at most one link; a closer candidate replaces a farther one, and a
//! final pass drops links that ended up one-sided.
use nalgebra::Vector3;
use ordered_float::OrderedFloat;

use crate::{
    block::{FaceId, Topology, quad_center, quad_direction},
    hgrid::HGrid,
    node::{BlockId, Tree},
    types::{Ray, ray_quad},
};

/// How far behind its origin a linking ray may still hit
const LINK_TMIN: f32 = -0.1;

/// Links faces across every pair of nearby blocks, returning the number of
/// linked face pairs
pub fn update_links(tree: &Tree, topo: &mut Topology, blocks: &[BlockId]) -> usize {
    let grid = HGrid::with_boxes(blocks.iter().map(|&b| {
        let bb = tree.block(b).aabb();
        (b, bb.grow(bb.extent() * 0.25))
    }));
    let mut pairs = vec![];
    grid.find_all_collisions(|a, b| pairs.push((a.min(b), a.max(b))));
    pairs.sort();
    for (a, b) in pairs {
        blocks_overlap(tree, topo, a, b);
    }

    let mut linked = 0;
    for f in topo.faces.keys() {
        let Some(l) = topo.faces[f].link else {
            continue;
        };
        if topo.faces[l].link != Some(f) {
            log::warn!("dropping one-sided link from {f:?} to {l:?}");
            topo.faces[f].link = None;
        } else if f < l {
            linked += 1;
        }
    }
    linked
}

/// Faces built on one side of a block
fn side_faces<'a>(
    tree: &'a Tree,
    topo: &'a Topology,
    b: BlockId,
    side: usize,
) -> impl Iterator<Item = FaceId> + 'a {
    tree.block(b)
        .faces()
        .iter()
        .copied()
        .filter(move |f| topo.faces[*f].side as usize == side)
}

/// Face on a side whose center is nearest to `pos`
fn nearest_face(
    tree: &Tree,
    topo: &Topology,
    b: BlockId,
    side: usize,
    pos: &Vector3<f32>,
) -> Option<FaceId> {
    side_faces(tree, topo, b, side)
        .min_by_key(|f| OrderedFloat((topo.face_center(*f) - pos).norm_squared()))
}

/// Tests every pair of sides between two blocks, linking those that touch
pub fn blocks_overlap(tree: &Tree, topo: &mut Topology, a: BlockId, b: BlockId) {
    let (ba, bb) = (tree.block(a), tree.block(b));
    if ba.group != bb.group {
        return;
    }
    let Some(group) = tree.group_of(a) else {
        return;
    };
    if !group.are_attracted(ba.sub_group, bb.sub_group) {
        return;
    }
    let (ca, cb) = (ba.center(), bb.center());

    for i in 0..6 {
        let qa = ba.side_quad(i);
        let (da, csa) = (quad_direction(&qa), quad_center(&qa));
        for j in 0..6 {
            let qb = bb.side_quad(j);
            let (db, csb) = (quad_direction(&qb), quad_center(&qb));
            if da.dot(&db) >= 0.0 {
                continue;
            }
            let ray_a = Ray { origin: csa, dir: da };
            let ray_b = Ray { origin: csb, dir: db };

            match (ba.subdivision(i) == 0, bb.subdivision(j) == 0) {
                (true, true) => {
                    if (csb - (ca + csa) / 2.0).dot(&da) < 0.0
                        || (csa - (cb + csb) / 2.0).dot(&db) < 0.0
                    {
                        continue;
                    }
                    if ray_quad(&ray_a, &qb, LINK_TMIN).is_none()
                        || ray_quad(&ray_b, &qa, LINK_TMIN).is_none()
                    {
                        continue;
                    }
                    let fa = side_faces(tree, topo, a, i).next();
                    let fb = side_faces(tree, topo, b, j).next();
                    if let (Some(fa), Some(fb)) = (fa, fb) {
                        link(topo, fa, fb);
                    }
                }
                (true, false) => {
                    let Some(hit) = ray_quad(&ray_a, &qb, LINK_TMIN) else {
                        continue;
                    };
                    let fa = side_faces(tree, topo, a, i).next();
                    let fb = nearest_face(tree, topo, b, j, &hit);
                    if let (Some(fa), Some(fb)) = (fa, fb) {
                        link(topo, fa, fb);
                    }
                }
                (false, true) => {
                    let Some(hit) = ray_quad(&ray_b, &qa, LINK_TMIN) else {
                        continue;
                    };
                    let fb = side_faces(tree, topo, b, j).next();
                    let fa = nearest_face(tree, topo, a, i, &hit);
                    if let (Some(fa), Some(fb)) = (fa, fb) {
                        link(topo, fb, fa);
                    }
                }
                (false, false) => {
                    // Match each sub-face to the one it projects onto
                    let subs: Vec<FaceId> = side_faces(tree, topo, a, i).collect();
                    for fa in subs {
                        let ray = Ray {
                            origin: topo.face_center(fa),
                            dir: da,
                        };
                        let Some(hit) = ray_quad(&ray, &qb, LINK_TMIN) else {
                            continue;
                        };
                        if let Some(fb) = nearest_face(tree, topo, b, j, &hit) {
                            link(topo, fa, fb);
                        }
                    }
                }
            }
        }
    }
}

/// Links two faces, unless either already has a closer partner
///
/// Returns `true` if the link was made.
pub fn link(topo: &mut Topology, fa: FaceId, fb: FaceId) -> bool {
    let (ca, cb) = (topo.face_center(fa), topo.face_center(fb));
    let dist = (ca - cb).norm_squared();
    if dist > topo.face_force(fa) + topo.face_force(fb) {
        return false;
    }
    for f in [fa, fb] {
        let face = &topo.faces[f];
        if face.link.is_some() && dist > face.link_dist {
            return false;
        }
    }

    let (qa, qb) = (topo.face_quad(fa), topo.face_quad(fb));
    let mut best = f32::INFINITY;
    let mut corner = 0;
    for (i, pa) in qa.iter().enumerate() {
        for (j, pb) in qb.iter().enumerate() {
            let d = (pb - pa).norm_squared();
            if d < best {
                best = d;
                corner = ((i + j) % 4) as u8;
            }
        }
    }
    for (f, other) in [(fa, fb), (fb, fa)] {
        let face = &mut topo.faces[f];
        face.link = Some(other);
        face.link_dist = dist;
        face.link_corner = corner;
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::MetaBuilder;
    use nalgebra::Matrix4;

    /// Two unit cubes side by side along x, in one group
    fn pair(sub_a: u32, sub_b: u32, attract: bool) -> (Tree, Topology, [BlockId; 2]) {
        let mut builder = MetaBuilder::default();
        let g = builder.create_blocks();
        let a = builder.create_block(g).unwrap();
        let b = builder.create_block(g).unwrap();
        let shifted = std::array::from_fn(|i| {
            Vector3::new((i & 1) as f32 + 1.0, ((i >> 1) & 1) as f32, (i >> 2) as f32)
        });
        builder.set_block(b, shifted).unwrap();
        builder.set_block_info(a, 1, 0, 0, sub_a).unwrap();
        builder.set_block_info(b, 2, 0, 0, sub_b).unwrap();
        if attract {
            builder.set_attraction(g, 0, 0).unwrap();
        }
        let mut tree = builder.tree;
        tree.collect_groups(g);
        tree.update_transforms(g, Matrix4::identity());
        let mut topo = Topology::default();
        for id in [a, b] {
            topo.update_topology(id, &mut tree.blocks[id]);
        }
        (tree, topo, [a, b])
    }

    fn check_reciprocal(topo: &Topology) {
        for (f, face) in topo.faces.iter() {
            if let Some(l) = face.link {
                assert_eq!(topo.faces[l].link, Some(f), "one-sided link at {f:?}");
            }
        }
    }

    #[test]
    fn touching_cubes_link() {
        let (tree, mut topo, [a, b]) = pair(0, 0, true);
        assert_eq!(update_links(&tree, &mut topo, &[a, b]), 1);
        check_reciprocal(&topo);

        let fa = tree.block(a).faces()[1];
        let fb = tree.block(b).faces()[0];
        assert_eq!(topo.faces[fa].link, Some(fb));

        // Corner c of one face meets corner (link_corner - c) of the other
        let lc = topo.faces[fa].link_corner as usize;
        let (qa, qb) = (topo.face_quad(fa), topo.face_quad(fb));
        for c in 0..4 {
            assert_eq!(qa[c], qb[(lc + 4 - c) % 4]);
        }
    }

    #[test]
    fn unattracted_cubes_stay_apart() {
        let (tree, mut topo, blocks) = pair(0, 0, false);
        assert_eq!(update_links(&tree, &mut topo, &blocks), 0);
        assert!(topo.faces.values().all(|f| f.link.is_none()));
    }

    #[test]
    fn subdivided_sides_link_pairwise() {
        // Side 1 of `a` and side 0 of `b` are both split 2×2
        let (tree, mut topo, [a, b]) = pair(0x5 << 4, 0x5, true);
        assert_eq!(update_links(&tree, &mut topo, &[a, b]), 4);
        check_reciprocal(&topo);
        for &fa in tree.block(a).faces() {
            if topo.faces[fa].side != 1 {
                continue;
            }
            let fb = topo.faces[fa].link.unwrap();
            assert_eq!(topo.faces[fb].block, b);
            let d = topo.face_center(fa) - topo.face_center(fb);
            assert!(d.norm() < 1e-6);
        }
    }

    #[test]
    fn nearest_link_wins() {
        let (tree, mut topo, [a, b]) = pair(0, 0, true);
        let fa = tree.block(a).faces()[1];
        let fb = tree.block(b).faces()[0];
        let far = tree.block(b).faces()[1];
        assert!(link(&mut topo, fa, far));
        assert!(link(&mut topo, fa, fb));
        assert!(!link(&mut topo, fa, far));
        assert_eq!(topo.faces[fa].link, Some(fb));
    }
}
