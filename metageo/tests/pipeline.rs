use metageo::{Error, MetaBuilder, NodeId, NodeKind, RenderableGeometry};
use nalgebra::{Matrix4, Vector3};

const CREASED: u16 = 0xfff;

fn shifted(x: f32) -> Matrix4<f32> {
    Matrix4::new_translation(&Vector3::new(x, 0.0, 0.0))
}

/// Adds a group holding one unit cube, translated along x
fn cube(b: &mut MetaBuilder, id: u32, creases: u16, x: f32) -> NodeId {
    let g = b.create_blocks();
    let block = b.create_block(g).unwrap();
    b.set_block_info(block, id, 0, creases, 0).unwrap();
    b.set_transform(g, shifted(x)).unwrap();
    g
}

fn assert_bounds(out: &RenderableGeometry, min: [f32; 3], max: [f32; 3]) {
    let bb = out.aabb();
    for i in 0..3 {
        let ok = (bb.min[i] - min[i]).abs() < 1e-4
            && (bb.max[i] - max[i]).abs() < 1e-4;
        assert!(ok, "bad bounds {bb:?}, expected {min:?} - {max:?}");
    }
}

/// Checks that every triangle of a convex result winds outward
fn assert_outward(out: &RenderableGeometry, center: Vector3<f32>) {
    for t in out.triangles() {
        let [a, b, c] = t.map(|i| out.position(i));
        let n = (b - a).cross(&(c - a));
        let mid = (a + b + c) / 3.0;
        assert!(n.dot(&(mid - center)) > 0.0, "inward triangle at {mid:?}");
        for i in t {
            assert!(
                out.normal(i).dot(&n) > 0.0,
                "normal disagrees with winding at {mid:?}"
            );
        }
    }
}

fn total_area(out: &RenderableGeometry) -> f32 {
    out.triangles()
        .map(|t| {
            let [a, b, c] = t.map(|i| out.position(i));
            (b - a).cross(&(c - a)).norm() / 2.0
        })
        .sum()
}

#[test]
fn lone_cube_is_fully_visible() {
    let mut b = MetaBuilder::default();
    let g = cube(&mut b, 3, CREASED, 0.0);
    b.set_root(g).unwrap();
    let out = b.execute().unwrap();

    let surface = &b.geometry().surface;
    assert_eq!(surface.patches.len(), 24);
    assert!(surface.patches.iter().all(|(_, p)| !p.hidden && !p.flipped));
    assert_eq!(out.triangle_count(), 48);
    assert_eq!(out.patches.len(), 1);
    assert_eq!(out.patches[0].id, 3);
    assert_eq!(out.patches[0].count, out.indices.len());
    assert_bounds(&out, [0.0; 3], [1.0; 3]);
    assert_outward(&out, Vector3::repeat(0.5));
    assert!((total_area(&out) - 6.0).abs() < 1e-3);
}

#[test]
fn smooth_cube_faces_outward() {
    let mut b = MetaBuilder::default();
    let g = cube(&mut b, 1, 0, 0.0);
    b.set_root(g).unwrap();
    let out = b.execute().unwrap();

    assert!(b.geometry().surface.patches.iter().all(|(_, p)| !p.hidden));
    assert!(out.triangle_count() > 48);
    let bb = out.aabb();
    assert!(bb.min.iter().all(|v| *v > 0.0 && *v < 0.5), "{bb:?}");
    assert!(bb.max.iter().all(|v| *v < 1.0 && *v > 0.5), "{bb:?}");
    let center = Vector3::repeat(0.5);
    for i in 0..out.vertex_count() {
        let p = out.position(i);
        assert!(out.normal(i).dot(&(p - center)) > 0.0, "inward at {p:?}");
    }
}

#[test]
fn union_with_enclosed_block() {
    let mut lone = MetaBuilder::default();
    let g = cube(&mut lone, 1, CREASED, 0.0);
    lone.set_root(g).unwrap();
    let expected = lone.execute().unwrap();

    // A smaller block inside the first one, in the same fused group
    let mut b = MetaBuilder::default();
    let g = cube(&mut b, 1, CREASED, 0.0);
    let inner = b.create_block(g).unwrap();
    b.set_block_info(inner, 1, 0, CREASED, 0).unwrap();
    b.set_block(
        inner,
        std::array::from_fn(|i| {
            Vector3::new(
                (i & 1) as f32,
                ((i >> 1) & 1) as f32,
                ((i >> 2) & 1) as f32,
            ) * 0.5
                + Vector3::repeat(0.25)
        }),
    )
    .unwrap();
    b.set_attraction(g, 0, 0).unwrap();
    b.set_root(g).unwrap();
    let out = b.execute().unwrap();

    let surface = &b.geometry().surface;
    assert_eq!(surface.patches.len(), 48);
    assert_eq!(surface.patches.iter().filter(|(_, p)| p.hidden).count(), 24);
    assert_eq!(out.triangle_count(), expected.triangle_count());
    assert_eq!(out.aabb(), expected.aabb());
    assert!((total_area(&out) - 6.0).abs() < 1e-3);
}

#[test]
fn difference_of_overlapping_cubes() {
    let mut b = MetaBuilder::default();
    let diff = b.create_difference();
    let base = cube(&mut b, 1, CREASED, 0.0);
    let tool = cube(&mut b, 2, CREASED, 0.5);
    b.add(diff, base).unwrap();
    b.add(diff, tool).unwrap();
    b.set_root(diff).unwrap();
    let out = b.execute().unwrap();

    assert_eq!(out.triangle_count(), 32);
    assert_bounds(&out, [0.0; 3], [0.5, 1.0, 1.0]);
    assert_outward(&out, Vector3::new(0.25, 0.5, 0.5));
    assert!((total_area(&out) - 4.0).abs() < 1e-3);

    // Material ranges are sorted by id and cover the whole index buffer
    let ids: Vec<u32> = out.patches.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(out.patches[0].count, 24 * 3);
    assert_eq!(out.patches[1].start, 24 * 3);
    assert_eq!(out.patches[1].count, 8 * 3);

    // The cut face comes from the subtracted cube, turned inside out
    let flipped: Vec<_> = b
        .geometry()
        .surface
        .patches
        .iter()
        .filter(|(_, p)| !p.hidden && p.flipped)
        .map(|(_, p)| p.id & metageo::block::ID_MASK)
        .collect();
    assert_eq!(flipped, vec![2; 4]);
}

#[test]
fn intersection_of_overlapping_cubes() {
    let mut b = MetaBuilder::default();
    let inter = b.create_intersection();
    let a = cube(&mut b, 1, CREASED, 0.0);
    let c = cube(&mut b, 2, CREASED, 0.5);
    b.add(inter, a).unwrap();
    b.add(inter, c).unwrap();
    b.set_root(inter).unwrap();
    let out = b.execute().unwrap();

    assert_eq!(out.triangle_count(), 32);
    assert_bounds(&out, [0.5, 0.0, 0.0], [1.0; 3]);
    assert_outward(&out, Vector3::new(0.75, 0.5, 0.5));
    assert!((total_area(&out) - 4.0).abs() < 1e-3);
}

#[test]
fn difference_plus_intersection_restores_base() {
    let mut b = MetaBuilder::default();
    let union = b.create_union();
    let diff = b.create_difference();
    let inter = b.create_intersection();
    let base = cube(&mut b, 1, CREASED, 0.0);
    let tool = cube(&mut b, 2, CREASED, 0.5);
    let base2 = cube(&mut b, 1, CREASED, 0.0);
    let tool2 = cube(&mut b, 2, CREASED, 0.5);
    b.add(diff, base).unwrap();
    b.add(diff, tool).unwrap();
    b.add(inter, base2).unwrap();
    b.add(inter, tool2).unwrap();
    b.add(union, diff).unwrap();
    b.add(union, inter).unwrap();
    b.set_root(union).unwrap();
    let out = b.execute().unwrap();

    assert_eq!(out.triangle_count(), 48);
    assert_bounds(&out, [0.0; 3], [1.0; 3]);
    assert_outward(&out, Vector3::repeat(0.5));
    assert!((total_area(&out) - 6.0).abs() < 1e-3);
    assert_eq!(out.patches.len(), 1);
}

/// Combines two creased unit cubes, the second one translated by `offset`
fn boolean(
    kind: NodeKind,
    offset: Vector3<f32>,
) -> (MetaBuilder, RenderableGeometry) {
    let mut b = MetaBuilder::default();
    let op = match kind {
        NodeKind::Union => b.create_union(),
        NodeKind::Intersection => b.create_intersection(),
        NodeKind::Difference => b.create_difference(),
        k => panic!("{k} is not a boolean operation"),
    };
    let base = cube(&mut b, 1, CREASED, 0.0);
    let tool = cube(&mut b, 2, CREASED, 0.0);
    b.set_transform(tool, Matrix4::new_translation(&offset))
        .unwrap();
    b.add(op, base).unwrap();
    b.add(op, tool).unwrap();
    b.set_root(op).unwrap();
    let out = b.execute().unwrap();
    (b, out)
}

/// Signed volume enclosed by the triangles
fn volume(out: &RenderableGeometry) -> f32 {
    out.triangles()
        .map(|t| {
            let [a, b, c] = t.map(|i| out.position(i));
            a.dot(&b.cross(&c)) / 6.0
        })
        .sum()
}

fn material_ids(out: &RenderableGeometry) -> Vec<u32> {
    out.patches.iter().map(|p| p.id).collect()
}

#[test]
fn corner_cut_is_trimmed() {
    let (b, out) =
        boolean(NodeKind::Difference, Vector3::new(0.3, 0.35, 0.4));
    let surface = &b.geometry().surface;
    assert!(surface.patches.iter().any(|(_, p)| p.trimmed));
    assert_bounds(&out, [0.0; 3], [1.0; 3]);

    let v = volume(&out);
    let expected = 1.0 - 0.7 * 0.65 * 0.6;
    assert!((v - expected).abs() < 1e-3, "volume {v}, expected {expected}");
}

#[test]
fn off_grid_offsets_are_trimmed() {
    // None of these cuts falls on the 2x2 patch grid of a creased cube, so
    // every straddling patch has to be split along the other cube's sides
    for offset in [
        Vector3::new(0.125, 0.0, 0.0),
        Vector3::new(0.3, 0.0, 0.0),
        Vector3::new(0.0, 0.3, 0.0),
        Vector3::new(0.0, 0.0, 0.7),
    ] {
        let d = offset.sum();
        for (kind, expected) in [
            (NodeKind::Difference, d),
            (NodeKind::Intersection, 1.0 - d),
            (NodeKind::Union, 1.0 + d),
        ] {
            let (b, out) = boolean(kind, offset);
            let surface = &b.geometry().surface;
            assert!(
                surface.patches.iter().any(|(_, p)| p.trimmed),
                "{kind} at {offset:?} was not trimmed"
            );
            let v = volume(&out);
            assert!(
                (v - expected).abs() < 1e-3,
                "{kind} at {offset:?}: volume {v}, expected {expected}"
            );
        }
    }
}

#[test]
fn off_grid_difference_bounds() {
    let (_, out) = boolean(NodeKind::Difference, Vector3::new(0.3, 0.0, 0.0));
    assert_bounds(&out, [0.0; 3], [0.3, 1.0, 1.0]);

    let (_, out) =
        boolean(NodeKind::Intersection, Vector3::new(0.3, 0.0, 0.0));
    assert_bounds(&out, [0.3, 0.0, 0.0], [1.0; 3]);
    assert_outward(&out, Vector3::new(0.65, 0.5, 0.5));
}

#[test]
fn coincident_boundaries_go_to_the_first_group() {
    let same = Vector3::zeros();

    // The surface is shared, and kept once with the first cube's material
    let (_, out) = boolean(NodeKind::Union, same);
    assert_eq!(out.triangle_count(), 48);
    assert_eq!(material_ids(&out), vec![1]);
    assert!((volume(&out) - 1.0).abs() < 1e-4);

    let (_, out) = boolean(NodeKind::Intersection, same);
    assert_eq!(out.triangle_count(), 48);
    assert_eq!(material_ids(&out), vec![1]);
    assert!((volume(&out) - 1.0).abs() < 1e-4);

    // Nothing is left of a cube minus itself
    let (_, out) = boolean(NodeKind::Difference, same);
    assert_eq!(out.triangle_count(), 0);
    assert!(out.patches.is_empty());

    // Cubes touching face to face lose the shared face on both sides
    let (_, out) = boolean(NodeKind::Union, Vector3::new(1.0, 0.0, 0.0));
    assert_eq!(out.triangle_count(), 80);
    assert_eq!(material_ids(&out), vec![1, 2]);
    assert!((volume(&out) - 2.0).abs() < 1e-4);
}

#[test]
fn mesh_matches_renderable_geometry() {
    let mut b = MetaBuilder::default();
    let diff = b.create_difference();
    let base = cube(&mut b, 1, CREASED, 0.0);
    let tool = cube(&mut b, 2, 0, 0.5);
    b.add(diff, base).unwrap();
    b.add(diff, tool).unwrap();
    b.set_root(diff).unwrap();
    let out = b.execute().unwrap();

    let mesh = b.geometry().create_mesh();
    assert_eq!(mesh.triangles.len(), out.triangle_count());
    assert_eq!(mesh.face_info.len(), mesh.triangles.len());
    assert!(mesh.triangles.iter().all(|t| t.iter().all(|i| {
        *i < mesh.vertices.len()
    })));

    let mut stl = vec![];
    mesh.write_stl(&mut stl).unwrap();
    assert_eq!(stl.len(), 84 + 50 * mesh.triangles.len());
}

#[test]
fn missing_root_is_an_error() {
    let mut b = MetaBuilder::default();
    let g = b.create_blocks();
    b.create_block(g).unwrap();
    assert!(matches!(b.execute(), Err(Error::NoRoot)));
}
