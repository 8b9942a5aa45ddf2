use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;
use nalgebra::{Matrix4, Vector3};

use metageo::{MetaBuilder, NodeId, RenderableGeometry, Settings};

/// Builds a sample block scene and exports its surface
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,

    /// Scene to build
    #[clap(short, long, value_enum, default_value_t = Scene::Difference)]
    scene: Scene,

    #[clap(flatten)]
    settings: SubdivisionSettings,

    /// Number of times to run the pipeline (for benchmarking)
    #[clap(short = 'N', default_value_t = 1)]
    n: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Writes the visible surface as a binary STL
    Mesh {
        /// Name of a `.stl` file to write
        #[clap(short, long)]
        out: Option<PathBuf>,
    },
    /// Writes renderable geometry as a `bincode` blob
    Dump {
        /// Name of the file to write
        #[clap(short, long)]
        out: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
enum Scene {
    /// One cube with every edge creased
    Cube,
    /// One cube with smooth edges
    Rounded,
    /// A row of three fused blocks, with a subdivided seam
    Slab,
    /// Union of two overlapping rounded cubes
    Union,
    /// A creased cube minus a rounded one
    Difference,
    /// Intersection of two creased cubes
    Intersection,
}

#[derive(Parser)]
struct SubdivisionSettings {
    /// Maximum chord error along patch edges
    #[clap(long, default_value_t = Settings::default().geometric_error)]
    geometric_error: f32,

    /// Maximum flatness error at patch centers
    #[clap(long, default_value_t = Settings::default().detail_error)]
    detail_error: f32,

    /// Maximum subdivision depth
    #[clap(long, default_value_t = Settings::default().max_level)]
    max_level: u8,
}

impl From<&SubdivisionSettings> for Settings {
    fn from(s: &SubdivisionSettings) -> Self {
        Settings {
            geometric_error: s.geometric_error,
            detail_error: s.detail_error,
            max_level: s.max_level,
            ..Settings::default()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

const CREASED: u16 = 0xfff;

fn shifted(x: f32) -> Matrix4<f32> {
    Matrix4::new_translation(&Vector3::new(x, 0.0, 0.0))
}

/// Adds a group holding one unit cube, translated along x
fn cube(
    b: &mut MetaBuilder,
    id: u32,
    creases: u16,
    x: f32,
) -> Result<NodeId> {
    let g = b.create_blocks();
    let block = b.create_block(g)?;
    b.set_block_info(block, id, 0, creases, 0)?;
    b.set_transform(g, shifted(x))?;
    Ok(g)
}

fn build_scene(scene: Scene, settings: Settings) -> Result<MetaBuilder> {
    let mut b = MetaBuilder::new(settings);
    let root = match scene {
        Scene::Cube => cube(&mut b, 1, CREASED, 0.0)?,
        Scene::Rounded => cube(&mut b, 1, 0, 0.0)?,
        Scene::Slab => {
            let g = b.create_blocks();
            for i in 0..3 {
                let block = b.create_block(g)?;
                let x = i as f32;
                b.set_block(
                    block,
                    std::array::from_fn(|c| {
                        Vector3::new(
                            x + (c & 1) as f32,
                            ((c >> 1) & 1) as f32,
                            ((c >> 2) & 1) as f32,
                        )
                    }),
                )?;
                // 2x2 cells on both faces of the first seam
                let sub = match i {
                    0 => 0x5 << 4,
                    1 => 0x5,
                    _ => 0,
                };
                b.set_block_info(block, 1 + i, 0, 0, sub)?;
            }
            b.set_attraction(g, 0, 0)?;
            g
        }
        Scene::Union | Scene::Difference | Scene::Intersection => {
            let op = match scene {
                Scene::Union => b.create_union(),
                Scene::Difference => b.create_difference(),
                _ => b.create_intersection(),
            };
            let base_creases = if scene == Scene::Union { 0 } else { CREASED };
            let tool_creases =
                if scene == Scene::Intersection { CREASED } else { 0 };
            let base = cube(&mut b, 1, base_creases, 0.0)?;
            let tool = cube(&mut b, 2, tool_creases, 0.5)?;
            b.add(op, base)?;
            b.add(op, tool)?;
            op
        }
    };
    b.set_root(root)?;
    Ok(b)
}

fn run(scene: Scene, settings: Settings, n: usize) -> Result<MetaBuilder> {
    let mut b = build_scene(scene, settings)?;
    let start = Instant::now();
    let mut out = RenderableGeometry::default();
    for _ in 0..n {
        out = b.execute()?;
    }
    info!(
        "Built {scene} {n}x at {:?} ms/iter",
        start.elapsed().as_micros() as f64 / 1000.0 / (n.max(1) as f64)
    );
    info!(
        "{} vertices, {} triangles, {} material ranges",
        out.vertex_count(),
        out.triangle_count(),
        out.patches.len()
    );
    Ok(b)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();

    let args = Args::parse();
    let settings = Settings::from(&args.settings);
    let b = run(args.scene, settings, args.n)?;

    match args.cmd {
        Command::Mesh { out } => {
            let mesh = b.geometry().create_mesh();
            if let Some(out) = out {
                info!("Writing STL to {out:?}");
                mesh.write_stl(&mut std::fs::File::create(out)?)?;
            }
        }
        Command::Dump { out } => {
            let geometry = b.geometry().compute_renderable_geometry();
            info!("Writing geometry to {out:?}");
            let file = std::io::BufWriter::new(std::fs::File::create(out)?);
            bincode::serialize_into(file, &geometry)?;
        }
    }

    Ok(())
}
