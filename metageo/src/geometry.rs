//! Pipeline driver: from a tree of blocks to a classified surface
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    block::Topology,
    control::update_control_mesh,
    csg::update_csg,
    linker::update_links,
    node::{BlockId, NodeId, Tree},
    surface::Surface,
};

/// Tuning knobs for subdivision and output
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Largest allowed distance between a cell edge's chord and the
    /// surface at the edge midpoint
    pub geometric_error: f32,
    /// Largest allowed distance between the surface at a cell center and
    /// the average of the opposite edge midpoints
    pub detail_error: f32,
    /// Maximum subdivision depth
    pub max_level: u8,
    /// Output vertices closer than this are merged
    pub weld_tolerance: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geometric_error: 0.025,
            detail_error: 0.04,
            max_level: 10,
            weld_tolerance: 2.0 / 4096.0,
        }
    }
}

/// Owns the derived data of one tree: topology, surface, classification
///
/// Everything is rebuilt from scratch on each [`update`](Self::update).
#[derive(Debug, Default)]
pub struct MetaGeometry {
    settings: Settings,
    pub topology: Topology,
    pub surface: Surface,
    /// Classification epoch, bumped for every cast ray
    count: u32,
    groups: Vec<NodeId>,
}

impl MetaGeometry {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Groups taking part in the last update
    pub fn groups(&self) -> &[NodeId] {
        &self.groups
    }

    /// Runs every stage on `tree`, leaving a classified surface
    pub fn update(&mut self, tree: &mut Tree) -> Result<(), Error> {
        let root = tree.validate()?;
        tree.connect_composites();
        tree.update_transforms(root, Matrix4::identity());
        self.groups = tree.collect_groups(root);
        tree.update_bounding_boxes(root);

        self.topology.clear();
        let members: Vec<BlockId> = self
            .groups
            .iter()
            .filter_map(|g| tree.node(*g).ok()?.data.group())
            .flat_map(|g| g.members().iter().copied())
            .collect();
        for &b in &members {
            self.topology.update_topology(b, &mut tree.blocks[b]);
        }
        log::debug!(
            "{} groups, {} blocks, {} faces",
            self.groups.len(),
            members.len(),
            self.topology.faces.len()
        );

        let links = update_links(tree, &mut self.topology, &members);
        log::debug!("{links} linked face pairs");

        update_control_mesh(
            tree,
            &mut self.topology,
            &mut self.surface,
            &self.groups,
        )?;
        self.surface.build_cubics()?;
        self.surface.subdivide(&self.settings)?;
        self.surface.prepare_centers();
        self.surface.build_grid();
        log::debug!(
            "{} patches, {} subpatches, {} vertices",
            self.surface.patches.len(),
            self.surface.subpatches.len(),
            self.surface.vertices.len()
        );

        let trimmed = self.surface.trim(tree);
        log::debug!("{trimmed} trimmed subpatches");

        let hidden =
            update_csg(tree, &mut self.surface, &self.groups, &mut self.count)?;
        log::debug!("{hidden} hidden pieces after {} rays", self.count);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.max_level, 10);
        assert_eq!(s.weld_tolerance, 2.0 / 4096.0);
        let g = MetaGeometry::new(Settings {
            max_level: 3,
            ..s
        });
        assert_eq!(g.settings().max_level, 3);
        assert_eq!(g.settings().geometric_error, 0.025);
    }
}
