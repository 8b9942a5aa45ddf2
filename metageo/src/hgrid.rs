//! Uniform hash grid for broad-phase overlap queries
use std::collections::HashMap;

use nalgebra::Vector3;

use crate::types::Aabb;

/// Objects spanning more cells than this are stored in an overflow list
const MAX_CELLS: usize = 4096;

type Cell = (i32, i32, i32);

/// Hash grid over axis-aligned boxes
///
/// Every object is registered in each cell that its box touches.  Pair
/// queries only report a pair from the lowest cell that both boxes share,
/// so each overlapping pair is seen exactly once.
#[derive(Debug)]
pub struct HGrid<T> {
    cell: f32,
    objects: Vec<(T, Aabb)>,
    cells: HashMap<Cell, Vec<usize>>,
    /// Objects too large to rasterize, tested against everything
    overflow: Vec<usize>,
}

impl<T: Copy> Default for HGrid<T> {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl<T: Copy> HGrid<T> {
    pub fn new(cell: f32) -> Self {
        Self {
            cell: if cell > 0.0 && cell.is_finite() { cell } else { 1.0 },
            objects: vec![],
            cells: HashMap::new(),
            overflow: vec![],
        }
    }

    /// Builds a grid whose cells match the mean box size
    pub fn with_boxes<I: IntoIterator<Item = (T, Aabb)>>(iter: I) -> Self {
        let items: Vec<_> = iter.into_iter().collect();
        let sizes: Vec<f32> = items
            .iter()
            .map(|(_, b)| b.extent())
            .filter(|s| *s > 0.0)
            .collect();
        let cell = if sizes.is_empty() {
            1.0
        } else {
            sizes.iter().sum::<f32>() / sizes.len() as f32
        };
        let mut out = Self::new(cell);
        for (t, b) in items {
            out.add(t, b);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.cells.clear();
        self.overflow.clear();
    }

    fn cell_of(&self, p: &Vector3<f32>) -> Cell {
        let f = |x: f32| (x / self.cell).floor() as i32;
        (f(p.x), f(p.y), f(p.z))
    }

    fn cell_range(&self, b: &Aabb) -> (Cell, Cell) {
        (self.cell_of(&b.min), self.cell_of(&b.max))
    }

    fn cell_count((lo, hi): (Cell, Cell)) -> usize {
        let n = |a: i32, b: i32| (b as i64 - a as i64 + 1).max(0) as usize;
        n(lo.0, hi.0)
            .saturating_mul(n(lo.1, hi.1))
            .saturating_mul(n(lo.2, hi.2))
    }

    fn for_cells(
        (lo, hi): (Cell, Cell),
        mut f: impl FnMut(Cell),
    ) {
        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    f((x, y, z))
                }
            }
        }
    }

    pub fn add(&mut self, t: T, aabb: Aabb) {
        let i = self.objects.len();
        self.objects.push((t, aabb));
        if aabb.is_empty() {
            return;
        }
        let range = self.cell_range(&aabb);
        if Self::cell_count(range) > MAX_CELLS {
            self.overflow.push(i);
        } else {
            Self::for_cells(range, |c| self.cells.entry(c).or_default().push(i));
        }
    }

    /// Calls `f` once for every pair of objects whose boxes overlap
    pub fn find_all_collisions(&self, mut f: impl FnMut(T, T)) {
        let mut keys: Vec<&Cell> = self.cells.keys().collect();
        keys.sort();
        for key in keys {
            let items = &self.cells[key];
            for (n, &i) in items.iter().enumerate() {
                for &j in &items[n + 1..] {
                    let (a, ba) = &self.objects[i];
                    let (b, bb) = &self.objects[j];
                    if !ba.overlaps(bb) {
                        continue;
                    }
                    let (la, _) = self.cell_range(ba);
                    let (lb, _) = self.cell_range(bb);
                    let lowest = (la.0.max(lb.0), la.1.max(lb.1), la.2.max(lb.2));
                    if lowest == *key {
                        f(*a, *b);
                    }
                }
            }
        }
        for (n, &i) in self.overflow.iter().enumerate() {
            let (a, ba) = &self.objects[i];
            for (j, (b, bb)) in self.objects.iter().enumerate() {
                if j == i || ba.is_empty() || !ba.overlaps(bb) {
                    continue;
                }
                // Overflow pairs are reported by the earlier overflow object
                if let Some(m) = self.overflow.iter().position(|o| *o == j) {
                    if m < n {
                        continue;
                    }
                }
                f(*a, *b);
            }
        }
    }

    /// Calls `f` once for every object whose box overlaps `region`
    pub fn find_collisions(&self, region: &Aabb, mut f: impl FnMut(T)) {
        if region.is_empty() {
            return;
        }
        let mut seen = vec![false; self.objects.len()];
        let mut check = |i: usize| {
            if !std::mem::replace(&mut seen[i], true) {
                let (t, b) = &self.objects[i];
                if b.overlaps(region) {
                    f(*t);
                }
            }
        };
        let range = self.cell_range(region);
        if Self::cell_count(range) > self.cells.len() {
            for items in self.cells.values() {
                items.iter().for_each(|&i| check(i));
            }
        } else {
            Self::for_cells(range, |c| {
                if let Some(items) = self.cells.get(&c) {
                    items.iter().for_each(|&i| check(i));
                }
            });
        }
        self.overflow.iter().for_each(|&i| check(i));
    }
}
