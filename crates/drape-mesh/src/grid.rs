//! Uniform spatial hash used for proximity queries

use ahash::AHashMap;
use glam::{IVec3, Vec3};
use smallvec::SmallVec;

/// Uniform hash grid over point indices
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: AHashMap<IVec3, SmallVec<[u32; 8]>>,
}

impl SpatialGrid {
    /// Create an empty grid
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(f32::EPSILON),
            cells: AHashMap::new(),
        }
    }

    /// Build a grid over a point set
    pub fn from_points(points: &[Vec3], cell_size: f32) -> Self {
        let mut grid = Self::new(cell_size);
        for (i, p) in points.iter().enumerate() {
            grid.insert(i as u32, *p);
        }
        grid
    }

    /// Cell size
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Cell containing `p`
    pub fn cell_of(&self, p: Vec3) -> IVec3 {
        (p / self.cell_size).floor().as_ivec3()
    }

    /// Insert a point index
    pub fn insert(&mut self, index: u32, p: Vec3) {
        let cell = self.cell_of(p);
        self.cells.entry(cell).or_default().push(index);
    }

    /// Remove a point index from its cell
    pub fn remove(&mut self, index: u32, p: Vec3) {
        let cell = self.cell_of(p);
        if let Some(bucket) = self.cells.get_mut(&cell) {
            bucket.retain(|i| *i != index);
            if bucket.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Visit every index in cells overlapping the sphere `(p, radius)`.
    ///
    /// Candidates are not distance filtered.
    pub fn for_each_near(&self, p: Vec3, radius: f32, mut f: impl FnMut(u32)) {
        let lo = self.cell_of(p - Vec3::splat(radius));
        let hi = self.cell_of(p + Vec3::splat(radius));
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    if let Some(bucket) = self.cells.get(&IVec3::new(x, y, z)) {
                        for &i in bucket {
                            f(i);
                        }
                    }
                }
            }
        }
    }

    /// Nearest point within `radius`, using `points` for positions
    pub fn nearest(&self, points: &[Vec3], p: Vec3, radius: f32) -> Option<(u32, f32)> {
        let mut best: Option<(u32, f32)> = None;
        self.for_each_near(p, radius, |i| {
            let d = points[i as usize].distance(p);
            if d <= radius && best.is_none_or(|(_, bd)| d < bd) {
                best = Some((i, d));
            }
        });
        best
    }
}

/// Nearest point by brute force
pub fn nearest_linear(points: &[Vec3], p: Vec3) -> Option<(u32, f32)> {
    points
        .iter()
        .enumerate()
        .map(|(i, q)| (i as u32, q.distance(p)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest() {
        let points = vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.1, 0.0, 0.0)];
        let grid = SpatialGrid::from_points(&points, 0.25);
        let (i, d) = grid.nearest(&points, Vec3::new(0.12, 0.0, 0.0), 0.5).unwrap();
        assert_eq!(i, 2);
        assert!(d < 0.03);
        assert!(grid.nearest(&points, Vec3::new(5.0, 5.0, 5.0), 0.5).is_none());
    }

    #[test]
    fn test_remove() {
        let points = vec![Vec3::ZERO, Vec3::new(0.01, 0.0, 0.0)];
        let mut grid = SpatialGrid::from_points(&points, 1.0);
        grid.remove(0, points[0]);
        let mut seen = Vec::new();
        grid.for_each_near(Vec3::ZERO, 0.5, |i| seen.push(i));
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_nearest_linear() {
        let points = vec![Vec3::X, Vec3::Y, Vec3::Z];
        assert_eq!(nearest_linear(&points, Vec3::new(0.0, 0.9, 0.0)).map(|r| r.0), Some(1));
        assert!(nearest_linear(&[], Vec3::ZERO).is_none());
    }
}
