use glam::Vec3;

use crate::grid::{is_valid, Grid, GridError, INVALID};

/// A coarse-to-fine stack of grids. Level 0 holds the full resolution and
/// every following level halves both dimensions.
#[derive(Debug, Clone)]
pub struct Pyramid<T> {
    levels: Vec<Grid<T>>,
}

impl<T> Pyramid<T> {
    /// Create a pyramid from explicit levels, finest first.
    ///
    /// Every level must be half the size (rounded down) of the previous one.
    pub fn new(levels: Vec<Grid<T>>) -> Result<Self, GridError> {
        for pair in levels.windows(2) {
            let (fine, coarse) = (&pair[0], &pair[1]);
            if coarse.width() != fine.width() / 2 || coarse.height() != fine.height() / 2 {
                return Err(GridError::ShapeMismatch(
                    fine.width() / 2,
                    fine.height() / 2,
                    coarse.width(),
                    coarse.height(),
                ));
            }
        }
        Ok(Self { levels })
    }

    /// The number of levels.
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// The grid at `level`, where 0 is the finest.
    #[inline]
    pub fn level(&self, level: usize) -> Option<&Grid<T>> {
        self.levels.get(level)
    }

    /// Iterate over the levels, finest first.
    pub fn iter(&self) -> impl Iterator<Item = &Grid<T>> {
        self.levels.iter()
    }

    /// Whether `other` has the same number of levels with matching shapes.
    pub fn same_shape<U>(&self, other: &Pyramid<U>) -> bool {
        self.num_levels() == other.num_levels()
            && self
                .levels
                .iter()
                .zip(other.levels.iter())
                .all(|(a, b)| a.width() == b.width() && a.height() == b.height())
    }

    /// The scale factor of `level` relative to level 0, i.e. `2^-level`.
    #[inline]
    pub fn scale(level: usize) -> f32 {
        0.5f32.powi(level as i32)
    }
}

impl Pyramid<Vec3> {
    /// Build a point pyramid by averaging the valid points of each 2x2 block.
    ///
    /// A coarse cell is invalid when none of its four parents is valid.
    pub fn from_points(points: Grid<Vec3>, num_levels: usize) -> Self {
        Self::build(points, num_levels, |mean| mean)
    }

    /// Build a normal pyramid by averaging and renormalizing the valid normals of
    /// each 2x2 block.
    pub fn from_normals(normals: Grid<Vec3>, num_levels: usize) -> Self {
        Self::build(normals, num_levels, |mean| {
            let n = mean.normalize_or_zero();
            if n == Vec3::ZERO {
                INVALID
            } else {
                n
            }
        })
    }

    fn build(base: Grid<Vec3>, num_levels: usize, finish: impl Fn(Vec3) -> Vec3) -> Self {
        let mut levels = Vec::with_capacity(num_levels.max(1));
        levels.push(base);

        while levels.len() < num_levels {
            let Some(fine) = levels.last() else {
                break;
            };
            let coarse = downsample_valid_mean(fine, &finish);
            levels.push(coarse);
        }

        Self { levels }
    }
}

fn downsample_valid_mean(fine: &Grid<Vec3>, finish: &impl Fn(Vec3) -> Vec3) -> Grid<Vec3> {
    let (width, height) = (fine.width() / 2, fine.height() / 2);
    Grid::from_fn(width, height, |x, y| {
        let mut sum = Vec3::ZERO;
        let mut num_valid = 0;
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            if let Some(&p) = fine.get(2 * x + dx, 2 * y + dy) {
                if is_valid(p) {
                    sum += p;
                    num_valid += 1;
                }
            }
        }
        if num_valid == 0 {
            INVALID
        } else {
            finish(sum / num_valid as f32)
        }
    })
}
