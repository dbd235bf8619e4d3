use glam::Vec3;

/// Errors raised by organized grid containers.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum GridError {
    /// The data length does not match `width * height`.
    #[error("Data length ({0}) does not match the grid size ({1}x{2})")]
    InvalidDataLength(usize, usize, usize),

    /// A region of interest does not fit inside the grid.
    #[error("Region {x},{y} {width}x{height} is outside of a {grid_width}x{grid_height} grid")]
    RoiOutOfBounds {
        /// Left column of the region.
        x: usize,
        /// Top row of the region.
        y: usize,
        /// Region width.
        width: usize,
        /// Region height.
        height: usize,
        /// Grid width.
        grid_width: usize,
        /// Grid height.
        grid_height: usize,
    },

    /// Two grids that must share a shape do not.
    #[error("Grid shapes do not match: {0}x{1} vs {2}x{3}")]
    ShapeMismatch(usize, usize, usize, usize),
}

/// A row-major 2D grid, the container for organized point clouds, normal
/// fields, depth images and correspondence maps.
///
/// Point and normal grids mark missing entries with NaN, see [`is_valid`].
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T> Grid<T> {
    /// Create a grid from row-major data.
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self, GridError> {
        if data.len() != width * height {
            return Err(GridError::InvalidDataLength(data.len(), width, height));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Create a grid by evaluating `f(x, y)` at every cell.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Create a 1xN grid from an unorganized list.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            width: data.len(),
            height: 1,
            data,
        }
    }

    /// The number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// The number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// The number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the grid has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The row-major data.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The row-major data, mutably.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// The cell at column `x` and row `y`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x < self.width && y < self.height {
            self.data.get(y * self.width + x)
        } else {
            None
        }
    }

    /// The mutable cell at column `x` and row `y`.
    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut T> {
        if x < self.width && y < self.height {
            self.data.get_mut(y * self.width + x)
        } else {
            None
        }
    }

    /// Borrow the whole grid as a view.
    pub fn view(&self) -> GridView<'_, T> {
        GridView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }

    /// Borrow a rectangular region of the grid.
    pub fn roi(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<GridView<'_, T>, GridError> {
        self.view().roi(x, y, width, height)
    }

    /// Check that `other` has the same shape as `self`.
    pub fn check_same_shape<U>(&self, other: &Grid<U>) -> Result<(), GridError> {
        if self.width != other.width || self.height != other.height {
            return Err(GridError::ShapeMismatch(
                self.width,
                self.height,
                other.width,
                other.height,
            ));
        }
        Ok(())
    }
}

impl<T: Clone> Grid<T> {
    /// Create a grid filled with `val`.
    pub fn from_size_val(width: usize, height: usize, val: T) -> Self {
        Self {
            width,
            height,
            data: vec![val; width * height],
        }
    }

    /// Fill every cell with `val`.
    pub fn fill(&mut self, val: T) {
        self.data.iter_mut().for_each(|v| *v = val.clone());
    }
}

/// A borrowed rectangular window into a [`Grid`].
#[derive(Debug)]
pub struct GridView<'a, T> {
    data: &'a [T],
    width: usize,
    height: usize,
    stride: usize,
}

impl<T> Clone for GridView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GridView<'_, T> {}

impl<'a, T> GridView<'a, T> {
    /// The number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// The number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// The number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Whether the view has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The cell at column `x` and row `y` of the view.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<&'a T> {
        if x < self.width && y < self.height {
            self.data.get(y * self.stride + x)
        } else {
            None
        }
    }

    /// The cells of row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &'a [T] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Iterate over the rows of the view.
    pub fn rows(&self) -> impl Iterator<Item = &'a [T]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    /// Whether `other` covers the same number of rows and columns.
    pub fn same_shape<U>(&self, other: &GridView<'_, U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Borrow a rectangular sub-region of this view.
    pub fn roi(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<GridView<'a, T>, GridError> {
        if x + width > self.width || y + height > self.height {
            return Err(GridError::RoiOutOfBounds {
                x,
                y,
                width,
                height,
                grid_width: self.width,
                grid_height: self.height,
            });
        }

        let start = y * self.stride + x;
        let end = if height == 0 {
            start
        } else {
            start + (height - 1) * self.stride + width
        };

        Ok(GridView {
            data: &self.data[start..end],
            width,
            height,
            stride: self.stride,
        })
    }
}

/// Whether a point or normal holds a real value, i.e. is not the NaN sentinel.
#[inline]
pub fn is_valid(v: Vec3) -> bool {
    !v.is_nan()
}

/// The sentinel written into invalid cells of point and normal grids.
pub const INVALID: Vec3 = Vec3::NAN;
