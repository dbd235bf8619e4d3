use glam::Vec3;
use kornia_3d::{
    camera::CameraModel,
    grid::{Grid, GridError, GridView},
    pyramid::Pyramid,
    rig::Rig,
};

use crate::error::IcpError;

/// Borrowed points and normals of an organized cloud with the same shape.
#[derive(Debug, Clone, Copy)]
pub struct Surface<'a> {
    /// The points, NaN where invalid.
    pub points: GridView<'a, Vec3>,
    /// The unit normals, NaN where invalid.
    pub normals: GridView<'a, Vec3>,
}

impl<'a> Surface<'a> {
    /// Pair up a point view and a normal view of the same shape.
    pub fn new(points: GridView<'a, Vec3>, normals: GridView<'a, Vec3>) -> Result<Self, IcpError> {
        if !points.same_shape(&normals) {
            return Err(GridError::ShapeMismatch(
                points.width(),
                points.height(),
                normals.width(),
                normals.height(),
            )
            .into());
        }
        Ok(Self { points, normals })
    }

    /// Borrow a whole point grid and normal grid.
    pub fn from_grids(points: &'a Grid<Vec3>, normals: &'a Grid<Vec3>) -> Result<Self, IcpError> {
        Self::new(points.view(), normals.view())
    }

    /// The number of columns.
    pub fn width(&self) -> usize {
        self.points.width()
    }

    /// The number of rows.
    pub fn height(&self) -> usize {
        self.points.height()
    }

    /// The point and normal at `(x, y)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<(Vec3, Vec3)> {
        Some((*self.points.get(x, y)?, *self.normals.get(x, y)?))
    }
}

/// Point and normal pyramids of one organized cloud.
#[derive(Debug, Clone, Copy)]
pub struct SurfacePyramid<'a> {
    /// The point pyramid.
    pub points: &'a Pyramid<Vec3>,
    /// The normal pyramid.
    pub normals: &'a Pyramid<Vec3>,
}

impl<'a> SurfacePyramid<'a> {
    /// Pair up a point pyramid and a normal pyramid of the same shape.
    pub fn new(points: &'a Pyramid<Vec3>, normals: &'a Pyramid<Vec3>) -> Result<Self, IcpError> {
        if !points.same_shape(normals) {
            return Err(IcpError::PyramidShapeMismatch);
        }
        Ok(Self { points, normals })
    }

    /// The number of levels.
    pub fn num_levels(&self) -> usize {
        self.points.num_levels()
    }

    /// The surface at `level`.
    pub fn level(&self, level: usize) -> Result<Surface<'a>, IcpError> {
        match (self.points.level(level), self.normals.level(level)) {
            (Some(points), Some(normals)) => Surface::from_grids(points, normals),
            _ => Err(IcpError::MissingLevel(level)),
        }
    }

    /// The region of `stream` at `level` in a vertically stacked rig image.
    pub fn stream<C: CameraModel>(
        &self,
        rig: &Rig<C>,
        stream: usize,
        level: usize,
    ) -> Result<Surface<'a>, IcpError> {
        let scale = Pyramid::<Vec3>::scale(level);
        match (self.points.level(level), self.normals.level(level)) {
            (Some(points), Some(normals)) => Surface::new(
                rig.stream_roi(points, stream, scale)?,
                rig.stream_roi(normals, stream, scale)?,
            ),
            _ => Err(IcpError::MissingLevel(level)),
        }
    }
}
