use kornia_lie::SE3;

use crate::camera::CameraModel;
use crate::grid::{Grid, GridError, GridView};

/// Errors raised when describing a camera rig.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RigError {
    /// The number of cameras and extrinsics differ.
    #[error("Rig has {0} cameras but {1} extrinsics")]
    ExtrinsicsMismatch(usize, usize),

    /// A stream refers to a camera that does not exist.
    #[error("Stream {stream} refers to camera {camera} but the rig has {num_cameras} cameras")]
    InvalidCamera {
        /// The stream index.
        stream: usize,
        /// The camera index stored for the stream.
        camera: usize,
        /// The number of cameras in the rig.
        num_cameras: usize,
    },

    /// The stream index is out of range.
    #[error("Stream {0} is out of range, the rig has {1} streams")]
    InvalidStream(usize, usize),

    /// The rig has no streams.
    #[error("Rig has no streams")]
    Empty,

    /// Extracting a stream region failed.
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// A set of depth cameras rigidly mounted on a common body.
///
/// The images of all streams are stacked vertically into one grid, ordered by
/// camera index. Every stream has the same `stream_width x stream_height` size
/// at full resolution.
#[derive(Debug, Clone)]
pub struct Rig<C: CameraModel> {
    cameras: Vec<C>,
    rig_from_cameras: Vec<SE3>,
    stream_to_camera: Vec<usize>,
    stream_width: usize,
    stream_height: usize,
}

impl<C: CameraModel> Rig<C> {
    /// Create a rig.
    ///
    /// # Arguments
    ///
    /// * `cameras` - The intrinsics of every camera at full resolution.
    /// * `rig_from_cameras` - The extrinsics `T_rc` of every camera.
    /// * `stream_to_camera` - The camera index of every depth stream.
    /// * `stream_width` - The width of a single stream image.
    /// * `stream_height` - The height of a single stream image.
    pub fn new(
        cameras: Vec<C>,
        rig_from_cameras: Vec<SE3>,
        stream_to_camera: Vec<usize>,
        stream_width: usize,
        stream_height: usize,
    ) -> Result<Self, RigError> {
        if cameras.len() != rig_from_cameras.len() {
            return Err(RigError::ExtrinsicsMismatch(
                cameras.len(),
                rig_from_cameras.len(),
            ));
        }
        if stream_to_camera.is_empty() {
            return Err(RigError::Empty);
        }
        for (stream, &camera) in stream_to_camera.iter().enumerate() {
            if camera >= cameras.len() {
                return Err(RigError::InvalidCamera {
                    stream,
                    camera,
                    num_cameras: cameras.len(),
                });
            }
        }

        Ok(Self {
            cameras,
            rig_from_cameras,
            stream_to_camera,
            stream_width,
            stream_height,
        })
    }

    /// The number of depth streams.
    pub fn num_streams(&self) -> usize {
        self.stream_to_camera.len()
    }

    /// The number of cameras.
    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    /// The full resolution size of a single stream as `(width, height)`.
    pub fn stream_size(&self) -> (usize, usize) {
        (self.stream_width, self.stream_height)
    }

    /// The camera index of `stream`.
    pub fn stream_camera_index(&self, stream: usize) -> Result<usize, RigError> {
        self.stream_to_camera
            .get(stream)
            .copied()
            .ok_or(RigError::InvalidStream(stream, self.num_streams()))
    }

    /// The full resolution camera model of `stream`.
    pub fn stream_camera(&self, stream: usize) -> Result<&C, RigError> {
        let camera = self.stream_camera_index(stream)?;
        Ok(&self.cameras[camera])
    }

    /// The extrinsics `T_rc` of the camera behind `stream`.
    pub fn stream_rig_from_camera(&self, stream: usize) -> Result<SE3, RigError> {
        let camera = self.stream_camera_index(stream)?;
        Ok(self.rig_from_cameras[camera])
    }

    /// The camera models.
    pub fn cameras(&self) -> &[C] {
        &self.cameras
    }

    /// The extrinsics `T_rc` of every camera.
    pub fn rig_from_cameras(&self) -> &[SE3] {
        &self.rig_from_cameras
    }

    /// The extrinsics `T_rc` of every camera, mutably.
    pub fn rig_from_cameras_mut(&mut self) -> &mut [SE3] {
        &mut self.rig_from_cameras
    }

    /// The rectangle `(x, y, width, height)` covered by `stream` in a stacked
    /// image resized by `scale`.
    pub fn stream_rect(
        &self,
        stream: usize,
        scale: f32,
    ) -> Result<(usize, usize, usize, usize), RigError> {
        let camera = self.stream_camera_index(stream)?;
        let min_camera = self.stream_to_camera.iter().copied().min().unwrap_or(0);
        let width = (self.stream_width as f32 * scale).floor() as usize;
        let height = (self.stream_height as f32 * scale).floor() as usize;
        Ok((0, (camera - min_camera) * height, width, height))
    }

    /// The region of a stacked image that belongs to `stream`.
    pub fn stream_roi<'a, T>(
        &self,
        image: &'a Grid<T>,
        stream: usize,
        scale: f32,
    ) -> Result<GridView<'a, T>, RigError> {
        let (x, y, width, height) = self.stream_rect(stream, scale)?;
        Ok(image.roi(x, y, width, height)?)
    }
}
