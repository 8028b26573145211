use ndarray::Array3;
use thiserror::Error;

use crate::frame_store::{FrameStore, FrameStoreError};
use crate::geometry::MATRIX_STRIDE;

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("mask buffer holds {len} bytes, expected {width}x{height}")]
    MaskLength {
        len: usize,
        width: usize,
        height: usize,
    },

    #[error("mask is {mask:?}, processed frames are {frame:?}")]
    MaskShape {
        mask: (usize, usize),
        frame: (usize, usize),
    },

    #[error("output buffer holds {len} bytes, dimensions {dims:?} need {expected}")]
    OutputLength {
        len: usize,
        dims: (usize, usize, usize),
        expected: usize,
    },

    #[error("output volume has an empty dimension: {0:?}")]
    EmptyOutput((usize, usize, usize)),

    #[error("output spacing must be positive and finite: {0:?}")]
    OutputSpacing((f64, f64, f64)),

    #[error("{values} tracking values for {frames} frames, expected {expected}")]
    TrackingLength {
        values: usize,
        frames: usize,
        expected: usize,
    },

    #[error("no active frames to reconstruct from")]
    NoFrames,

    #[error("search distance must be positive and finite, got {0}")]
    SearchDistance(f64),
}

/// Validity bitmap shared by every frame. Non-zero pixels are valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Mask {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, InputError> {
        if data.len() != width * height {
            return Err(InputError::MaskLength {
                len: data.len(),
                width,
                height,
            });
        }
        Ok(Self::from_parts(width, height, data))
    }

    pub fn all_valid(width: usize, height: usize) -> Self {
        Self::from_parts(width, height, vec![1; width * height])
    }

    pub(crate) fn from_parts(width: usize, height: usize, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x] != 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Caller-owned voxel buffer the reconstruction writes into.
///
/// Dimensions are `(x, y, z)` and voxel `(x, y, z)` lives at byte
/// `x + y * dx + z * dx * dy`, centred at `(x * sx, y * sy, z * sz)`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputVolume {
    dims: (usize, usize, usize),
    spacing: (f64, f64, f64),
    data: Vec<u8>,
}

impl OutputVolume {
    pub fn new(dims: (usize, usize, usize), spacing: (f64, f64, f64)) -> Result<Self, InputError> {
        Self::from_buffer(vec![0; dims.0 * dims.1 * dims.2], dims, spacing)
    }

    pub fn from_buffer(
        data: Vec<u8>,
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
    ) -> Result<Self, InputError> {
        if dims.0 == 0 || dims.1 == 0 || dims.2 == 0 {
            return Err(InputError::EmptyOutput(dims));
        }
        let expected = dims.0 * dims.1 * dims.2;
        if data.len() != expected {
            return Err(InputError::OutputLength {
                len: data.len(),
                dims,
                expected,
            });
        }
        let (sx, sy, sz) = spacing;
        if [sx, sy, sz].iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(InputError::OutputSpacing(spacing));
        }
        Ok(Self {
            dims,
            spacing,
            data,
        })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn spacing(&self) -> (f64, f64, f64) {
        self.spacing
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> u8 {
        let (dx, dy, _) = self.dims;
        self.data[x + y * dx + z * dx * dy]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The volume as a `(depth, height, width)` array.
    pub fn to_array(&self) -> Array3<u8> {
        let (dx, dy, dz) = self.dims;
        Array3::from_shape_fn((dz, dy, dx), |(z, y, x)| self.voxel(x, y, z))
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Everything a reconstruction consumes: frames, one pose per ingested
/// frame, the shared mask and the volume to fill.
///
/// `tracking_matrices` holds 12 values per ingested frame (row-major 3x4,
/// rotation then translation in the last column). Poses stay indexed by the
/// original frame, so removing a frame from `frame_data` also drops its pose.
pub struct InputAggregate {
    pub frame_data: FrameStore,
    pub tracking_matrices: Vec<f64>,
    pub mask: Mask,
    pub output: OutputVolume,
}

impl InputAggregate {
    pub fn new(
        frame_data: FrameStore,
        tracking_matrices: Vec<f64>,
        mask: Mask,
        output: OutputVolume,
    ) -> Result<Self, InputError> {
        let input = Self {
            frame_data,
            tracking_matrices,
            mask,
            output,
        };
        input.validate_tracking()?;
        Ok(input)
    }

    pub fn remove_frame(&mut self, index: usize) -> Result<(), FrameStoreError> {
        self.frame_data.remove_frame(index)
    }

    pub(crate) fn validate_tracking(&self) -> Result<(), InputError> {
        let frames = self.frame_data.frame_count();
        let expected = frames * MATRIX_STRIDE;
        if self.tracking_matrices.len() != expected {
            return Err(InputError::TrackingLength {
                values: self.tracking_matrices.len(),
                frames,
                expected,
            });
        }
        Ok(())
    }

    pub(crate) fn validate_mask(&self) -> Result<(), InputError> {
        let (width, height, _) = self.frame_data.dimensions();
        let mask = (self.mask.width(), self.mask.height());
        if mask != (width, height) {
            return Err(InputError::MaskShape {
                mask,
                frame: (width, height),
            });
        }
        Ok(())
    }
}
