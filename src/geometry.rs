//! Frame plane geometry in output-volume space.

use glam::{DMat3, DVec3};
use thiserror::Error;

/// Values per tracking matrix in the flat pose stream.
pub const MATRIX_STRIDE: usize = 12;

/// Cross products shorter than this mark a zero-area frame.
const DEGENERATE_EPSILON: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("frame {frame} has collinear corner points, its plane normal is undefined")]
    DegenerateFrame { frame: usize },

    #[error("{values} tracking values is not a whole number of {MATRIX_STRIDE}-value matrices")]
    MatrixCount { values: usize },
}

/// Rigid pose of one frame: `p_volume = rotation * p_frame + translation`,
/// with `p_frame` in millimetres (pixel index times spacing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingMatrix {
    pub rotation: DMat3,
    pub translation: DVec3,
}

impl TrackingMatrix {
    pub fn identity() -> Self {
        Self::from_rotation_translation(DMat3::IDENTITY, DVec3::ZERO)
    }

    pub fn from_rotation_translation(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_translation(translation: DVec3) -> Self {
        Self::from_rotation_translation(DMat3::IDENTITY, translation)
    }

    /// Row-major 3x4 block: `[r00 r01 r02 tx r10 r11 r12 ty r20 r21 r22 tz]`.
    pub fn from_row_major(m: &[f64; MATRIX_STRIDE]) -> Self {
        let rotation = DMat3::from_cols(
            DVec3::new(m[0], m[4], m[8]),
            DVec3::new(m[1], m[5], m[9]),
            DVec3::new(m[2], m[6], m[10]),
        );
        Self::from_rotation_translation(rotation, DVec3::new(m[3], m[7], m[11]))
    }

    pub fn to_row_major(&self) -> [f64; MATRIX_STRIDE] {
        let (r, t) = (self.rotation, self.translation);
        [
            r.x_axis.x, r.y_axis.x, r.z_axis.x, t.x, //
            r.x_axis.y, r.y_axis.y, r.z_axis.y, t.y, //
            r.x_axis.z, r.y_axis.z, r.z_axis.z, t.z,
        ]
    }

    #[inline]
    pub fn transform_point(&self, p: DVec3) -> DVec3 {
        self.rotation * p + self.translation
    }

    /// The same pose for a frame whose origin moved to `offset` in frame
    /// coordinates, e.g. the corner of a crop region.
    pub fn with_pixel_offset(&self, offset: DVec3) -> Self {
        Self::from_rotation_translation(self.rotation, self.transform_point(offset))
    }
}

/// Split a flat pose stream into per-frame matrices.
pub fn parse_tracking_matrices(values: &[f64]) -> Result<Vec<TrackingMatrix>, GeometryError> {
    if values.len() % MATRIX_STRIDE != 0 {
        return Err(GeometryError::MatrixCount {
            values: values.len(),
        });
    }
    Ok(values
        .chunks_exact(MATRIX_STRIDE)
        .map(|chunk| {
            let mut block = [0.0; MATRIX_STRIDE];
            block.copy_from_slice(chunk);
            TrackingMatrix::from_row_major(&block)
        })
        .collect())
}

/// Three corners of a frame in volume space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanePoints {
    pub origin: DVec3,
    /// End of the first row, `(width * sx, 0, 0)` before transformation.
    pub along_width: DVec3,
    /// End of the first column, `(0, height * sy, 0)` before transformation.
    pub along_height: DVec3,
}

/// `normal · p + offset = 0` for every point `p` on the frame plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneEquation {
    pub normal: DVec3,
    pub offset: f64,
}

impl PlaneEquation {
    #[inline]
    pub fn signed_distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) + self.offset
    }
}

pub fn generate_plane_points(
    matrices: &[TrackingMatrix],
    frame_width: usize,
    frame_height: usize,
    spacing_x: f64,
    spacing_y: f64,
) -> Vec<PlanePoints> {
    let along_width = DVec3::new(frame_width as f64 * spacing_x, 0.0, 0.0);
    let along_height = DVec3::new(0.0, frame_height as f64 * spacing_y, 0.0);
    matrices
        .iter()
        .map(|m| PlanePoints {
            origin: m.transform_point(DVec3::ZERO),
            along_width: m.transform_point(along_width),
            along_height: m.transform_point(along_height),
        })
        .collect()
}

pub fn generate_plane_equations(points: &[PlanePoints]) -> Result<Vec<PlaneEquation>, GeometryError> {
    points
        .iter()
        .enumerate()
        .map(|(frame, p)| {
            let (a, b, c) = (p.origin, p.along_width, p.along_height);
            let cross = (a - b).cross(c - a);
            let length = cross.length();
            if !(length > DEGENERATE_EPSILON) {
                return Err(GeometryError::DegenerateFrame { frame });
            }
            let normal = cross / length;
            Ok(PlaneEquation {
                normal,
                offset: -normal.dot(a),
            })
        })
        .collect()
}

/// Per-frame plane as the kernel reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PlaneRecord {
    pub origin: [f32; 4],
    /// `along_width - origin`
    pub axis_u: [f32; 4],
    /// `along_height - origin`
    pub axis_v: [f32; 4],
    /// `(normal, offset)`
    pub equation: [f32; 4],
}

const _: () = assert!(core::mem::size_of::<PlaneRecord>() == 64);

impl PlaneRecord {
    pub fn new(points: &PlanePoints, equation: &PlaneEquation) -> Self {
        let pad = |v: DVec3| [v.x as f32, v.y as f32, v.z as f32, 0.0];
        let n = equation.normal;
        Self {
            origin: pad(points.origin),
            axis_u: pad(points.along_width - points.origin),
            axis_v: pad(points.along_height - points.origin),
            equation: [n.x as f32, n.y as f32, n.z as f32, equation.offset as f32],
        }
    }
}
